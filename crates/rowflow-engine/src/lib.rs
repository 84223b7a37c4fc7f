//! Core execution engine for rowflow pipelines.
//!
//! A pipeline is a statically-defined directed graph of steps connected
//! by bounded row queues. Each step copy runs on its own OS thread;
//! coordination happens only through the queues and a shared stop
//! signal. See [`pipeline::Pipeline`] for the run controls.

pub mod config;
pub mod error;
pub mod extension;
pub mod graph;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod step;

// Re-export public API for convenience
pub use error::EngineError;
pub use extension::{
    ExtensionContext, ExtensionHandler, ExtensionPointRegistry, HandlerError, PIPELINE_FINISH,
    PIPELINE_START,
};
pub use pipeline::{run_pipeline, Pipeline, PipelineState};
pub use registry::{ExtensionFactory, PluginKind, PluginRegistry, RegistryListener, StepFactory};
pub use step::{StepContext, StepHandler};
