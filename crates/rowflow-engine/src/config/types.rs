use serde::{Deserialize, Serialize};

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// A complete pipeline definition: named steps plus the hops wiring
/// them into a directed acyclic graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    #[serde(default)]
    pub settings: PipelineSettings,
    pub steps: Vec<StepDef>,
    #[serde(default)]
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Row capacity of every queue between two step copies.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique name of this step within the pipeline.
    pub name: String,
    /// Step type id, resolved through the plugin registry.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Number of parallel copies of this step.
    #[serde(default = "default_copies")]
    pub copies: u32,
    /// Step-type-specific configuration, passed to the factory verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
    /// When set, row-scoped errors in this step are redirected instead
    /// of stopping the run.
    #[serde(default)]
    pub error_handling: Option<ErrorHandling>,
}

fn default_copies() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandling {
    /// Step receiving the redirected rows.
    pub target: String,
    #[serde(default = "default_code_field")]
    pub code_field: String,
    #[serde(default = "default_message_field")]
    pub message_field: String,
}

fn default_code_field() -> String {
    "error_code".to_string()
}

fn default_message_field() -> String {
    "error_message".to_string()
}

/// A directed edge: every row written by `from` is delivered to `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
}
