//! Pipeline lifecycle: wiring, launch, and result aggregation.
//!
//! A [`Pipeline`] is single use. `prepare` resolves step types and
//! builds the queue graph, `start` fires the threads, and
//! `wait_until_finished` joins them and merges their counters into an
//! [`ExecutionResult`]. Step errors do not turn into an `Err` here;
//! they are reported through the result so callers always get the
//! counters. `Err` is reserved for lifecycle misuse, unresolvable
//! definitions, and host failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use rowflow_types::{ExecutionResult, StepCopyCounters, StepError};

use crate::config::types::{PipelineDef, StepDef};
use crate::config::validator::validate_pipeline;
use crate::error::EngineError;
use crate::extension::{ExtensionContext, ExtensionPointRegistry, PIPELINE_FINISH, PIPELINE_START};
use crate::graph::{copy_pairs, sink_steps};
use crate::queue::{row_queue, InputPorts, OutputPort, RowConsumer, RowProducer, StopSignal};
use crate::registry::PluginRegistry;
use crate::step::{run_step, ErrorRouting, StepContext, StepHandler, StepOutcome};

/// Lifecycle states of a pipeline. Transitions are linear; a pipeline
/// is never reused after reaching a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Prepared,
    Running,
    Finished,
    Stopped,
    Failed,
}

struct PreparedCopy {
    step: String,
    copy: u32,
    handler: Box<dyn StepHandler>,
    ctx: StepContext,
    initialized: bool,
}

struct RunningCopy {
    step: String,
    copy: u32,
    handle: JoinHandle<StepOutcome>,
}

/// A single pipeline run.
pub struct Pipeline {
    def: PipelineDef,
    registry: Arc<PluginRegistry>,
    extensions: Option<Arc<ExtensionPointRegistry>>,
    stop: Arc<StopSignal>,
    state: PipelineState,
    prepared: Vec<PreparedCopy>,
    running: Vec<RunningCopy>,
    started_at: Option<Instant>,
    result: Option<ExecutionResult>,
}

impl Pipeline {
    #[must_use]
    pub fn new(def: PipelineDef, registry: Arc<PluginRegistry>) -> Self {
        Self {
            def,
            registry,
            extensions: None,
            stop: StopSignal::new(),
            state: PipelineState::Created,
            prepared: Vec::new(),
            running: Vec::new(),
            started_at: None,
            result: None,
        }
    }

    /// Attach an extension point table; its handlers fire around the
    /// run.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Arc<ExtensionPointRegistry>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Result of the run, available once `wait_until_finished` returned.
    #[must_use]
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    /// Validate the definition, resolve every step type, build the
    /// queue graph, and initialize all step copies.
    ///
    /// # Errors
    ///
    /// Fails on an invalid definition, an unregistered step type, or a
    /// step whose `init` rejects its configuration. Already-initialized
    /// copies are disposed before returning.
    pub fn prepare(&mut self) -> Result<(), EngineError> {
        if self.state != PipelineState::Created {
            return Err(EngineError::Lifecycle(format!(
                "prepare called in state {:?}",
                self.state
            )));
        }
        validate_pipeline(&self.def)?;

        // resolve every step type before building anything
        let mut factories = Vec::with_capacity(self.def.steps.len());
        for step in &self.def.steps {
            let factory = self.registry.resolve_step(&step.type_id).ok_or_else(|| {
                EngineError::step(
                    &step.name,
                    StepError::config(
                        "UNKNOWN_STEP_TYPE",
                        format!("no step type '{}' registered", step.type_id),
                    ),
                )
            })?;
            factories.push(factory);
        }

        let mut wiring = self.build_wiring();

        for (step, factory) in self.def.steps.iter().zip(factories) {
            for copy in 0..step.copies {
                let handler = match factory.build(&step.config) {
                    Ok(handler) => handler,
                    Err(e) => {
                        // drop copies built so far; none are initialized yet
                        let err = EngineError::step(&step.name, e);
                        self.dispose_prepared();
                        self.state = PipelineState::Failed;
                        return Err(err);
                    }
                };
                let slot = wiring
                    .remove(&(step.name.clone(), copy))
                    .unwrap_or_default();
                let routing = step.error_handling.as_ref().map(|eh| ErrorRouting {
                    code_field: eh.code_field.clone(),
                    message_field: eh.message_field.clone(),
                });
                let ctx = StepContext::new(
                    step.name.clone(),
                    copy,
                    InputPorts::new(slot.inputs, self.stop.cancel_token()),
                    slot.outputs,
                    slot.error_output,
                    routing,
                    Arc::clone(&self.stop),
                );
                self.prepared.push(PreparedCopy {
                    step: step.name.clone(),
                    copy,
                    handler,
                    ctx,
                    initialized: false,
                });
            }
        }

        // init in definition order; on failure dispose whatever came up
        for i in 0..self.prepared.len() {
            let copy = &mut self.prepared[i];
            if let Err(err) = copy.handler.init(&mut copy.ctx) {
                let step = copy.step.clone();
                tracing::error!(step, copy = copy.copy, error = %err, "Step init failed");
                self.dispose_prepared();
                self.state = PipelineState::Failed;
                return Err(EngineError::step(step, err));
            }
            copy.initialized = true;
        }

        self.state = PipelineState::Prepared;
        tracing::info!(
            pipeline = self.def.name,
            steps = self.def.steps.len(),
            copies = self.prepared.len(),
            "Pipeline prepared"
        );
        Ok(())
    }

    /// Fire the start extension point and launch one thread per step
    /// copy.
    ///
    /// # Errors
    ///
    /// Fails when called out of order, when a start handler aborts the
    /// run, or when a thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != PipelineState::Prepared {
            return Err(EngineError::Lifecycle(format!(
                "start called in state {:?}",
                self.state
            )));
        }

        if let Some(extensions) = &self.extensions {
            let ctx = ExtensionContext::PipelineStart {
                pipeline: &self.def.name,
            };
            if let Err(err) = extensions.invoke(PIPELINE_START, &ctx) {
                self.dispose_prepared();
                self.state = PipelineState::Failed;
                return Err(err);
            }
        }

        self.started_at = Some(Instant::now());
        for copy in self.prepared.drain(..) {
            let stop = Arc::clone(&self.stop);
            let PreparedCopy {
                step, copy: copy_nr, handler, ctx, ..
            } = copy;
            let handle = std::thread::Builder::new()
                .name(format!("{step}.{copy_nr}"))
                .spawn(move || run_step(handler, ctx, stop))
                .map_err(|e| {
                    self.stop.stop_all();
                    EngineError::Infrastructure(
                        anyhow::Error::new(e).context(format!("failed to spawn thread for step '{step}'")),
                    )
                })?;
            self.running.push(RunningCopy {
                step: step.clone(),
                copy: copy_nr,
                handle,
            });
        }

        self.state = PipelineState::Running;
        tracing::info!(pipeline = self.def.name, threads = self.running.len(), "Pipeline started");
        Ok(())
    }

    /// Request an immediate stop: every queue operation unblocks and
    /// every step copy winds down.
    pub fn stop_all(&self) {
        tracing::info!(pipeline = self.def.name, "Stop requested");
        self.stop.stop_all();
    }

    /// Request a safe stop: sources stop producing, rows already in
    /// flight drain through.
    pub fn safe_stop(&self) {
        tracing::info!(pipeline = self.def.name, "Safe stop requested");
        self.stop.safe_stop();
    }

    /// Join every step thread and aggregate the result.
    ///
    /// Step errors are reported in the returned result, not as `Err`;
    /// the counters stay readable either way.
    ///
    /// # Errors
    ///
    /// Fails only when called out of order.
    pub fn wait_until_finished(&mut self) -> Result<ExecutionResult, EngineError> {
        if self.state != PipelineState::Running {
            return Err(EngineError::Lifecycle(format!(
                "wait_until_finished called in state {:?}",
                self.state
            )));
        }

        let mut steps = Vec::with_capacity(self.running.len());
        let mut files = Vec::new();
        let mut first_error: Option<String> = None;
        let mut panics: u64 = 0;
        for running in self.running.drain(..) {
            match running.handle.join() {
                Ok(outcome) => {
                    if first_error.is_none() {
                        if let Some(err) = outcome.error {
                            first_error =
                                Some(EngineError::step(&running.step, err).to_string());
                        }
                    }
                    files.extend(outcome.files);
                    steps.push(StepCopyCounters {
                        step: running.step,
                        copy: running.copy,
                        counters: outcome.counters,
                    });
                }
                Err(_) => {
                    tracing::error!(step = running.step, copy = running.copy, "Step thread panicked");
                    panics += 1;
                    if first_error.is_none() {
                        first_error = Some(format!(
                            "step '{}' copy {} panicked",
                            running.step, running.copy
                        ));
                    }
                }
            }
        }

        let sinks = sink_steps(&self.def);
        let mut rows_read = 0;
        let mut rows_written = 0;
        let mut rows_rejected = 0;
        let mut errors = panics;
        for entry in &steps {
            if sinks.contains(&entry.step) {
                rows_read += entry.counters.read;
                rows_written += entry.counters.written;
            }
            rows_rejected += entry.counters.rejected;
            errors += entry.counters.errors;
        }

        let stopped = errors == 0 && self.stop.stop_requested();
        let duration_secs = self
            .started_at
            .map_or(0.0, |t| t.elapsed().as_secs_f64());

        let result = ExecutionResult {
            rows_read,
            rows_written,
            rows_rejected,
            errors,
            files,
            stopped,
            duration_secs,
            first_error,
            steps,
        };

        self.state = if errors > 0 {
            PipelineState::Failed
        } else if stopped {
            PipelineState::Stopped
        } else {
            PipelineState::Finished
        };
        tracing::info!(
            pipeline = self.def.name,
            state = ?self.state,
            rows_written = result.rows_written,
            errors = result.errors,
            duration_secs = result.duration_secs,
            "Pipeline finished"
        );

        if let Some(extensions) = &self.extensions {
            let ctx = ExtensionContext::PipelineFinish {
                pipeline: &self.def.name,
                result: &result,
            };
            // the run is already over; a finish-time abort cannot undo it
            if let Err(err) = extensions.invoke(PIPELINE_FINISH, &ctx) {
                tracing::warn!(error = %err, "Finish extension point aborted");
            }
        }

        self.result = Some(result.clone());
        Ok(result)
    }

    fn dispose_prepared(&mut self) {
        for copy in &mut self.prepared {
            copy.ctx.close_outputs();
            if copy.initialized {
                copy.handler.dispose(&mut copy.ctx);
            }
        }
        self.prepared.clear();
    }

    /// Build the per-copy queue wiring for every hop and error route.
    fn build_wiring(&self) -> HashMap<(String, u32), CopyWiring> {
        let capacity = self.def.settings.queue_capacity;
        let by_name: HashMap<&str, &StepDef> =
            self.def.steps.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut wiring: HashMap<(String, u32), CopyWiring> = HashMap::new();

        let wire = |from: &StepDef, to: &StepDef, error_route: bool,
                        wiring: &mut HashMap<(String, u32), CopyWiring>| {
            let pairs = copy_pairs(from.copies, to.copies);
            let mut per_producer: HashMap<u32, Vec<RowProducer>> = HashMap::new();
            for (p, c) in pairs {
                let (tx, rx) = row_queue(capacity, self.stop.cancel_token());
                per_producer.entry(p).or_default().push(tx);
                wiring
                    .entry((to.name.clone(), c))
                    .or_default()
                    .inputs
                    .push(rx);
            }
            for (p, producers) in per_producer {
                let slot = wiring.entry((from.name.clone(), p)).or_default();
                let port = OutputPort::new(to.name.clone(), producers);
                if error_route {
                    slot.error_output = Some(port);
                } else {
                    slot.outputs.push(port);
                }
            }
        };

        for hop in &self.def.hops {
            // endpoints were checked by the validator
            if let (Some(&from), Some(&to)) =
                (by_name.get(hop.from.as_str()), by_name.get(hop.to.as_str()))
            {
                wire(from, to, false, &mut wiring);
            }
        }
        for step in &self.def.steps {
            if let Some(eh) = &step.error_handling {
                if let Some(&target) = by_name.get(eh.target.as_str()) {
                    wire(step, target, true, &mut wiring);
                }
            }
        }
        wiring
    }
}

#[derive(Default)]
struct CopyWiring {
    inputs: Vec<RowConsumer>,
    outputs: Vec<OutputPort>,
    error_output: Option<OutputPort>,
}

/// Prepare, start, and wait in one call.
///
/// # Errors
///
/// Fails on an invalid or unresolvable definition, an aborted start
/// extension point, or a host failure. Step errors during the run are
/// reported through the returned [`ExecutionResult`].
pub fn run_pipeline(
    def: PipelineDef,
    registry: Arc<PluginRegistry>,
    extensions: Option<Arc<ExtensionPointRegistry>>,
) -> Result<ExecutionResult, EngineError> {
    let mut pipeline = Pipeline::new(def, registry);
    if let Some(extensions) = extensions {
        pipeline = pipeline.with_extensions(extensions);
    }
    pipeline.prepare()?;
    pipeline.start()?;
    pipeline.wait_until_finished()
}
