//! The step contract and the per-copy run driver.
//!
//! A step is the pairing of a handler (the transformation logic,
//! resolved through the plugin registry) and a [`StepContext`] (its
//! queues, counters, and stop handles). One step instance exists per
//! configured copy; each runs on its own thread and owns its state
//! exclusively.

use std::sync::Arc;

use chrono::Utc;
use rowflow_types::{Field, FieldType, ResultFile, Row, RowSchema, StepCounters, StepError, Value};

use crate::queue::{InputPorts, OutputPort, QueueClosed, StopSignal};

/// Run states of a step copy's thread. Construction and init failures
/// surface through `Pipeline::prepare`, so a copy that reaches its
/// thread is already initialized; disposal always runs on the way out
/// and needs no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Running,
    /// Ran out of input (or internally generated data) and finished.
    Done,
    /// Terminated by a stop request.
    Stopped,
    /// Terminated by an unrecovered error.
    Errored,
}

/// The transformation logic of one step type.
///
/// `init` validates configuration and allocates step-local resources;
/// a failure aborts the pipeline before any row flows. `process_row`
/// is invoked repeatedly until it returns `Ok(false)` ("no more work")
/// or the step is told to stop; each invocation pulls at most one row,
/// transforms it, and pushes zero or more rows. `dispose` releases
/// resources and runs exactly once on every exit path.
///
/// Handlers needing one-shot setup that depends on the input schema
/// (field positions by name) keep a `first: bool` and resolve on their
/// first row, since the schema is not known before it arrives.
pub trait StepHandler: Send {
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Process one unit of work. `Ok(true)` means "call me again",
    /// `Ok(false)` means all work is done.
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError>;

    fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Error-row redirection settings for one step, resolved from its
/// definition at prepare time.
#[derive(Debug, Clone)]
pub(crate) struct ErrorRouting {
    pub(crate) code_field: String,
    pub(crate) message_field: String,
}

/// Everything a step copy owns at run time: input/output ports,
/// counters, result files, and the shared stop handles. Owned
/// exclusively by the step's thread.
pub struct StepContext {
    step_name: String,
    copy_nr: u32,
    source: bool,
    inputs: InputPorts,
    /// One port per downstream step; rows written go to every port,
    /// round-robin across each port's copies.
    outputs: Vec<OutputPort>,
    error_output: Option<OutputPort>,
    error_routing: Option<ErrorRouting>,
    counters: StepCounters,
    files: Vec<ResultFile>,
    stop: Arc<StopSignal>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        step_name: String,
        copy_nr: u32,
        inputs: InputPorts,
        outputs: Vec<OutputPort>,
        error_output: Option<OutputPort>,
        error_routing: Option<ErrorRouting>,
        stop: Arc<StopSignal>,
    ) -> Self {
        let source = inputs.port_count() == 0;
        Self {
            step_name,
            copy_nr,
            source,
            inputs,
            outputs,
            error_output,
            error_routing,
            counters: StepCounters::default(),
            files: Vec::new(),
            stop,
        }
    }

    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    #[must_use]
    pub fn copy_nr(&self) -> u32 {
        self.copy_nr
    }

    /// True when the step has no input queues and generates rows
    /// internally.
    #[must_use]
    pub fn is_source(&self) -> bool {
        self.source
    }

    /// Pull the next row from the input queues (arrival order across
    /// fan-in). `None` means end-of-stream on every input, or a stop
    /// request. This is the step's suspension point on the read side.
    pub fn read_row(&mut self) -> Option<Row> {
        let row = self.inputs.get()?;
        self.counters.read += 1;
        Some(row)
    }

    /// Schema of the input queues, available once the upstream step has
    /// propagated it (always before the first row).
    #[must_use]
    pub fn input_schema(&self) -> Option<&Arc<RowSchema>> {
        self.inputs.schema()
    }

    /// Declare the schema of the rows this step emits. Must be called
    /// before the first `write_row`; each output queue delivers it to
    /// its consumer ahead of any row. The error output gets the same
    /// schema extended with the configured code and message fields.
    pub fn set_output_schema(&mut self, schema: RowSchema) {
        if let Some(port) = &mut self.error_output {
            let mut extended = schema.clone();
            if let Some(routing) = &self.error_routing {
                extended.push(Field::new(routing.code_field.clone(), FieldType::String));
                extended.push(Field::new(routing.message_field.clone(), FieldType::String));
            }
            port.set_schema(Arc::new(extended));
        }
        let schema = Arc::new(schema);
        for port in &mut self.outputs {
            port.set_schema(Arc::clone(&schema));
        }
    }

    /// Push a row to every downstream step, round-robin across each
    /// step's copies. Blocks while a target queue is full; this is the
    /// step's suspension point on the write side. Counts one written
    /// row regardless of fan-out.
    ///
    /// For sink steps (no downstream hops) this only counts the row as
    /// written, which is how external output is reported.
    pub fn write_row(&mut self, row: Row) -> Result<(), StepError> {
        match self.outputs.as_mut_slice() {
            [] => {}
            [only] => only.put(row).map_err(closed_to_error)?,
            [head @ .., last] => {
                for port in head {
                    port.put(row.clone()).map_err(closed_to_error)?;
                }
                last.put(row).map_err(closed_to_error)?;
            }
        }
        self.counters.written += 1;
        Ok(())
    }

    /// True when this step was configured with error-row redirection.
    #[must_use]
    pub fn error_handling_enabled(&self) -> bool {
        self.error_output.is_some()
    }

    /// Redirect a failed row: tag it with the error code and message
    /// fields and route it to the error queue.
    pub fn write_error_row(&mut self, mut row: Row, error: &StepError) -> Result<(), StepError> {
        let Some(port) = &mut self.error_output else {
            return Err(StepError::internal(
                "NO_ERROR_TARGET",
                "error row written without error handling configured",
            ));
        };
        row.push(Value::from(error.code.to_string()));
        row.push(Value::from(error.message.clone()));
        port.put(row).map_err(closed_to_error)?;
        self.counters.rejected += 1;
        tracing::debug!(
            step = self.step_name,
            copy = self.copy_nr,
            code = %error.code,
            "Row redirected to error output"
        );
        Ok(())
    }

    /// Apply the per-row error policy: redirect when the error is
    /// row-scoped and redirection is configured, escalate otherwise.
    pub fn handle_row_error(&mut self, row: Row, error: StepError) -> Result<(), StepError> {
        if error.is_row_scoped() && self.error_handling_enabled() {
            self.write_error_row(row, &error)
        } else {
            Err(error)
        }
    }

    /// Field names appended to redirected rows, when configured.
    #[must_use]
    pub fn error_field_names(&self) -> Option<(&str, &str)> {
        self.error_routing
            .as_ref()
            .map(|r| (r.code_field.as_str(), r.message_field.as_str()))
    }

    /// Record a file this step generated; merged into the aggregate
    /// result.
    pub fn add_result_file(&mut self, path: impl Into<std::path::PathBuf>, kind: impl Into<String>) {
        self.files.push(ResultFile {
            path: path.into(),
            kind: kind.into(),
            step: self.step_name.clone(),
            created_at: Utc::now(),
        });
    }

    /// Cooperative stop check; consulted at the top of every loop
    /// iteration by the driver and available to handlers with long
    /// internal loops.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Safe-stop check for source steps: stop generating new rows but
    /// let buffered rows drain.
    #[must_use]
    pub fn safe_stop_requested(&self) -> bool {
        self.stop.is_safe_stop()
    }

    /// Escalate a step-fatal condition to the whole pipeline.
    pub fn abort_pipeline(&self) {
        self.stop.stop_all();
    }

    pub(crate) fn close_outputs(&mut self) {
        for port in &mut self.outputs {
            port.close();
        }
        if let Some(port) = &mut self.error_output {
            port.close();
        }
    }

    pub(crate) fn counters(&self) -> StepCounters {
        self.counters
    }
}

fn closed_to_error(_: QueueClosed) -> StepError {
    // only happens after a stop request or downstream death; the
    // driver re-checks the stop flag to classify it
    StepError::internal("QUEUE_CLOSED", "row queue closed during write")
}

/// Terminal outcome of one step copy's thread.
pub(crate) struct StepOutcome {
    pub(crate) state: StepState,
    pub(crate) counters: StepCounters,
    pub(crate) files: Vec<ResultFile>,
    pub(crate) error: Option<StepError>,
}

/// The run loop executed on each step copy's thread.
///
/// End-of-stream propagation: when the handler reports no more work
/// (inputs drained, or a source exhausted), the step closes all of its
/// output queues before disposing, which is how completion cascades
/// downstream without a central scheduler.
pub(crate) fn run_step(
    mut handler: Box<dyn StepHandler>,
    mut ctx: StepContext,
    stop: Arc<StopSignal>,
) -> StepOutcome {
    let mut state = StepState::Running;
    let mut failure: Option<StepError> = None;

    loop {
        if stop.is_stopped() {
            state = StepState::Stopped;
            break;
        }
        if ctx.is_source() && stop.is_safe_stop() {
            // sources stop generating; downstream drains what is buffered
            state = StepState::Stopped;
            break;
        }
        match handler.process_row(&mut ctx) {
            Ok(true) => {}
            Ok(false) => {
                // a stop request closes the input queues, which a reader
                // blocked in read_row sees as end-of-stream; classify it
                state = if stop.is_stopped() {
                    StepState::Stopped
                } else {
                    StepState::Done
                };
                break;
            }
            Err(err) => {
                if stop.is_stopped() {
                    // queue abandoned by a stop request, not a failure
                    state = StepState::Stopped;
                } else {
                    tracing::error!(
                        step = ctx.step_name(),
                        copy = ctx.copy_nr(),
                        error = %err,
                        "Step failed"
                    );
                    ctx.counters.errors += 1;
                    failure = Some(err);
                    state = StepState::Errored;
                    // one failing step stops the whole pipeline
                    stop.stop_all();
                }
                break;
            }
        }
    }

    ctx.close_outputs();
    handler.dispose(&mut ctx);

    tracing::debug!(
        step = ctx.step_name(),
        copy = ctx.copy_nr(),
        state = ?state,
        read = ctx.counters.read,
        written = ctx.counters.written,
        "Step finished"
    );

    StepOutcome {
        state,
        counters: ctx.counters(),
        files: std::mem::take(&mut ctx.files),
        error: failure,
    }
}
