//! End-to-end engine tests with in-process step handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rowflow_engine::config::parse_pipeline_str;
use rowflow_engine::config::types::{ErrorHandling, Hop, PipelineDef, PipelineSettings, StepDef};
use rowflow_engine::{
    run_pipeline, EngineError, ExtensionContext, ExtensionHandler, ExtensionPointRegistry,
    HandlerError, Pipeline, PluginRegistry, StepContext, StepHandler, PIPELINE_FINISH,
    PIPELINE_START,
};
use rowflow_types::{Field, FieldType, Row, RowSchema, StepError, Value};

// ── test step handlers ──────────────────────────────────────────────

/// Emits `count` rows of `(id, name)`; `count == 0` means unbounded.
struct Injector {
    count: u64,
    emitted: u64,
}

impl StepHandler for Injector {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let schema = RowSchema::new(vec![
            Field::new("id", FieldType::Integer),
            Field::new("name", FieldType::String),
        ]);
        ctx.set_output_schema(schema);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if self.count > 0 && self.emitted >= self.count {
            return Ok(false);
        }
        let id = self.emitted as i64;
        ctx.write_row(Row::new(vec![
            Value::from(id),
            Value::from(format!("row-{id}")),
        ]))?;
        self.emitted += 1;
        Ok(true)
    }
}

/// Forwards rows unchanged, failing on a configured id.
struct FailOn {
    bad_id: Option<i64>,
}

impl StepHandler for FailOn {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.read_row() else {
            return Ok(false);
        };
        if let Some(bad) = self.bad_id {
            if row.get(0).and_then(Value::as_integer) == Some(bad) {
                let err = StepError::data_row("BAD_ID", format!("rejected id {bad}"));
                ctx.handle_row_error(row, err)?;
                return Ok(true);
            }
        }
        ctx.write_row(row)?;
        Ok(true)
    }
}

/// Counts rows into shared state; a sink with no outputs.
struct Collector {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl StepHandler for Collector {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.read_row() else {
            return Ok(false);
        };
        self.rows.lock().unwrap().push(row.clone());
        ctx.write_row(row)?;
        Ok(true)
    }
}

fn step(name: &str, type_id: &str) -> StepDef {
    StepDef {
        name: name.to_string(),
        type_id: type_id.to_string(),
        copies: 1,
        config: serde_json::Value::Null,
        error_handling: None,
    }
}

fn hop(from: &str, to: &str) -> Hop {
    Hop {
        from: from.to_string(),
        to: to.to_string(),
    }
}

fn chain_def(steps: Vec<StepDef>) -> PipelineDef {
    let hops = steps
        .windows(2)
        .map(|w| hop(&w[0].name, &w[1].name))
        .collect();
    PipelineDef {
        name: "test".to_string(),
        settings: PipelineSettings::default(),
        steps,
        hops,
    }
}

fn registry(count: u64, bad_id: Option<i64>, sink: Arc<Mutex<Vec<Row>>>) -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    registry.register_step(
        "injector",
        Arc::new(move |_: &serde_json::Value| {
            Ok(Box::new(Injector { count, emitted: 0 }) as Box<dyn StepHandler>)
        }),
    );
    registry.register_step(
        "fail-on",
        Arc::new(move |_: &serde_json::Value| {
            Ok(Box::new(FailOn { bad_id }) as Box<dyn StepHandler>)
        }),
    );
    let main_sink = sink;
    registry.register_step(
        "collector",
        Arc::new(move |_: &serde_json::Value| {
            Ok(Box::new(Collector {
                rows: Arc::clone(&main_sink),
            }) as Box<dyn StepHandler>)
        }),
    );
    registry
}

// ── scenarios ───────────────────────────────────────────────────────

#[test]
fn test_hundred_rows_flow_through_chain() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let def = chain_def(vec![
        step("gen", "injector"),
        step("pass", "fail-on"),
        step("sink", "collector"),
    ]);
    let result = run_pipeline(def, registry(100, None, Arc::clone(&collected)), None).unwrap();

    assert!(result.success());
    assert_eq!(result.rows_written, 100);
    assert_eq!(result.rows_read, 100);
    assert_eq!(result.rows_rejected, 0);
    assert!(!result.stopped);
    assert_eq!(collected.lock().unwrap().len(), 100);
    // row order survives a single-copy chain
    let rows = collected.lock().unwrap();
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.get(0).and_then(Value::as_integer), Some(i as i64));
    }
}

#[test]
fn test_row_error_without_redirect_fails_run() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let def = chain_def(vec![
        step("gen", "injector"),
        step("filter", "fail-on"),
        step("sink", "collector"),
    ]);
    let result = run_pipeline(def, registry(100, Some(50), Arc::clone(&collected)), None).unwrap();

    assert!(!result.success());
    assert!(result.errors >= 1);
    assert!(result.first_error.as_deref().unwrap().contains("filter"));
    assert!(result.first_error.as_deref().unwrap().contains("BAD_ID"));
    assert!(collected.lock().unwrap().len() < 100);
}

#[test]
fn test_row_error_with_redirect_continues_run() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let errored = Arc::new(Mutex::new(Vec::new()));

    let mut filter = step("filter", "fail-on");
    filter.error_handling = Some(ErrorHandling {
        target: "bad_rows".to_string(),
        code_field: "error_code".to_string(),
        message_field: "error_message".to_string(),
    });
    let def = PipelineDef {
        name: "redirect".to_string(),
        settings: PipelineSettings::default(),
        steps: vec![
            step("gen", "injector"),
            filter,
            step("sink", "collector"),
            step("bad_rows", "error-collector"),
        ],
        hops: vec![hop("gen", "filter"), hop("filter", "sink")],
    };

    let registry = registry(100, Some(50), Arc::clone(&collected));
    let error_sink = Arc::clone(&errored);
    registry.register_step(
        "error-collector",
        Arc::new(move |_: &serde_json::Value| {
            Ok(Box::new(Collector {
                rows: Arc::clone(&error_sink),
            }) as Box<dyn StepHandler>)
        }),
    );

    let result = run_pipeline(def, registry, None).unwrap();

    assert!(result.success(), "redirected rows are not errors");
    assert_eq!(result.rows_rejected, 1);
    assert_eq!(collected.lock().unwrap().len(), 99);
    let bad = errored.lock().unwrap();
    assert_eq!(bad.len(), 1);
    // original two fields plus appended code and message
    assert_eq!(bad[0].len(), 4);
    assert_eq!(
        bad[0].get(2).and_then(Value::as_str),
        Some("BAD_ID")
    );
}

#[test]
fn test_stop_all_unblocks_unbounded_source() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let def = chain_def(vec![step("gen", "injector"), step("sink", "collector")]);
    let mut pipeline = Pipeline::new(def, registry(0, None, collected));
    pipeline.prepare().unwrap();
    pipeline.start().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    pipeline.stop_all();
    let result = pipeline.wait_until_finished().unwrap();

    assert!(result.stopped);
    assert!(result.success());
}

#[test]
fn test_safe_stop_drains_rows_in_flight() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let def = PipelineDef {
        name: "drain".to_string(),
        settings: PipelineSettings { queue_capacity: 16 },
        steps: vec![step("gen", "injector"), step("sink", "collector")],
        hops: vec![hop("gen", "sink")],
    };
    let mut pipeline = Pipeline::new(def, registry(0, None, Arc::clone(&collected)));
    pipeline.prepare().unwrap();
    pipeline.start().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    pipeline.safe_stop();
    let result = pipeline.wait_until_finished().unwrap();

    assert!(result.stopped);
    assert!(result.success());
    let source_written: u64 = result
        .steps
        .iter()
        .filter(|s| s.step == "gen")
        .map(|s| s.counters.written)
        .sum();
    // everything the source emitted before stopping reaches the sink
    assert_eq!(result.rows_read, source_written);
    assert_eq!(collected.lock().unwrap().len() as u64, source_written);
}

#[test]
fn test_parallel_copies_preserve_row_set() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let mut pass = step("pass", "fail-on");
    pass.copies = 4;
    let def = chain_def(vec![
        step("gen", "injector"),
        pass,
        step("sink", "collector"),
    ]);
    let result = run_pipeline(def, registry(200, None, Arc::clone(&collected)), None).unwrap();

    assert!(result.success());
    assert_eq!(result.rows_written, 200);
    let mut ids: Vec<i64> = collected
        .lock()
        .unwrap()
        .iter()
        .filter_map(|r| r.get(0).and_then(Value::as_integer))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..200).collect::<Vec<i64>>());
}

#[test]
fn test_extension_points_fire_around_run() {
    struct Observing {
        events: Arc<Mutex<Vec<String>>>,
        finish_written: Arc<AtomicU64>,
    }
    impl ExtensionHandler for Observing {
        fn handle(&self, ctx: &ExtensionContext<'_>) -> Result<(), HandlerError> {
            match ctx {
                ExtensionContext::PipelineStart { pipeline } => {
                    self.events.lock().unwrap().push(format!("start:{pipeline}"));
                }
                ExtensionContext::PipelineFinish { pipeline, result } => {
                    self.events.lock().unwrap().push(format!("finish:{pipeline}"));
                    self.finish_written.store(result.rows_written, Ordering::SeqCst);
                }
                ExtensionContext::Custom { .. } => {}
            }
            Ok(())
        }
    }

    let collected = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let finish_written = Arc::new(AtomicU64::new(0));

    let registry = registry(10, None, collected);
    let handler_events = Arc::clone(&events);
    let handler_written = Arc::clone(&finish_written);
    registry.register_extension(
        "observer",
        PIPELINE_START,
        Arc::new(move || {
            Ok(Arc::new(Observing {
                events: Arc::clone(&handler_events),
                finish_written: Arc::clone(&handler_written),
            }) as Arc<dyn ExtensionHandler>)
        }),
    );
    let finish_events = Arc::clone(&events);
    let finish_counter = Arc::clone(&finish_written);
    registry.register_extension(
        "observer-finish",
        PIPELINE_FINISH,
        Arc::new(move || {
            Ok(Arc::new(Observing {
                events: Arc::clone(&finish_events),
                finish_written: Arc::clone(&finish_counter),
            }) as Arc<dyn ExtensionHandler>)
        }),
    );
    let extensions = ExtensionPointRegistry::attach(Arc::clone(&registry));

    let def = chain_def(vec![step("gen", "injector"), step("sink", "collector")]);
    let result = run_pipeline(def, registry, Some(extensions)).unwrap();

    assert!(result.success());
    assert_eq!(
        *events.lock().unwrap(),
        vec!["start:test".to_string(), "finish:test".to_string()]
    );
    assert_eq!(finish_written.load(Ordering::SeqCst), 10);
}

#[test]
fn test_start_abort_prevents_run() {
    struct Veto;
    impl ExtensionHandler for Veto {
        fn handle(&self, _ctx: &ExtensionContext<'_>) -> Result<(), HandlerError> {
            Err(HandlerError::Abort("not tonight".to_string()))
        }
    }

    let collected = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(10, None, Arc::clone(&collected));
    registry.register_extension(
        "veto",
        PIPELINE_START,
        Arc::new(|| Ok(Arc::new(Veto) as Arc<dyn ExtensionHandler>)),
    );
    let extensions = ExtensionPointRegistry::attach(Arc::clone(&registry));

    let def = chain_def(vec![step("gen", "injector"), step("sink", "collector")]);
    let err = run_pipeline(def, registry, Some(extensions)).unwrap_err();

    assert!(matches!(err, EngineError::ExtensionAbort { .. }));
    assert!(collected.lock().unwrap().is_empty());
}

#[test]
fn test_yaml_definition_runs_end_to_end() {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let yaml = r#"
name: from_yaml
settings:
  queue_capacity: 64
steps:
  - name: gen
    type: injector
  - name: sink
    type: collector
hops:
  - from: gen
    to: sink
"#;
    let def = parse_pipeline_str(yaml).unwrap();
    let result = run_pipeline(def, registry(25, None, Arc::clone(&collected)), None).unwrap();

    assert!(result.success());
    assert_eq!(result.rows_written, 25);
    assert_eq!(collected.lock().unwrap().len(), 25);
}
