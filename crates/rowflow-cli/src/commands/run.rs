use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use rowflow_engine::config::{parser, validator};
use rowflow_engine::{run_pipeline, ExtensionPointRegistry, PluginRegistry};
use rowflow_steps::register_builtins;

/// Execute the `run` command: parse, validate, and run a pipeline.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    // 1. Parse pipeline YAML
    let def = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&def)?;

    tracing::info!(
        pipeline = def.name,
        steps = def.steps.len(),
        hops = def.hops.len(),
        "Pipeline validated"
    );

    // 3. Run with the built-in step types
    let registry = Arc::new(PluginRegistry::new());
    register_builtins(&registry);
    let extensions = ExtensionPointRegistry::attach(Arc::clone(&registry));
    let name = def.name.clone();
    let result = run_pipeline(def, registry, Some(extensions))?;

    if result.success() {
        if result.stopped {
            println!("Pipeline '{name}' stopped.");
        } else {
            println!("Pipeline '{name}' completed successfully.");
        }
    } else {
        println!("Pipeline '{name}' failed.");
    }
    println!("  Rows read:     {}", result.rows_read);
    println!("  Rows written:  {}", result.rows_written);
    if result.rows_rejected > 0 {
        println!("  Rows rejected: {}", result.rows_rejected);
    }
    println!("  Errors:        {}", result.errors);
    println!("  Duration:      {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        println!(
            "  Throughput:    {:.0} rows/sec",
            result.rows_written as f64 / result.duration_secs
        );
    }
    if let Some(err) = &result.first_error {
        println!("  First error:   {err}");
    }
    for file in &result.files {
        println!("  File:          {} ({})", file.path.display(), file.kind);
    }

    // Machine-readable JSON for scripting
    let json = serde_json::json!({
        "pipeline": name,
        "rows_read": result.rows_read,
        "rows_written": result.rows_written,
        "rows_rejected": result.rows_rejected,
        "errors": result.errors,
        "stopped": result.stopped,
        "duration_secs": result.duration_secs,
    });
    println!("@@RESULT_JSON@@{json}");

    if !result.success() {
        bail!("pipeline '{name}' finished with {} error(s)", result.errors);
    }
    Ok(())
}
