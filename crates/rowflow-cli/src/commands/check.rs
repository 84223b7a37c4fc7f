use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::config::{parser, validator};
use rowflow_engine::graph::sink_steps;

/// Execute the `check` command: parse and validate without running.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    let def = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validator::validate_pipeline(&def)?;

    let copies: u32 = def.steps.iter().map(|s| s.copies).sum();
    let sinks = sink_steps(&def);
    println!("Pipeline '{}' is valid.", def.name);
    println!("  Steps:          {} ({} copies)", def.steps.len(), copies);
    println!("  Hops:           {}", def.hops.len());
    println!("  Queue capacity: {}", def.settings.queue_capacity);
    for step in &def.steps {
        let role = if sinks.contains(&step.name) { "sink" } else { "" };
        println!("    {:<20} {:<20} x{} {}", step.name, step.type_id, step.copies, role);
    }
    Ok(())
}
