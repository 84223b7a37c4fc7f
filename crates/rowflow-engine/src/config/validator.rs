//! Semantic validation for parsed pipeline definitions.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::PipelineDef;
use crate::graph::find_cycle;

/// Validate a parsed pipeline definition.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the
/// definition.
pub fn validate_pipeline(def: &PipelineDef) -> Result<()> {
    let mut errors = Vec::new();

    if def.name.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if def.steps.is_empty() {
        errors.push("Pipeline must define at least one step".to_string());
    }

    if def.settings.queue_capacity == 0 {
        errors.push("queue_capacity must be at least 1".to_string());
    }

    let mut names = HashSet::new();
    for (i, step) in def.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            errors.push(format!("Step {i} has an empty name"));
        }
        if !names.insert(step.name.as_str()) {
            errors.push(format!("Duplicate step name '{}'", step.name));
        }
        if step.type_id.trim().is_empty() {
            errors.push(format!("Step '{}' has an empty type", step.name));
        }
        if step.copies == 0 {
            errors.push(format!("Step '{}': copies must be at least 1", step.name));
        }
    }

    for (i, hop) in def.hops.iter().enumerate() {
        if !names.contains(hop.from.as_str()) {
            errors.push(format!("Hop {i}: unknown source step '{}'", hop.from));
        }
        if !names.contains(hop.to.as_str()) {
            errors.push(format!("Hop {i}: unknown target step '{}'", hop.to));
        }
        if hop.from == hop.to {
            errors.push(format!("Hop {i}: step '{}' cannot hop to itself", hop.from));
        }
    }

    for step in &def.steps {
        if let Some(eh) = &step.error_handling {
            if !names.contains(eh.target.as_str()) {
                errors.push(format!(
                    "Step '{}': unknown error handling target '{}'",
                    step.name, eh.target
                ));
            }
            if eh.target == step.name {
                errors.push(format!(
                    "Step '{}' cannot be its own error handling target",
                    step.name
                ));
            }
        }
    }

    // only meaningful once every hop endpoint resolves
    if errors.is_empty() {
        if let Some(cycle) = find_cycle(def) {
            errors.push(format!("Pipeline contains a cycle: {}", cycle.join(" -> ")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}
