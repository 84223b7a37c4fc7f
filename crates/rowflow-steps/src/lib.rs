//! Built-in step types.
//!
//! Each module holds one step handler plus the serde struct for its
//! `config` block. [`register_builtins`] puts all of them into a
//! plugin registry under their canonical type ids.

use std::sync::Arc;

use rowflow_engine::PluginRegistry;

pub mod dummy;
pub mod row_generator;
pub mod string_replace;
pub mod text_file_output;
pub mod unique_rows;

/// Register every built-in step type.
pub fn register_builtins(registry: &PluginRegistry) {
    registry.register_step("row-generator", Arc::new(row_generator::factory));
    registry.register_step("dummy", Arc::new(dummy::factory));
    registry.register_step("string-replace", Arc::new(string_replace::factory));
    registry.register_step("unique-rows", Arc::new(unique_rows::factory));
    registry.register_step("text-file-output", Arc::new(text_file_output::factory));
}

pub(crate) fn parse_config<T: serde::de::DeserializeOwned + Default>(
    config: &serde_json::Value,
) -> Result<T, rowflow_types::StepError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| {
        rowflow_types::StepError::config("INVALID_CONFIG", format!("bad step config: {e}"))
    })
}
