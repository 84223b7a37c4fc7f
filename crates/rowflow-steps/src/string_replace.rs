//! Replaces occurrences of a substring within one string field.
//!
//! Rows whose target field holds a non-string, non-null value produce a
//! row-scoped error: redirected when the step has error handling
//! configured, fatal otherwise.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use rowflow_engine::{StepContext, StepHandler};
use rowflow_types::{StepError, Value};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
pub struct StringReplaceConfig {
    /// Field to rewrite, by name.
    #[serde(default)]
    pub field: String,
    pub search: String,
    pub replace: String,
}

pub struct StringReplace {
    config: StringReplaceConfig,
    /// Resolved on the first row, once the input schema is known.
    field_index: Option<usize>,
}

pub fn factory(config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
    let config: StringReplaceConfig = parse_config(config)?;
    if config.field.is_empty() {
        return Err(StepError::config("MISSING_FIELD", "'field' must be set"));
    }
    Ok(Box::new(StringReplace {
        config,
        field_index: None,
    }))
}

impl StringReplace {
    fn resolve_index(&mut self, ctx: &mut StepContext) -> Result<usize, StepError> {
        if let Some(index) = self.field_index {
            return Ok(index);
        }
        let schema = ctx.input_schema().ok_or_else(|| {
            StepError::config(
                "NO_INPUT_SCHEMA",
                "upstream step did not declare an output schema",
            )
        })?;
        let index = schema.index_of(&self.config.field).ok_or_else(|| {
            StepError::config(
                "UNKNOWN_FIELD",
                format!("field '{}' not in input schema", self.config.field),
            )
        })?;
        let schema = (**schema).clone();
        ctx.set_output_schema(schema);
        self.field_index = Some(index);
        Ok(index)
    }
}

impl StepHandler for StringReplace {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(mut row) = ctx.read_row() else {
            return Ok(false);
        };
        let index = self.resolve_index(ctx)?;
        match row.get(index) {
            Some(Value::String(s)) => {
                let replaced = s.replace(&self.config.search, &self.config.replace);
                row.set(index, Value::String(replaced));
                ctx.write_row(row)?;
            }
            Some(Value::Null) | None => {
                ctx.write_row(row)?;
            }
            Some(other) => {
                let err = StepError::data_row(
                    "NOT_A_STRING",
                    format!(
                        "field '{}' is {:?}, expected string",
                        self.config.field,
                        other.field_type()
                    ),
                );
                ctx.handle_row_error(row, err)?;
            }
        }
        Ok(true)
    }
}
