//! Drops consecutive duplicate rows. The input must be sorted on the
//! key fields for global uniqueness.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use rowflow_engine::{StepContext, StepHandler};
use rowflow_types::{StepError, Value};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
pub struct UniqueRowsConfig {
    /// Key fields compared between neighbouring rows. Empty means the
    /// whole row.
    #[serde(default)]
    pub fields: Vec<String>,
}

pub struct UniqueRows {
    config: UniqueRowsConfig,
    key_indices: Option<Vec<usize>>,
    last_key: Option<Vec<Value>>,
}

pub fn factory(config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
    let config: UniqueRowsConfig = parse_config(config)?;
    Ok(Box::new(UniqueRows {
        config,
        key_indices: None,
        last_key: None,
    }))
}

impl UniqueRows {
    fn resolve_indices(&mut self, ctx: &mut StepContext) -> Result<&[usize], StepError> {
        if self.key_indices.is_none() {
            let (indices, schema) = match ctx.input_schema() {
                Some(schema) => {
                    let mut indices = Vec::with_capacity(self.config.fields.len());
                    for name in &self.config.fields {
                        let index = schema.index_of(name).ok_or_else(|| {
                            StepError::config(
                                "UNKNOWN_FIELD",
                                format!("key field '{name}' not in input schema"),
                            )
                        })?;
                        indices.push(index);
                    }
                    (indices, Some((**schema).clone()))
                }
                None if self.config.fields.is_empty() => (Vec::new(), None),
                None => {
                    return Err(StepError::config(
                        "NO_INPUT_SCHEMA",
                        "key fields given but upstream declared no schema",
                    ))
                }
            };
            if let Some(schema) = schema {
                ctx.set_output_schema(schema);
            }
            self.key_indices = Some(indices);
        }
        Ok(self.key_indices.as_deref().unwrap_or_default())
    }
}

impl StepHandler for UniqueRows {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.read_row() else {
            return Ok(false);
        };
        let indices = self.resolve_indices(ctx)?;
        let key: Vec<Value> = if indices.is_empty() {
            row.values().to_vec()
        } else {
            indices
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect()
        };
        if self.last_key.as_ref() == Some(&key) {
            return Ok(true);
        }
        self.last_key = Some(key);
        ctx.write_row(row)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_compares_whole_row() {
        let parsed: UniqueRowsConfig = parse_config(&serde_json::Value::Null).unwrap();
        assert!(parsed.fields.is_empty());
    }

    #[test]
    fn test_config_with_key_fields() {
        let config = serde_json::json!({"fields": ["city", "zip"]});
        let parsed: UniqueRowsConfig = parse_config(&config).unwrap();
        assert_eq!(parsed.fields, vec!["city", "zip"]);
    }
}
