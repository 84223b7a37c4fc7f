//! Source step emitting a fixed number of constant rows.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use rowflow_engine::{StepContext, StepHandler};
use rowflow_types::{Field, Row, RowSchema, StepError, Value};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
pub struct RowGeneratorConfig {
    /// Number of rows to emit.
    pub rows: u64,
    /// Constant fields of every generated row.
    #[serde(default)]
    pub fields: Vec<GeneratedField>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedField {
    pub name: String,
    pub value: JsonValue,
}

pub struct RowGenerator {
    config: RowGeneratorConfig,
    template: Row,
    emitted: u64,
}

pub fn factory(config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
    let config: RowGeneratorConfig = parse_config(config)?;
    Ok(Box::new(RowGenerator {
        config,
        template: Row::new(Vec::new()),
        emitted: 0,
    }))
}

fn to_value(json: &JsonValue) -> Result<Value, StepError> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Number(f))
            } else {
                Err(StepError::config(
                    "BAD_FIELD_VALUE",
                    format!("unrepresentable number {n}"),
                ))
            }
        }
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        other => Err(StepError::config(
            "BAD_FIELD_VALUE",
            format!("field values must be scalars, got {other}"),
        )),
    }
}

impl StepHandler for RowGenerator {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let mut fields = Vec::with_capacity(self.config.fields.len());
        let mut values = Vec::with_capacity(self.config.fields.len());
        for gen in &self.config.fields {
            let value = to_value(&gen.value)?;
            fields.push(Field::new(gen.name.clone(), value.field_type()));
            values.push(value);
        }
        self.template = Row::new(values);
        ctx.set_output_schema(RowSchema::new(fields));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if self.emitted >= self.config.rows {
            return Ok(false);
        }
        ctx.write_row(self.template.clone())?;
        self.emitted += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_scalar_fields() {
        let config = serde_json::json!({
            "rows": 3,
            "fields": [
                {"name": "city", "value": "Orlando"},
                {"name": "code", "value": 7},
                {"name": "active", "value": true}
            ]
        });
        let parsed: RowGeneratorConfig = parse_config(&config).unwrap();
        assert_eq!(parsed.rows, 3);
        assert_eq!(parsed.fields.len(), 3);
        assert_eq!(to_value(&parsed.fields[1].value).unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_non_scalar_field_value_rejected() {
        let err = to_value(&serde_json::json!(["a", "b"])).unwrap_err();
        assert_eq!(err.code.0, "BAD_FIELD_VALUE");
    }
}
