//! Sink step writing rows to a delimited text file.

use std::fs::File;
use std::io::{BufWriter, Write};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use rowflow_engine::{StepContext, StepHandler};
use rowflow_types::{Row, StepError};

use crate::parse_config;

#[derive(Debug, Default, Deserialize)]
pub struct TextFileOutputConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Write a header line with the field names from the input schema.
    #[serde(default)]
    pub header: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

pub struct TextFileOutput {
    config: TextFileOutputConfig,
    writer: Option<BufWriter<File>>,
    header_written: bool,
}

pub fn factory(config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
    let config: TextFileOutputConfig = parse_config(config)?;
    if config.path.is_empty() {
        return Err(StepError::config("MISSING_PATH", "'path' must be set"));
    }
    Ok(Box::new(TextFileOutput {
        config,
        writer: None,
        header_written: false,
    }))
}

impl TextFileOutput {
    fn format_line(&self, row: &Row) -> String {
        let cells: Vec<String> = row.values().iter().map(ToString::to_string).collect();
        cells.join(&self.config.delimiter)
    }
}

impl StepHandler for TextFileOutput {
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        let file = File::create(&self.config.path).map_err(|e| {
            StepError::resource(
                "FILE_CREATE_FAILED",
                format!("cannot create '{}': {e}", self.config.path),
            )
        })?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.read_row() else {
            return Ok(false);
        };
        if self.config.header && !self.header_written {
            if let Some(schema) = ctx.input_schema() {
                let names: Vec<&str> = (0..schema.len())
                    .filter_map(|i| schema.field(i).map(|f| f.name.as_str()))
                    .collect();
                let header = names.join(&self.config.delimiter);
                if let Some(writer) = self.writer.as_mut() {
                    writeln!(writer, "{header}").map_err(write_failed)?;
                }
            }
            self.header_written = true;
        }
        let line = self.format_line(&row);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StepError::internal("NOT_INITIALIZED", "writer missing"))?;
        writeln!(writer, "{line}").map_err(write_failed)?;
        ctx.write_row(row)?;
        Ok(true)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = self.config.path, error = %e, "Flush failed");
            }
            ctx.add_result_file(self.config.path.clone(), "text");
        }
    }
}

fn write_failed(e: std::io::Error) -> StepError {
    StepError::resource("FILE_WRITE_FAILED", format!("write failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_missing_path() {
        let err = factory(&serde_json::json!({})).err().unwrap();
        assert_eq!(err.code.0, "MISSING_PATH");
    }

    #[test]
    fn test_delimiter_defaults_to_comma() {
        let config: TextFileOutputConfig =
            parse_config(&serde_json::json!({"path": "/tmp/x.txt"})).unwrap();
        assert_eq!(config.delimiter, ",");
        assert!(!config.header);
    }
}
