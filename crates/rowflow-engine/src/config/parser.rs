//! Loads pipeline definitions from YAML.
//!
//! Definitions may reference `${VAR}` environment variables anywhere in
//! the document, typically for output paths and credentials inside step
//! `config` blocks. References are expanded before the YAML is parsed,
//! so a variable can hold any scalar the schema accepts.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::types::PipelineDef;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand every `${VAR}` reference in a definition document.
///
/// All undefined variables are collected before failing, so one edit
/// fixes the whole list.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut undefined = Vec::new();
    let expanded = ENV_VAR_RE.replace_all(input, |caps: &Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            let name = caps[1].to_string();
            if !undefined.contains(&name) {
                undefined.push(name);
            }
            String::new()
        })
    });

    if !undefined.is_empty() {
        anyhow::bail!(
            "undefined environment variable(s) in pipeline definition: {}",
            undefined.join(", ")
        );
    }

    Ok(expanded.into_owned())
}

/// Parse a pipeline definition from a YAML string, expanding `${VAR}`
/// references first.
///
/// # Errors
///
/// Fails when a referenced environment variable is unset or the YAML
/// does not match the definition schema.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineDef> {
    let expanded = substitute_env_vars(yaml_str)?;
    let def: PipelineDef =
        serde_yaml::from_str(&expanded).context("invalid pipeline definition YAML")?;
    Ok(def)
}

/// Read and parse a pipeline definition file.
///
/// # Errors
///
/// Fails when the file cannot be read, a referenced environment
/// variable is unset, or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineDef> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read pipeline file {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vars_expand_into_step_config() {
        std::env::set_var("RF_REPORT_DIR", "/var/reports");
        std::env::set_var("RF_SEP", ";");
        let yaml = "\
name: nightly_export
steps:
  - name: write
    type: text-file-output
    config:
      path: ${RF_REPORT_DIR}/rows.txt
      delimiter: \"${RF_SEP}\"
";
        let def = parse_pipeline_str(yaml).unwrap();
        assert_eq!(def.steps[0].config["path"], "/var/reports/rows.txt");
        assert_eq!(def.steps[0].config["delimiter"], ";");
        std::env::remove_var("RF_REPORT_DIR");
        std::env::remove_var("RF_SEP");
    }

    #[test]
    fn test_definition_without_references_is_untouched() {
        let yaml = "name: plain\nsteps: []";
        assert_eq!(substitute_env_vars(yaml).unwrap(), yaml);
    }

    #[test]
    fn test_undefined_variables_all_named_once() {
        let yaml = "a: ${RF_NOT_SET_ONE}\nb: ${RF_NOT_SET_TWO}\nc: ${RF_NOT_SET_ONE}";
        let err = substitute_env_vars(yaml).unwrap_err().to_string();
        assert!(err.contains("RF_NOT_SET_ONE"));
        assert!(err.contains("RF_NOT_SET_TWO"));
        assert_eq!(err.matches("RF_NOT_SET_ONE").count(), 1);
    }

    #[test]
    fn test_parse_full_definition_with_hops() {
        let yaml = "\
name: copy_rows
settings:
  queue_capacity: 512
steps:
  - name: generate
    type: row-generator
    copies: 2
    config:
      rows: 5
  - name: sink
    type: dummy
hops:
  - from: generate
    to: sink
";
        let def = parse_pipeline_str(yaml).unwrap();
        assert_eq!(def.name, "copy_rows");
        assert_eq!(def.settings.queue_capacity, 512);
        assert_eq!(def.steps[0].copies, 2);
        assert_eq!(def.hops[0].from, "generate");
        assert_eq!(def.hops[0].to, "sink");
    }

    #[test]
    fn test_malformed_yaml_is_rejected() {
        let err = parse_pipeline_str("steps: [name: {{{").unwrap_err();
        assert!(err.to_string().contains("invalid pipeline definition"));
    }

    #[test]
    fn test_missing_file_error_names_path() {
        let err = parse_pipeline(Path::new("/no/such/pipeline.yaml")).unwrap_err();
        assert!(err.to_string().contains("/no/such/pipeline.yaml"));
    }
}
