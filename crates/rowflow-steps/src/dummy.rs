//! Pass-through step. Useful as a join point for multiple hops and as
//! a placeholder during pipeline development.

use serde_json::Value as JsonValue;

use rowflow_engine::{StepContext, StepHandler};
use rowflow_types::StepError;

#[derive(Default)]
pub struct Dummy {
    schema_forwarded: bool,
}

pub fn factory(_config: &JsonValue) -> Result<Box<dyn StepHandler>, StepError> {
    Ok(Box::new(Dummy::default()))
}

impl StepHandler for Dummy {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.read_row() else {
            return Ok(false);
        };
        if !self.schema_forwarded {
            if let Some(schema) = ctx.input_schema() {
                let schema = (**schema).clone();
                ctx.set_output_schema(schema);
            }
            self.schema_forwarded = true;
        }
        ctx.write_row(row)?;
        Ok(true)
    }
}
