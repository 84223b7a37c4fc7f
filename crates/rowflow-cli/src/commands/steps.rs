use anyhow::Result;

use rowflow_engine::PluginRegistry;
use rowflow_steps::register_builtins;

/// Execute the `steps` command: list every registered step type.
pub fn execute() -> Result<()> {
    let registry = PluginRegistry::new();
    register_builtins(&registry);

    println!("Available step types:");
    for id in registry.step_ids() {
        println!("  {id}");
    }
    Ok(())
}
