use std::path::Path;

use super::assemble;

pub fn synth(config_path: &Path, template: &str) -> anyhow::Result<()> {
    let (_, graph) = assemble(config_path, template)?;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}
