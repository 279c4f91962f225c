use std::path::Path;

use lightwatch_core::LightwatchConfig;

pub fn init(config_path: &Path, stack: &str, template: &str, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    let config = LightwatchConfig::scaffold(stack, template);
    config.validate()?;
    std::fs::write(config_path, config.to_toml_string()?)?;

    println!("✓ Wrote {}", config_path.display());
    println!("  Stack:    {stack}");
    println!("  Template: {template}");
    println!(
        "  Modules:  expected under {}/",
        config.stack.module_root.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn writes_a_loadable_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lightwatch.toml");
        init(&path, "LightsStack", "home", false).unwrap();

        let config = LightwatchConfig::from_file(&path).unwrap();
        assert_eq!(config.stack.name, "LightsStack");
        assert_eq!(config.template("home").unwrap().writer_module(), Some("dbWriterFn"));
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lightwatch.toml");
        std::fs::write(&path, "# hand edited\n").unwrap();

        assert!(init(&path, "LightsStack", "home", false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hand edited\n");

        init(&path, "LightsStack", "home", true).unwrap();
        assert!(LightwatchConfig::from_file(&path).is_ok());
    }
}
