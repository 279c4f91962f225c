pub mod init;
pub mod plan;
pub mod simulate;
pub mod status;
pub mod synth;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use lightwatch_core::{DirectoryResolver, LightwatchConfig};
use lightwatch_graph::{Assembler, ResourceGraph};
use lightwatch_state::StateStore;

/// File name of the state store inside `--data-dir`.
pub const STATE_FILE: &str = "state.redb";

/// Load the config and assemble one template against the module root
/// next to it.
pub fn assemble(config_path: &Path, template: &str) -> anyhow::Result<(LightwatchConfig, ResourceGraph)> {
    let config = LightwatchConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let resolver = DirectoryResolver::relative_to(config_dir, &config.stack.module_root);
    let graph = Assembler::assemble(&config, template, &resolver)
        .with_context(|| format!("assembling template `{template}`"))?;
    Ok((config, graph))
}

pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE)
}

/// Open (creating if needed) the state store under `data_dir`.
pub fn open_state(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    let path = state_path(data_dir);
    StateStore::open(&path).with_context(|| format!("opening state store {}", path.display()))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::{Path, PathBuf};

    use lightwatch_core::LightwatchConfig;

    /// Write a scaffolded config plus the module directories it names.
    pub fn workspace(dir: &Path) -> PathBuf {
        let config = LightwatchConfig::scaffold("LightsStack", "home");
        for module in ["dbWriterFn", "dbInitializerFn"] {
            let module_dir = dir.join("lambda").join(module);
            std::fs::create_dir_all(&module_dir).unwrap();
            std::fs::write(module_dir.join("Dockerfile"), "FROM scratch\n").unwrap();
        }
        let path = dir.join("lightwatch.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        path
    }
}
