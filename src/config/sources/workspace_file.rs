//! Workspace config files under `<workspace>/config/`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable selecting the environment-specific file.
pub const ENV_VAR: &str = "GRAPHCACHE_ENV";

const DEFAULT_ENV: &str = "development";

/// Existing workspace files, lowest precedence first: `config.toml`,
/// `{GRAPHCACHE_ENV}.toml`, then the untracked `local.toml`.
pub fn workspace_files(workspace_root: &Path) -> Vec<PathBuf> {
    let dir = workspace_root.join("config");
    let env_name = std::env::var(ENV_VAR).unwrap_or_else(|_| DEFAULT_ENV.to_string());
    ["config".to_string(), env_name, "local".to_string()]
        .iter()
        .map(|stem| dir.join(format!("{}.toml", stem)))
        .filter(|path| path.is_file())
        .collect()
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(workspace_files(workspace_root)
        .into_iter()
        .fold(builder, |builder, path| {
            debug!(config_path = %path.display(), "Adding workspace configuration file");
            builder.add_source(File::from(path).required(true))
        }))
}
