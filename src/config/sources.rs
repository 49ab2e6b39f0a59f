//! Configuration sources, lowest precedence first: global file, workspace
//! files, environment.

pub mod global_file;
pub mod workspace_file;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

/// `GRAPHCACHE__CACHE__AGGREGATE_CACHE=false` style overrides.
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("GRAPHCACHE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.full_cache_types"),
    )
}
