//! Merge rules: built-in defaults that every later source overrides.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("storage.backend", "sled")?
        .set_default("storage.temporary", false)?
        .set_default("cache.aggregate_cache", true)?
        .set_default("cache.full_cache_types", Vec::<String>::new())?
        .set_default("cache.broadcast_capacity", 256)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
