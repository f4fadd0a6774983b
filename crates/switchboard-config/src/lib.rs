//! # Switchboard Configuration
//!
//! Pool limits, timeouts and logging settings, loaded from YAML, TOML or
//! JSON with `${VAR}` expansion and `SWITCHBOARD_POOL_*` overrides, then
//! validated before the pool is built.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod builder;
pub mod loader;
pub mod types;
pub mod validator;

pub use builder::ConfigBuilder;
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, load_config, load_from_file, load_from_str,
    ConfigFormat, ENV_PREFIX,
};
pub use types::{Config, LoggingConfig, ObservabilityConfig, PoolConfig};
pub use validator::validate_config;
