//! Process configuration.
//!
//! Loaded once at startup from an optional file plus environment overrides,
//! then handed to the gateway by value.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, discover_and_load, load, load_config},
    schema::{
        DemoConfig, HermesConfig, LimitsConfig, PlatformConfig, PlatformKind, ServerConfig,
        StatusConfig,
    },
};
