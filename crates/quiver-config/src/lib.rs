//! Configuration system for Quiver.
//!
//! Provides TOML-based configuration with:
//! - Tool server entries (`[[servers]]`) for every supported transport
//! - Pool and session tunables (`[pool]`)
//! - Config file layering (XDG user config + project-local overrides)
//!
//! The core client never reads files; the binary turns these types into
//! descriptors and settings.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, Layer, LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
