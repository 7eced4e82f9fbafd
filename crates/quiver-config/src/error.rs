//! Errors raised while reading, writing or validating config.

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Everything that can go wrong between a TOML file and a [`crate::QuiverConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config could not be rendered as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed fine but describes something unusable (duplicate ids, missing url).
    #[error("invalid config: {0}")]
    Invalid(String),
}
