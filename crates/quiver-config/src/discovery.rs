//! Finding config files and folding them into one [`QuiverConfig`].
//!
//! Two layers are read, lowest precedence first:
//! 1. the user layer, `config.toml` in `QUIVER_CONFIG_DIR` or the platform
//!    config dir (`~/.config/quiver` on Linux)
//! 2. the project layer, `quiver.toml` in the project dir or the working
//!    directory
//!
//! Command-line flags sit above both and are applied by the binary.

use std::path::{Path, PathBuf};

use crate::{ConfigError, QuiverConfig, Result};

const PROJECT_FILE: &str = "quiver.toml";
const USER_FILE: &str = "config.toml";
const APP_DIR: &str = "quiver";
const CONFIG_DIR_VAR: &str = "QUIVER_CONFIG_DIR";

/// Which layer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
}

/// One candidate file and whether it contributed.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub loaded: bool,
}

/// The merged config plus a record of how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: QuiverConfig,
    /// Every candidate, in merge order.
    pub sources: Vec<ConfigSource>,
    /// One line per layer that existed but could not be used.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Files that actually contributed, in merge order.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter_map(|s| s.loaded.then_some(s.path.as_path()))
            .collect()
    }
}

/// Discover and merge both layers using the default user directory.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Discover and merge both layers.
///
/// `config_dir` replaces the user directory lookup entirely. A layer that
/// exists but cannot be read or parsed is skipped with a warning; the merged
/// result must still pass [`QuiverConfig::validate`].
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user_file = config_dir
        .map(|dir| dir.join(USER_FILE))
        .or_else(xdg_config_path);
    let project_file = project_dir.unwrap_or(Path::new(".")).join(PROJECT_FILE);

    let candidates = user_file
        .map(|path| (Layer::User, path))
        .into_iter()
        .chain(std::iter::once((Layer::Project, project_file)));

    let mut loaded = LoadedConfig {
        config: QuiverConfig::new(),
        sources: Vec::new(),
        warnings: Vec::new(),
    };
    for (layer, path) in candidates {
        let contributed = path.is_file() && apply_layer(&mut loaded, &path);
        loaded.sources.push(ConfigSource {
            layer,
            path,
            loaded: contributed,
        });
    }

    loaded.config.validate()?;
    Ok(loaded)
}

fn apply_layer(loaded: &mut LoadedConfig, path: &Path) -> bool {
    match load_config_file(path) {
        Ok(layer) => {
            loaded.config.merge(layer);
            true
        }
        Err(e) => {
            loaded
                .warnings
                .push(format!("skipping {}: {}", path.display(), e));
            false
        }
    }
}

/// Read and parse one file, without validation or merging.
pub fn load_config_file(path: &Path) -> Result<QuiverConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    QuiverConfig::from_toml(&text)
}

/// Write `config` to `path`, creating missing parent directories.
pub fn save_config(config: &QuiverConfig, path: &Path) -> Result<()> {
    let write_err = |at: &Path, source| ConfigError::WriteFile {
        path: at.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(|e| write_err(path, e))
}

/// The user layer's file.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|dir| dir.join(USER_FILE))
}

/// The user config directory: `QUIVER_CONFIG_DIR` when set and non-empty,
/// otherwise `quiver` under the platform config dir.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_VAR) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|base| base.join(APP_DIR)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
