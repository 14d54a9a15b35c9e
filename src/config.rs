use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::format::MediaFamily;

/// Top-level configuration for the file pipeline.
///
/// Controls which container formats receive provenance metadata and how results are written.
/// The embedding engine itself ([`crate::pipeline::embed`]) takes no configuration.
///
/// # Loading
///
/// ```rust,no_run
/// use provenance_embed::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.formats.webp = false;
/// config.output.output_dir = Some("tagged".into());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-format switches.
    pub formats: FormatToggles,
    /// Output behavior (dry run, backups, destination).
    pub output: OutputConfig,
}

/// Which container formats to embed into. All enabled by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatToggles {
    pub jpeg: bool,
    pub png: bool,
    pub webp: bool,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, report what would be written without modifying any files.
    pub dry_run: bool,
    /// If `true`, create a `.bak` backup before modifying an image in place.
    pub backup_originals: bool,
    /// Write results into this directory instead of overwriting the input.
    pub output_dir: Option<String>,
}

impl Default for FormatToggles {
    fn default() -> Self {
        Self {
            jpeg: true,
            png: true,
            webp: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup_originals: true,
            output_dir: None,
        }
    }
}

impl FormatToggles {
    pub fn is_enabled(&self, family: MediaFamily) -> bool {
        match family {
            MediaFamily::Jpeg => self.jpeg,
            MediaFamily::Png => self.png,
            MediaFamily::WebP => self.webp,
        }
    }

    /// Names of the enabled formats, in a fixed order.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        [
            (self.jpeg, "jpeg"),
            (self.png, "png"),
            (self.webp, "webp"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

impl Config {
    /// Resolve the config file path, in the same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
