//! Configuration file management for scribe.
//!
//! Provides a TOML-based config file at `~/.config/scribe/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use scribe_core::pipeline::PipelineConfig;
use scribe_core::refine::RefinementConfig;
use scribe_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub refinement: RefinementSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

/// Loop and fan-out limits. Missing keys take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSection {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub max_concurrency: usize,
}

impl Default for RefinementSection {
    fn default() -> Self {
        let refinement = RefinementConfig::default();
        Self {
            quality_threshold: refinement.quality_threshold,
            max_iterations: refinement.max_iterations,
            max_concurrency: PipelineConfig::default().max_concurrency,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the scribe config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/scribe` or `~/.config/scribe`,
/// also on macOS.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("scribe");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("scribe")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_config(&contents)
}

fn parse_config(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("failed to parse config file")
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file holds a database URL, possibly with a password, so it is
/// written 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ScribeConfig {
    pub db_config: DbConfig,
    pub refinement: RefinementConfig,
    pub pipeline: PipelineConfig,
}

impl ScribeConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `SCRIBE_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Refinement limits: `config_file.refinement` > defaults
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = match load_config() {
            Ok(cfg) => Some(cfg),
            Err(_) if !config_path().exists() => None,
            // A config file that exists but does not parse is a user error.
            Err(e) => return Err(e),
        };
        Ok(Self::from_sources(cli_db_url, file_config.as_ref()))
    }

    fn from_sources(cli_db_url: Option<&str>, file_config: Option<&ConfigFile>) -> Self {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let limits = file_config.map(|c| c.refinement).unwrap_or_default();
        Self {
            db_config: DbConfig::new(db_url),
            refinement: RefinementConfig {
                quality_threshold: limits.quality_threshold,
                max_iterations: limits.max_iterations,
            },
            pipeline: PipelineConfig {
                max_concurrency: limits.max_concurrency.max(1),
            },
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
