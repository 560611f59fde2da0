//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/reportforge/config.toml)
//! 3. Project config (.reportforge/config.toml)
//! 4. Environment variables (REPORTFORGE_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{ForgeError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge global config
        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        // Merge project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // Merge environment variables (e.g., REPORTFORGE_LLM_MODEL -> llm.model)
        figment = figment.merge(Env::prefixed("REPORTFORGE_").split('_').lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;

        // Validate configuration after loading
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/reportforge/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("reportforge"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".reportforge/config.toml")
    }

    /// Get project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".reportforge")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            r#"
[llm]
backend = "openai"
model = "gpt-4o"
temperature = 0.3

[retry]
max_attempts = 5

[models."gpt-4o"]
max_context_tokens = 128000
safety_fraction = 0.7
overlap_tokens = 1500
"#
        )
        .expect("write config");

        let config = ConfigLoader::load_from_file(file.path()).expect("load");
        assert_eq!(config.llm.backend, "openai");
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.retry.max_attempts, 5);

        let profile = config.profile_for("gpt-4o");
        assert_eq!(profile.overlap_tokens, 1500);
        assert_eq!(profile.usable_tokens(), 89_600);

        // Untouched sections keep their defaults
        assert_eq!(
            config.retry.base_delay_ms,
            crate::constants::retry::BASE_DELAY_MS
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            r#"
[llm]
temperature = 9.0
"#
        )
        .expect("write config");

        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_project_config_path() {
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".reportforge/config.toml")
        );
    }
}
