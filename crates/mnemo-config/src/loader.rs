use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::MnemoConfig;
use mnemo_core::MnemoError;

/// Loads the Mnemo configuration and reloads it on request.
pub struct ConfigLoader {
    config: Arc<RwLock<MnemoConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MNEMO_CONFIG env > ~/.mnemo/mnemo.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MNEMO_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo")
            .join("mnemo.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> mnemo_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            MnemoConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(MnemoError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> MnemoConfig {
        self.config.read().clone()
    }

    /// Resolved config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse(raw: &str, path: &Path) -> mnemo_core::Result<MnemoConfig> {
        toml::from_str::<MnemoConfig>(raw).map_err(|e| {
            MnemoError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (MNEMO_DB_PATH, MNEMO_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: MnemoConfig) -> MnemoConfig {
        if let Ok(v) = std::env::var("MNEMO_DB_PATH") {
            config.memory.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MNEMO_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("MNEMO_EMBEDDING_PROVIDER") {
            config.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("MNEMO_EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        if let Ok(v) = std::env::var("MNEMO_EVALUATOR_MODEL") {
            config.evaluator.model = v;
        }
        // API key: config file takes priority, env is the fallback.
        if config.services.openai_api_key.is_none() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                config.services.openai_api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk.
    ///
    /// A file that no longer validates is rejected and the current config kept.
    pub fn reload(&self) -> mnemo_core::Result<()> {
        if !self.config_path.exists() {
            return Err(MnemoError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(MnemoError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
