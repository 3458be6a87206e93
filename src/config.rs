//! TOML configuration.
//!
//! ```toml
//! data_dir = "~/decks"
//!
//! [scheduler]
//! request_retention = 0.85
//! learning_steps = [1, 10]
//!
//! [deck]
//! newCardsPerDay = 10
//! ```
//!
//! Every field is optional; a missing file means defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flashcards::{DeckSettings, FileStorage, Scheduler, SchedulerParams, StorageError};

const DATA_DIR_ENV: &str = "FLASHDECK_DATA_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where decks and cards are stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub scheduler: SchedulerParams,
    /// Settings given to new decks
    pub deck: DeckSettings,
}

/// `dirs::config_dir()/flashdeck/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flashdeck").join("config.toml"))
}

impl Config {
    /// Load from `path`, or from the default location when none is given.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                log::debug!("Loading config from {}", path.display());
                Self::from_toml(&fs::read_to_string(&path)?)?
            }
            Some(path) => {
                log::info!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.deck.max_reviews == 0 {
            return Err(ConfigError::Invalid("deck.maxReviews must be positive".into()));
        }
        Ok(())
    }

    /// The configured data directory with `~/` expanded, or the platform default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(FileStorage::default_data_dir()?),
        }
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        Scheduler::new(self.scheduler.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
