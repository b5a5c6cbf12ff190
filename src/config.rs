//! Configuration file handling for database connections.
//!
//! This module provides loading and parsing of `.sql_session.json` files.
//! The file names the database and tunes the session layer.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::{DatabaseConfig, SqliteOptions};

/// Name of the configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".sql_session.json";

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseConfigFile,

    /// Session tuning; every field has a default.
    #[serde(default)]
    pub session: SqliteOptions,
}

/// Database configuration variants.
///
/// JSON format uses a "type" field with lowercase variant names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfigFile {
    Sqlite {
        path: PathBuf,
    },
    Memory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ConfigFile {
    /// Load `.sql_session.json` from the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or not valid
    /// configuration JSON.
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_optional()?.ok_or_else(|| {
            format!(
                "Configuration file not found: {name}\n\n\
                 Please create a {name} file in the current directory.\n\n\
                 Examples:\n\
                 \n\
                 SQLite:\n\
                 {{\n  \
                   \"database\": {{\n    \
                     \"type\": \"sqlite\",\n    \
                     \"path\": \"./sql_session.db\"\n  \
                   }},\n  \
                   \"session\": {{\n    \
                     \"fetch_size\": 64,\n    \
                     \"placeholders\": \"numbered\"\n  \
                   }}\n\
                 }}\n\
                 \n\
                 In-memory:\n\
                 {{\n  \
                   \"database\": {{\n    \
                     \"type\": \"memory\"\n  \
                   }}\n\
                 }}\n",
                name = CONFIG_FILE_NAME
            )
            .into()
        })
    }

    /// Load `.sql_session.json` from the current directory if it exists.
    pub fn load_optional() -> Result<Option<Self>, Box<dyn Error>> {
        let config_path = PathBuf::from(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Ok(None);
        }
        Self::load_from(&config_path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

        let config: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))?;

        if config.session.fetch_size == 0 {
            return Err(format!("Invalid {}: session.fetch_size must be at least 1", path.display()).into());
        }

        Ok(config)
    }
}

impl DatabaseConfigFile {
    /// Convert this configuration to a DatabaseConfig.
    pub fn to_database_config(&self) -> DatabaseConfig {
        match self {
            Self::Sqlite { path } => DatabaseConfig::Sqlite { path: path.clone() },
            Self::Memory { name } => DatabaseConfig::Memory { name: name.clone() },
        }
    }
}
