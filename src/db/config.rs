//! Database configuration for runtime backend selection.
//!
//! Resolves which database the session layer talks to from CLI arguments,
//! environment variables, or the `.sql_session.json` configuration file.

use std::error::Error;
use std::path::PathBuf;

use super::sqlite::{SqliteConnectionFactory, SqliteOptions, SqliteTarget};

/// Default database file when nothing else is configured.
pub const DEFAULT_DATABASE: &str = "./sql_session.db";

/// Which database to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    /// SQLite database file.
    Sqlite { path: PathBuf },

    /// In-memory SQLite database. Named databases are shared between the
    /// connections of one process.
    Memory { name: Option<String> },
}

impl DatabaseConfig {
    /// Build a connection factory for this configuration.
    pub fn connect(&self, options: SqliteOptions) -> SqliteConnectionFactory {
        SqliteConnectionFactory::new(self.target(), options)
    }

    pub fn target(&self) -> SqliteTarget {
        match self {
            Self::Sqlite { path } => SqliteTarget::File(path.clone()),
            Self::Memory { name } => SqliteTarget::Memory(name.clone()),
        }
    }

    /// Parse from a connection URL or file path.
    ///
    /// Supported formats:
    /// - `./path/to/db.sqlite` or `/absolute/path` → Sqlite
    /// - `sqlite:///path/to/db` or `sqlite://relative.db` → Sqlite
    /// - `:memory:` or `sqlite::memory:` → private Memory
    /// - `memory://name` → shared, named Memory
    /// - `postgres://...` → unsupported
    pub fn from_url(url: &str) -> Result<Self, Box<dyn Error>> {
        if url == ":memory:" || url == "sqlite::memory:" {
            return Ok(Self::Memory { name: None });
        }

        if let Some(name) = url.strip_prefix("memory://") {
            let name = (!name.is_empty()).then(|| name.to_string());
            return Ok(Self::Memory { name });
        }

        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err("sqlite:// URL is missing a database path".into());
            }
            return Ok(Self::Sqlite {
                path: PathBuf::from(path),
            });
        }

        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Err("PostgreSQL backend is not supported".into());
        }

        if url.contains("://") {
            return Err(format!("Unsupported database URL: {}", url).into());
        }

        Ok(Self::Sqlite {
            path: PathBuf::from(url),
        })
    }

    /// Load from the `DATABASE_URL` environment variable.
    pub fn from_env() -> Result<Option<Self>, Box<dyn Error>> {
        match std::env::var("DATABASE_URL") {
            Ok(url) => Ok(Some(Self::from_url(&url)?)),
            Err(_) => Ok(None),
        }
    }

    /// Resolve configuration from config file and environment.
    ///
    /// Priority: Config file > Environment > Default (./sql_session.db)
    pub fn resolve() -> Result<Self, Box<dyn Error>> {
        if let Some(config_file) = crate::config::ConfigFile::load_optional()? {
            return Ok(config_file.database.to_database_config());
        }

        if let Some(config) = Self::from_env()? {
            return Ok(config);
        }

        Self::from_url(DEFAULT_DATABASE)
    }
}
