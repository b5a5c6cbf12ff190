//! CLI argument definitions.
//!
//! This module contains the top-level CLI structure and how it resolves the
//! session factory. Individual command definitions are in the `commands`
//! module.

use clap::Parser;
use std::error::Error;

use crate::commands::Command;
use crate::config::ConfigFile;
use crate::db::{DatabaseConfig, SqliteOptions};
use crate::output::OutputFormat;
use crate::session::SessionFactory;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Database URL or SQLite file path (overrides .sql_session.json and DATABASE_URL)
    #[arg(short, long, global = true)]
    pub db: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,

    /// Rows buffered between the database and the reader
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub fetch_size: Option<u16>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Database and session options after applying the CLI overrides.
    ///
    /// Priority: `--db` > config file > `DATABASE_URL` > default.
    pub fn connection_settings(&self) -> Result<(DatabaseConfig, SqliteOptions), Box<dyn Error>> {
        let config_file = ConfigFile::load_optional()?;
        let mut options = config_file
            .as_ref()
            .map(|file| file.session)
            .unwrap_or_default();
        if let Some(fetch_size) = self.fetch_size {
            options.fetch_size = usize::from(fetch_size);
        }

        let database = match &self.db {
            Some(url) => DatabaseConfig::from_url(url)?,
            None => match config_file {
                Some(file) => file.database.to_database_config(),
                None => DatabaseConfig::resolve()?,
            },
        };
        Ok((database, options))
    }

    /// The session factory the command runs against.
    pub fn session_factory(&self) -> Result<SessionFactory, Box<dyn Error>> {
        let (database, options) = self.connection_settings()?;
        Ok(SessionFactory::new(database.connect(options)))
    }
}
