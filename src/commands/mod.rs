//! Command definitions and implementations.
//!
//! Each command is defined in its own module with:
//! - The command struct with clap attributes for CLI parsing
//! - An `Execute` implementation running it against a `SessionFactory`
//! - An `Outputable` implementation for its result

mod query;
mod script;

pub use query::{QueryCmd, QueryResult};
pub use script::{ScriptCmd, ScriptResult};

use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

use crate::output::{OutputFormat, Outputable};
use crate::session::SessionFactory;

/// Trait for executing commands with command-specific result types.
#[async_trait(?Send)]
pub trait Execute {
    type Output: Outputable;

    async fn execute(self, sessions: &SessionFactory) -> Result<Self::Output, Box<dyn Error>>;
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one SQL text and print its results
    Query(QueryCmd),

    /// Run every statement of a SQL file in order
    Script(ScriptCmd),
}

impl Command {
    /// Execute the command and return formatted output
    pub async fn run(
        self,
        sessions: &SessionFactory,
        format: OutputFormat,
    ) -> Result<String, Box<dyn Error>> {
        match self {
            Command::Query(cmd) => {
                let result = cmd.execute(sessions).await?;
                Ok(result.format(format))
            }
            Command::Script(cmd) => {
                let result = cmd.execute(sessions).await?;
                Ok(result.format(format))
            }
        }
    }
}
