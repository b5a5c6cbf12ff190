mod cli_tests;
mod execute;
mod output;

pub use execute::ScriptResult;

use clap::Args;
use std::path::PathBuf;

/// Run every statement of a SQL file in order
#[derive(Args, Debug)]
#[command(after_help = "\
Examples:
  sql_session script schema.sql                    # Run statements one after another
  sql_session script migrate.sql --transaction     # All or nothing")]
pub struct ScriptCmd {
    /// SQL file whose statements are separated by `;`
    pub file: PathBuf,

    /// Run the whole script in one transaction, rolled back on the first failure
    #[arg(short, long, default_value_t = false)]
    pub transaction: bool,
}
