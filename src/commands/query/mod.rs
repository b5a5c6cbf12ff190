mod execute;
mod output;

pub use execute::QueryResult;

use clap::Args;

/// Run one SQL text and print its results
#[derive(Args, Debug)]
#[command(after_help = "\
Examples:
  sql_session query 'SELECT * FROM test'                          # Print every row
  sql_session query 'INSERT INTO test VALUES (?1)' -p 100         # Bind a parameter
  sql_session query 'SELECT 1; SELECT 2' --format json            # One result per statement")]
pub struct QueryCmd {
    /// SQL text; several statements separated by `;` produce several results
    pub sql: String,

    /// Parameter values bound in order (integer, real, null, true/false, else text)
    #[arg(short, long = "param")]
    pub params: Vec<String>,
}
