use std::error::Error;
use std::fs;

use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use serde::Serialize;
use tracing::debug;

use super::ScriptCmd;
use crate::commands::Execute;
use crate::db::sql::split_statements;
use crate::output::ResultSet;
use crate::session::{Handle, SessionFactory};

/// Result of the script command execution
#[derive(Debug, Default, Serialize)]
pub struct ScriptResult {
    pub file: String,
    pub transaction: bool,
    pub statements: usize,
    pub results: Vec<ResultSet>,
}

#[async_trait(?Send)]
impl Execute for ScriptCmd {
    type Output = ScriptResult;

    async fn execute(self, sessions: &SessionFactory) -> Result<Self::Output, Box<dyn Error>> {
        let content = fs::read_to_string(&self.file)
            .map_err(|e| format!("Failed to read script {}: {}", self.file.display(), e))?;
        let statements: Vec<String> = split_statements(&content)
            .into_iter()
            .map(str::to_string)
            .collect();
        let count = statements.len();
        debug!(file = %self.file.display(), statements = count, "running script");

        let run = move |handle: Handle| {
            statements
                .into_iter()
                .fold(handle.create_batch(), |batch, sql| batch.add(sql))
                .map_result(|result| stream::once(ResultSet::collect(result)))
        };
        let results: Vec<ResultSet> = if self.transaction {
            sessions.in_transaction(run).try_collect().await?
        } else {
            sessions.with_handle(run).try_collect().await?
        };

        Ok(ScriptResult {
            file: self.file.display().to_string(),
            transaction: self.transaction,
            statements: count,
            results,
        })
    }
}
