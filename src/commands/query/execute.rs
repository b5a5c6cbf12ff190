use std::error::Error;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use super::QueryCmd;
use crate::commands::Execute;
use crate::db::Value;
use crate::output::ResultSet;
use crate::session::SessionFactory;

/// Result of the query command execution
#[derive(Debug, Default, Serialize)]
pub struct QueryResult {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    pub results: Vec<ResultSet>,
}

#[async_trait(?Send)]
impl Execute for QueryCmd {
    type Output = QueryResult;

    async fn execute(self, sessions: &SessionFactory) -> Result<Self::Output, Box<dyn Error>> {
        let params: Vec<Value> = self.params.iter().map(|p| Value::parse_literal(p)).collect();
        let sql = self.sql.clone();
        let bound = params.clone();

        let results: Vec<ResultSet> = sessions
            .with_handle(move |handle| {
                let scheme = handle.placeholders();
                let query = bound
                    .into_iter()
                    .enumerate()
                    .try_fold(handle.create_query(sql), |query, (index, value)| {
                        query.bind(scheme.identifier(index), value)
                    });
                match query {
                    Ok(query) => query
                        .map_result(|result| stream::once(ResultSet::collect(result)))
                        .boxed(),
                    Err(err) => stream::once(future::ready(Err(err))).boxed(),
                }
            })
            .try_collect()
            .await?;

        Ok(QueryResult {
            sql: self.sql,
            params,
            results,
        })
    }
}
