//! Output formatting for query command results.

use super::execute::QueryResult;
use crate::output::{render_all, Outputable};

impl Outputable for QueryResult {
    fn to_table(&self) -> String {
        let mut lines = vec![format!("Query: {}", self.sql)];
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            lines.push(format!("Params: {}", params.join(", ")));
        }
        lines.push(String::new());
        lines.push(render_all(&self.results));
        lines.join("\n")
    }
}
