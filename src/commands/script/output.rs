//! Output formatting for script command results.

use super::execute::ScriptResult;
use crate::output::{plural, render_all, Outputable};

impl Outputable for ScriptResult {
    fn to_table(&self) -> String {
        let mode = if self.transaction { ", in transaction" } else { "" };
        let mut lines = vec![format!(
            "Script: {} ({}{})",
            self.file,
            plural(self.statements, "statement"),
            mode
        )];
        lines.push(String::new());
        lines.push(render_all(&self.results));
        lines.join("\n")
    }
}
