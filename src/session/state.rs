//! Transaction bookkeeping for one handle.
//!
//! `TransactionState` is pure: it never talks to the connection. Handle
//! operations consult it to validate a request, issue the matching
//! connection call, then commit the transition here.

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Prefix of savepoint names the handle creates for nested transaction
/// levels. User savepoints may not use it.
pub(crate) const IMPLICIT_SAVEPOINT_PREFIX: &str = "__sql_session_level_";

/// Name of the implicit savepoint that opens nested level `depth`.
pub(crate) fn implicit_savepoint(depth: usize) -> String {
    format!("{}{}", IMPLICIT_SAVEPOINT_PREFIX, depth)
}

/// Whether statements may change data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadWrite => f.write_str("READ WRITE"),
            Mutability::ReadOnly => f.write_str("READ ONLY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Savepoint {
    name: String,
    depth: usize,
}

#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    /// 0 means autocommit.
    depth: usize,
    savepoints: Vec<Savepoint>,
    /// Mode set at each depth, innermost last.
    mutability: Vec<(usize, Mutability)>,
    /// Last read-only flag sent to the connection.
    connection_read_only: bool,
    /// Outermost level whose scope was dropped before it could finish.
    abandoned: Option<usize>,
    released: bool,
}

impl TransactionState {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn mutability(&self) -> Mutability {
        self.mutability
            .last()
            .map(|(_, mode)| *mode)
            .unwrap_or_default()
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.mutability() == Mutability::ReadOnly
    }

    pub(crate) fn connection_read_only(&self) -> bool {
        self.connection_read_only
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(Error::invalid_state("handle has been released"));
        }
        Ok(())
    }

    /// Mark the handle released. Returns false if it already was.
    pub(crate) fn release(&mut self) -> bool {
        !std::mem::replace(&mut self.released, true)
    }

    /// Open a new transaction level and return its depth.
    pub(crate) fn begin_scope(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    /// Close level `depth`, which must be the innermost open level.
    ///
    /// Savepoints and mutability modes owned by the level are dropped. The
    /// return value is the read-only flag the connection must be switched
    /// to, if the effective mode changed.
    pub(crate) fn end_scope(&mut self, depth: usize) -> Result<Option<bool>> {
        if depth == 0 || depth != self.depth {
            return Err(Error::invalid_state(format!(
                "transaction level {} is not the innermost open level (depth is {})",
                depth, self.depth
            )));
        }
        self.unwind_to(depth - 1);
        Ok(self.sync_read_only())
    }

    /// Close every open level.
    pub(crate) fn end_all(&mut self) -> Result<Option<bool>> {
        if self.depth == 0 {
            return Err(Error::invalid_state("no transaction is active"));
        }
        self.unwind_to(0);
        Ok(self.sync_read_only())
    }

    /// Close level `depth` together with every level nested in it.
    pub(crate) fn end_from(&mut self, depth: usize) -> Result<Option<bool>> {
        if depth == 0 || depth > self.depth {
            return Err(Error::invalid_state(format!(
                "transaction level {} is not open (depth is {})",
                depth, self.depth
            )));
        }
        self.unwind_to(depth - 1);
        Ok(self.sync_read_only())
    }

    fn unwind_to(&mut self, depth: usize) {
        self.depth = depth;
        self.savepoints.retain(|sp| sp.depth <= depth);
        self.mutability.retain(|(d, _)| *d <= depth);
        if self.abandoned.is_some_and(|d| d > depth) {
            self.abandoned = None;
        }
    }

    /// Record `mode` for the current depth.
    ///
    /// Returns the read-only flag the connection must be switched to, if the
    /// effective mode changed.
    pub(crate) fn set_mutability(&mut self, mode: Mutability) -> Option<bool> {
        let depth = self.depth;
        match self.mutability.last_mut() {
            Some((d, current)) if *d == depth => *current = mode,
            _ => self.mutability.push((depth, mode)),
        }
        self.sync_read_only()
    }

    fn sync_read_only(&mut self) -> Option<bool> {
        let read_only = self.is_read_only();
        if read_only == self.connection_read_only {
            return None;
        }
        self.connection_read_only = read_only;
        Some(read_only)
    }

    /// Revert the bookkeeping of a read-only switch the connection rejected.
    pub(crate) fn read_only_failed(&mut self, attempted: bool) {
        if self.connection_read_only == attempted {
            self.connection_read_only = !attempted;
        }
    }

    /// Validate a new savepoint name before it is sent to the connection.
    pub(crate) fn check_new_savepoint(&self, name: &str) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::invalid_state(
                "savepoints require an active transaction",
            ));
        }
        if name.is_empty() {
            return Err(Error::invalid_state("savepoint name must not be empty"));
        }
        if name.starts_with(IMPLICIT_SAVEPOINT_PREFIX) {
            return Err(Error::invalid_state(format!(
                "savepoint name '{}' uses a reserved prefix",
                name
            )));
        }
        if self
            .savepoints
            .iter()
            .any(|sp| sp.depth == self.depth && sp.name == name)
        {
            return Err(Error::invalid_state(format!(
                "savepoint '{}' already exists in this transaction",
                name
            )));
        }
        Ok(())
    }

    pub(crate) fn push_savepoint(&mut self, name: &str) {
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            depth: self.depth,
        });
    }

    /// Position of the innermost savepoint called `name`, with the depth of
    /// the level that created it.
    pub(crate) fn find_savepoint(&self, name: &str) -> Result<(usize, usize)> {
        self.savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .map(|position| (position, self.savepoints[position].depth))
            .ok_or_else(|| Error::invalid_state(format!("savepoint '{}' does not exist", name)))
    }

    /// Drop the savepoint at `position` and every savepoint created after it.
    pub(crate) fn pop_savepoints(&mut self, position: usize) {
        self.savepoints.truncate(position);
    }

    pub(crate) fn savepoint_names(&self) -> Vec<&str> {
        self.savepoints.iter().map(|sp| sp.name.as_str()).collect()
    }

    pub(crate) fn mark_abandoned(&mut self, depth: usize) {
        if depth == 0 || depth > self.depth {
            return;
        }
        self.abandoned = Some(self.abandoned.map_or(depth, |d| d.min(depth)));
    }

    pub(crate) fn take_abandoned(&mut self) -> Option<usize> {
        self.abandoned.take().filter(|d| *d <= self.depth)
    }
}
