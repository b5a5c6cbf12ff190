//! The session core: handles, statements, results and transactions.
//!
//! A `SessionFactory` acquires connections and wraps each in a `Handle`.
//! Statements built on a handle are validated against its transaction state
//! and dispatched one at a time; results come back as lazy streams.

mod factory;
mod handle;
mod result;
mod state;
mod statement;
mod transaction;

pub use factory::SessionFactory;
pub use handle::Handle;
pub use result::{ColumnIndex, Results, Row, SqlResult};
pub use state::Mutability;
pub use statement::{Batch, Query, Update};
