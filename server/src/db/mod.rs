//! Database module for PostgreSQL persistence.

mod changes;
mod entities;
mod pool;

pub use changes::*;
pub use entities::*;
pub use pool::*;
