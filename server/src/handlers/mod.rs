//! Request handlers for sync operations.

mod entities;
mod pull;
mod push;

pub use entities::*;
pub use pull::*;
pub use push::*;
