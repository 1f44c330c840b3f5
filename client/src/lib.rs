//! # Ferry Client
//!
//! The async side of Ferry: a [`SyncCoordinator`] that pushes queued local
//! changes to the store, resolves conflicts, pulls server changes into a
//! [`LocalCache`](ferry_engine::LocalCache) and records the outcome of each
//! cycle.
//!
//! The store is reached through the [`Transport`] trait; [`HttpTransport`]
//! speaks the JSON protocol of `ferry-server`.
//!
//! ```no_run
//! use ferry_client::{HttpTransport, SyncConfig, SyncCoordinator};
//! use ferry_engine::{ChangeAction, MemoryCache};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new("http://localhost:3000", Duration::from_secs(30))?);
//! let cache = Arc::new(MemoryCache::default());
//! let coordinator = SyncCoordinator::new(SyncConfig::default(), transport, cache);
//!
//! coordinator.queue_change("estimate", "e-1", ChangeAction::Create, json!({"paxCount": 2}), None);
//! let report = coordinator.manual_sync().await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod resolver;
pub mod transport;

pub use backoff::Backoff;
pub use config::{ClientConfig, SyncConfig};
pub use coordinator::{
    CycleReport, FullSyncReport, PushSummary, SyncCoordinator, SyncHandle, Trigger,
};
pub use error::{ConfigError, Result, SyncError, TransportError};
pub use resolver::ConflictResolver;
pub use transport::{HttpTransport, Transport};
