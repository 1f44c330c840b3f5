//! Pull handler - serves the change feed to clients.

use crate::error::Result;
use crate::store::Store;
use ferry_engine::store::DEFAULT_PULL_LIMIT;
use ferry_engine::{PullQuery, PullResponse, Timestamp};

/// Serve changes after the query's cursor, capping the page at `max_limit`.
pub async fn handle_pull(
    store: &Store,
    mut query: PullQuery,
    max_limit: u32,
    now: Timestamp,
) -> Result<PullResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_PULL_LIMIT).clamp(1, max_limit.max(1));
    query.limit = Some(limit);

    let response = store.changes_since(&query, now).await?;

    tracing::debug!(
        since = ?query.cursor(),
        returned = response.changes.len(),
        has_more = response.has_more,
        "pull served"
    );

    Ok(response)
}
