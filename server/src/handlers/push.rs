//! Push handler - applies a batch of client changes.

use crate::error::Result;
use crate::store::Store;
use ferry_engine::{PushRequest, PushResponse, PushStatus, Timestamp};

/// Apply every change of a batch in order.
///
/// Results are aligned by index with the request. A rejected change never
/// stops the batch; only storage failures abort it.
pub async fn handle_push(
    store: &Store,
    request: &PushRequest,
    now: Timestamp,
) -> Result<PushResponse> {
    let mut results = Vec::with_capacity(request.changes.len());

    for item in &request.changes {
        results.push(store.apply(item, now).await?);
    }

    let count = |status: PushStatus| results.iter().filter(|r| r.status == status).count();
    tracing::info!(
        received = request.changes.len(),
        succeeded = count(PushStatus::Success),
        conflicts = count(PushStatus::Conflict),
        errors = count(PushStatus::Error),
        "push batch applied"
    );

    Ok(PushResponse {
        results,
        server_time: now,
    })
}
