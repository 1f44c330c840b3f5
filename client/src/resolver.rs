//! Conflict resolution against the live store.
//!
//! Planning is done by the engine. This module executes the one plan that
//! needs the network, resubmitting a merged payload, and falls back to the
//! server's version when the resubmission fails for any reason.

use crate::error::{Result, SyncError};
use crate::transport::{decode, with_timeout, Transport};
use ferry_engine::protocol::entity_path;
use ferry_engine::{
    apply_plan, plan_resolution, ChangeRecord, ConflictReport, EntityKey, EntityWrite,
    LocalCache, PushResult, PushStatus, Resolution, ResolutionPlan, Schema, Timestamp, Version,
    VersionedEntity,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Executes conflict resolution plans.
pub struct ConflictResolver {
    schema: Schema,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl ConflictResolver {
    pub fn new(schema: Schema, transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            schema,
            transport,
            request_timeout,
        }
    }

    /// Merge schema used for version conflicts.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Resolve a rejected change and settle the cache.
    pub async fn resolve(
        &self,
        cache: &dyn LocalCache,
        change: ChangeRecord,
        result: &PushResult,
        now: Timestamp,
    ) -> Resolution {
        let report = ConflictReport::new(change, result);
        let key = report.key();
        let base = match &report.local_change.base {
            Some(base) => Some(base.clone()),
            None => cache.get_cached_item(&key),
        };
        let plan = plan_resolution(&report, base.as_ref(), &self.schema);

        info!(
            entity = %key,
            kind = ?report.kind,
            server_version = ?result.server_version,
            "resolving conflict"
        );

        let ResolutionPlan::Resubmit {
            merged,
            client_version,
            ..
        } = &plan
        else {
            let resolution = apply_plan(cache, &plan, now);
            debug!(entity = %key, ?resolution, "conflict settled");
            return resolution;
        };

        match self.resubmit(&key, merged, *client_version, now).await {
            Ok(entity) => {
                let version = entity.version;
                cache.update_cached_item(entity, now);
                info!(entity = %key, version, "merged change accepted");
                Resolution::Merged { version }
            }
            Err(e) => {
                warn!(
                    entity = %key,
                    error = %e,
                    "merge resubmission failed, accepting server version"
                );
                apply_plan(cache, &plan.fallback(), now)
            }
        }
    }

    async fn resubmit(
        &self,
        key: &EntityKey,
        merged: &serde_json::Value,
        client_version: Version,
        now: Timestamp,
    ) -> Result<VersionedEntity> {
        let body = serde_json::to_value(EntityWrite {
            data: merged.clone(),
            client_version,
        })?;

        let response = with_timeout(
            self.request_timeout,
            self.transport
                .put(&entity_path(&key.entity_type, &key.entity_id), &body),
        )
        .await?;
        let result: PushResult = decode(response)?;

        if result.status != PushStatus::Success {
            return Err(SyncError::Rejected {
                entity: key.to_string(),
                reason: result
                    .message
                    .unwrap_or_else(|| format!("{:?}", result.status)),
            });
        }

        match result.server_data {
            Some(entity) => Ok(entity),
            None => {
                let version = result.server_version.unwrap_or(client_version + 1);
                let mut entity = VersionedEntity::new(
                    key.entity_type.clone(),
                    key.entity_id.clone(),
                    merged.clone(),
                    now,
                );
                entity.version = version;
                Ok(entity)
            }
        }
    }
}
