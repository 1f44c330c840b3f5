//! Database operations for the applied_changes table.

use ferry_engine::PushResult;
use sqlx::types::Json;
use sqlx::PgExecutor;

/// Result recorded for an already applied change, if any.
pub async fn get_applied_result<'e, E: PgExecutor<'e>>(
    executor: E,
    change_id: &str,
) -> Result<Option<PushResult>, sqlx::Error> {
    let row: Option<(Json<PushResult>,)> =
        sqlx::query_as(r#"SELECT result FROM applied_changes WHERE change_id = $1"#)
            .bind(change_id)
            .fetch_optional(executor)
            .await?;

    Ok(row.map(|(Json(result),)| result))
}

/// Record the result of an applied change.
pub async fn record_applied<'e, E: PgExecutor<'e>>(
    executor: E,
    change_id: &str,
    result: &PushResult,
    applied_at: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO applied_changes (change_id, result, applied_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (change_id) DO NOTHING
        "#,
    )
    .bind(change_id)
    .bind(Json(result))
    .bind(applied_at as i64)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete records of changes applied before `before`.
pub async fn prune_applied<'e, E: PgExecutor<'e>>(
    executor: E,
    before: u64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM applied_changes WHERE applied_at < $1"#)
        .bind(before as i64)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
