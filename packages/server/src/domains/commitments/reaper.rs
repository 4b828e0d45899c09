//! Optional sweep for commitments that stopped heartbeating.
//!
//! Disabled by default: the engine itself never expires a running
//! contract. Deployments that want long-silent workers failed out can
//! enable the reaper in configuration, and the server binary runs this
//! sweep on an interval.

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;

/// Mark every running contract whose commitment has been silent for longer
/// than `silence_secs` as errored. Returns how many contracts were swept.
pub async fn expire_silent(pool: &PgPool, silence_secs: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE contracts c
        SET outcome = 'error', finished_at = NOW(), error = 'worker heartbeat lapsed'
        FROM commitments m
        WHERE m.contract_id = c.contract_id
          AND c.outcome = 'running'
          AND m.last_heartbeat < NOW() - ($1 || ' seconds')::INTERVAL
        "#,
    )
    .bind(silence_secs.to_string())
    .execute(pool)
    .await?;

    let swept = result.rows_affected();
    if swept > 0 {
        warn!(swept, "expired contracts with lapsed heartbeats");
    }
    Ok(swept)
}
