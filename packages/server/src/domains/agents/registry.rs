//! Worker identity registry.
//!
//! Agents are keyed by (hostname, system name, system version); the first
//! poll from a new worker inserts a row and every later poll resolves to
//! the same id. Rows are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

use crate::api::ApiError;
use crate::common::AgentId;

/// Identity reported by a polling worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDetails {
    pub hostname: String,
    pub system_name: String,
    pub system_version: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub hostname: String,
    pub system_name: String,
    pub system_version: String,
    pub created_at: DateTime<Utc>,
}

/// Resolve worker details to an agent id, inserting on first sight.
///
/// The no-op `DO UPDATE` lets `RETURNING` hand back the existing row when
/// a concurrent poll won the insert race.
pub async fn upsert(conn: &mut PgConnection, details: &AgentDetails) -> Result<Agent, ApiError> {
    let agent = sqlx::query_as::<_, Agent>(
        r#"
        INSERT INTO agents (agent_id, hostname, system_name, system_version)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (hostname, system_name, system_version)
            DO UPDATE SET hostname = EXCLUDED.hostname
        RETURNING agent_id, hostname, system_name, system_version, created_at
        "#,
    )
    .bind(AgentId::new())
    .bind(&details.hostname)
    .bind(&details.system_name)
    .bind(&details.system_version)
    .fetch_one(conn)
    .await?;

    Ok(agent)
}
