//! Commitments: the binding of an agent to a contract, and the heartbeat
//! channel that binding carries.
//!
//! The heartbeat reply is the only path by which a running worker learns
//! its contract was cancelled; there is no server-to-worker push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};

use crate::api::ApiError;
use crate::common::{AgentId, CommitmentId, ContractId};
use crate::domains::contracts::{Contract, Outcome};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Commitment {
    pub commitment_id: CommitmentId,
    pub contract_id: ContractId,
    pub agent_id: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Commitment {
    pub async fn find(
        conn: &mut PgConnection,
        commitment_id: CommitmentId,
    ) -> Result<Option<Self>, ApiError> {
        let commitment = sqlx::query_as::<_, Self>(
            r#"
            SELECT commitment_id, contract_id, agent_id, claimed_at, last_heartbeat
            FROM commitments
            WHERE commitment_id = $1
            "#,
        )
        .bind(commitment_id)
        .fetch_optional(conn)
        .await?;

        Ok(commitment)
    }

    pub async fn insert(
        conn: &mut PgConnection,
        commitment_id: CommitmentId,
        contract_id: ContractId,
        agent_id: AgentId,
    ) -> Result<Self, ApiError> {
        let commitment = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO commitments (commitment_id, contract_id, agent_id)
            VALUES ($1, $2, $3)
            RETURNING commitment_id, contract_id, agent_id, claimed_at, last_heartbeat
            "#,
        )
        .bind(commitment_id)
        .bind(contract_id)
        .bind(agent_id)
        .fetch_one(conn)
        .await?;

        Ok(commitment)
    }

    pub async fn delete(
        conn: &mut PgConnection,
        commitment_id: CommitmentId,
    ) -> Result<(), ApiError> {
        sqlx::query("DELETE FROM commitments WHERE commitment_id = $1")
            .bind(commitment_id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Stamp the heartbeat, never moving it backwards.
    pub async fn record_heartbeat(
        conn: &mut PgConnection,
        commitment_id: CommitmentId,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE commitments
            SET last_heartbeat = GREATEST(last_heartbeat, NOW())
            WHERE commitment_id = $1
            "#,
        )
        .bind(commitment_id)
        .execute(conn)
        .await?;

        Ok(())
    }
}

/// What the worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeartbeatInstruction {
    Continue,
    Cancel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub instruction: HeartbeatInstruction,
}

/// Record a worker's heartbeat and tell it whether to keep going.
///
/// A cancelled contract answers `cancel` — that is the cancellation
/// channel, not an error. Heartbeats through a commitment whose contract
/// finished any other way (or that never existed) are stale.
pub async fn heartbeat(
    conn: &mut PgConnection,
    commitment_id: CommitmentId,
) -> Result<HeartbeatReply, ApiError> {
    let Some(commitment) = Commitment::find(conn, commitment_id).await? else {
        return Err(ApiError::StaleCommitment { commitment_id });
    };

    let Some(contract) = Contract::find_by_id(conn, commitment.contract_id).await? else {
        return Err(ApiError::StaleCommitment { commitment_id });
    };

    match contract.outcome {
        Outcome::Cancelled => Ok(HeartbeatReply {
            instruction: HeartbeatInstruction::Cancel,
        }),
        Outcome::Running | Outcome::Waiting => {
            Commitment::record_heartbeat(conn, commitment_id).await?;
            Ok(HeartbeatReply {
                instruction: HeartbeatInstruction::Continue,
            })
        }
        Outcome::Success | Outcome::Error | Outcome::TryLater => {
            Err(ApiError::StaleCommitment { commitment_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(HeartbeatInstruction::Continue).unwrap(),
            serde_json::json!("continue")
        );
        assert_eq!(
            serde_json::to_value(HeartbeatInstruction::Cancel).unwrap(),
            serde_json::json!("cancel")
        );
    }

    #[test]
    fn reply_shape_matches_the_wire() {
        let reply = HeartbeatReply {
            instruction: HeartbeatInstruction::Cancel,
        };
        let json = serde_json::to_value(reply).unwrap();
        assert_eq!(json, serde_json::json!({"instruction": "cancel"}));
    }
}
