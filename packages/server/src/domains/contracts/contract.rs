//! Contract model: one attempt to execute a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection};

use crate::api::ApiError;
use crate::common::{ContractId, JobId};

/// Where a contract stands. `waiting` and `running` are the only live
/// states; a job has at most one live contract at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "contract_outcome", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Waiting,
    Running,
    Success,
    Error,
    Cancelled,
    TryLater,
}

impl Outcome {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::Error | Outcome::Cancelled | Outcome::TryLater
        )
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub job_id: JobId,
    pub contract_number: i32,
    pub outcome: Outcome,
    pub due: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_body: Option<Value>,
    pub error: Option<String>,
}

const CONTRACT_COLUMNS: &str = "contract_id, job_id, contract_number, outcome, due, \
                                created_at, claimed_at, finished_at, result_body, error";

impl Contract {
    /// Create the next waiting contract for a job.
    ///
    /// `due` defaults to five seconds in the past so a fresh contract is
    /// immediately eligible; `try-later` completions pass their deferral
    /// here. Numbering continues from the job's latest contract; the
    /// partial unique index rejects a second live contract for the same
    /// job.
    pub async fn create(
        conn: &mut PgConnection,
        job_id: JobId,
        due: Option<DateTime<Utc>>,
    ) -> Result<Self, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO contracts (contract_id, job_id, contract_number, due)
            SELECT $1, $2, COALESCE(MAX(c.contract_number), 0) + 1,
                   COALESCE($3, NOW() - INTERVAL '5 seconds')
            FROM contracts c
            WHERE c.job_id = $2
            RETURNING {CONTRACT_COLUMNS}
            "#
        ))
        .bind(ContractId::new())
        .bind(job_id)
        .bind(due)
        .fetch_one(conn)
        .await?;

        Ok(contract)
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        contract_id: ContractId,
    ) -> Result<Option<Self>, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE contract_id = $1"
        ))
        .bind(contract_id)
        .fetch_optional(conn)
        .await?;

        Ok(contract)
    }

    /// Fetch a contract and lock its row for the rest of the transaction.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        contract_id: ContractId,
    ) -> Result<Option<Self>, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE contract_id = $1 FOR UPDATE"
        ))
        .bind(contract_id)
        .fetch_optional(conn)
        .await?;

        Ok(contract)
    }

    /// The contract with the highest number for a job, if any.
    pub async fn latest_for_job(
        conn: &mut PgConnection,
        job_id: JobId,
    ) -> Result<Option<Self>, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {CONTRACT_COLUMNS}
            FROM contracts
            WHERE job_id = $1
            ORDER BY contract_number DESC
            LIMIT 1
            "#
        ))
        .bind(job_id)
        .fetch_optional(conn)
        .await?;

        Ok(contract)
    }

    /// Move a contract to a terminal outcome.
    pub async fn finish(
        conn: &mut PgConnection,
        contract_id: ContractId,
        outcome: Outcome,
        result_body: Option<Value>,
        error: Option<String>,
    ) -> Result<Self, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE contracts
            SET outcome = $2, finished_at = NOW(), result_body = $3, error = $4
            WHERE contract_id = $1
            RETURNING {CONTRACT_COLUMNS}
            "#
        ))
        .bind(contract_id)
        .bind(outcome)
        .bind(result_body)
        .bind(error)
        .fetch_one(conn)
        .await?;

        Ok(contract)
    }

    /// Return a running contract to the waiting pool (the job picked up new
    /// dependencies mid-flight).
    pub async fn reopen(
        conn: &mut PgConnection,
        contract_id: ContractId,
    ) -> Result<Self, ApiError> {
        let contract = sqlx::query_as::<_, Self>(&format!(
            r#"
            UPDATE contracts
            SET outcome = 'waiting', claimed_at = NULL
            WHERE contract_id = $1
            RETURNING {CONTRACT_COLUMNS}
            "#
        ))
        .bind(contract_id)
        .fetch_one(conn)
        .await?;

        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_and_running_are_live() {
        assert!(Outcome::Waiting.is_live());
        assert!(Outcome::Running.is_live());
    }

    #[test]
    fn finished_outcomes_are_terminal() {
        assert!(Outcome::Success.is_terminal());
        assert!(Outcome::Error.is_terminal());
        assert!(Outcome::Cancelled.is_terminal());
        assert!(Outcome::TryLater.is_terminal());
    }

    #[test]
    fn outcome_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(Outcome::TryLater).unwrap(),
            serde_json::json!("try-later")
        );
        assert_eq!(
            serde_json::to_value(Outcome::Waiting).unwrap(),
            serde_json::json!("waiting")
        );
    }

    #[test]
    fn outcome_deserializes_kebab_case() {
        let outcome: Outcome = serde_json::from_str(r#""try-later""#).unwrap();
        assert_eq!(outcome, Outcome::TryLater);
    }
}
