//! Contract engine: admitting workers to contracts and applying the
//! outcomes they report.
//!
//! Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent pollers never admit
//! two workers to the same contract; the loser simply sees the next
//! qualifying contract or nothing. Completion dispatches over the reported
//! result kind exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection};
use tracing::debug;

use crate::api::ApiError;
use crate::common::{CommitmentId, ContractId, JobId};
use crate::domains::agents::{self, AgentDetails};
use crate::domains::commitments::Commitment;
use crate::domains::contracts::{Contract, Outcome};
use crate::domains::jobs::graph;
use crate::domains::jobs::request::DependencyRequest;

/// What a polling worker is willing to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkFilter {
    pub job_type: String,
    /// When present, only jobs carrying every listed tag qualify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl WorkFilter {
    pub fn job_type(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            tags: None,
        }
    }
}

/// The outcome a worker reports for a claimed contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkResult {
    /// The work finished; the body becomes visible to dependent jobs.
    Success { body: Value },
    /// The work failed.
    Error { message: String },
    /// The worker stopped after a cancellation instruction.
    Cancelled,
    /// The worker declined for now; a fresh contract becomes eligible at
    /// `due`.
    TryLater {
        due: chrono::DateTime<chrono::Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The worker discovered prerequisite work; the job blocks until the
    /// new dependencies succeed.
    AddDependencies { dependencies: Vec<DependencyRequest> },
}

/// What a worker receives when admitted to a contract.
#[derive(Debug, Clone, Serialize)]
pub struct ContractView {
    pub commitment_id: CommitmentId,
    pub contract: ContractDetails,
    /// Present when an idempotent re-claim observes a contract that has
    /// already produced a result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractDetails {
    pub job_id: JobId,
    pub contract_id: ContractId,
    pub request_body: Value,
    pub job_type: String,
    pub tags: Vec<String>,
    /// Unordered; consumers treat this as a set.
    pub dependencies: Vec<DependencyView>,
}

/// A dependency as rendered into the parent's contract view.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DependencyView {
    pub job_type: String,
    pub request_body: Value,
    pub result_body: Option<Value>,
}

/// Admit one worker to one eligible contract.
///
/// Idempotent on `commitment_id`: a retry of the same claim returns the
/// previously admitted contract. Selection is FIFO over the submitting
/// job's `created_at`, ties broken by `job_id`.
pub async fn request_work(
    conn: &mut PgConnection,
    commitment_id: CommitmentId,
    filter: &WorkFilter,
    agent: &AgentDetails,
) -> Result<Option<ContractView>, ApiError> {
    let agent = agents::upsert(conn, agent).await?;

    if let Some(existing) = Commitment::find(conn, commitment_id).await? {
        let contract = Contract::find_by_id(conn, existing.contract_id)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!(
                "commitment {commitment_id} references missing contract"
            )))?;
        let view = build_view(conn, commitment_id, &contract).await?;
        return Ok(Some(view));
    }

    let Some(contract) = claim_next(conn, filter).await? else {
        return Ok(None);
    };

    Commitment::insert(conn, commitment_id, contract.contract_id, agent.agent_id).await?;
    debug!(
        job = %contract.job_id.short(),
        contract = %contract.contract_id.short(),
        agent = %agent.agent_id.short(),
        "contract claimed"
    );

    let view = build_view(conn, commitment_id, &contract).await?;
    Ok(Some(view))
}

/// Atomically move the oldest eligible waiting contract to `running`.
///
/// Eligible means: due, matching the filter, and with every dependency's
/// latest contract finished in `success`.
async fn claim_next(
    conn: &mut PgConnection,
    filter: &WorkFilter,
) -> Result<Option<Contract>, ApiError> {
    let contract = sqlx::query_as::<_, Contract>(
        r#"
        WITH candidate AS (
            SELECT c.contract_id
            FROM contracts c
            JOIN jobs j ON j.job_id = c.job_id
            WHERE c.outcome = 'waiting'
              AND c.due <= NOW()
              AND j.job_type = $1
              AND ($2::text[] IS NULL OR j.tags @> $2::text[])
              AND NOT EXISTS (
                  SELECT 1
                  FROM job_dependencies d
                  LEFT JOIN LATERAL (
                      SELECT cc.outcome
                      FROM contracts cc
                      WHERE cc.job_id = d.child_job_id
                      ORDER BY cc.contract_number DESC
                      LIMIT 1
                  ) latest ON TRUE
                  WHERE d.parent_job_id = j.job_id
                    AND (latest.outcome IS NULL OR latest.outcome <> 'success')
              )
            ORDER BY j.created_at ASC, j.job_id ASC
            LIMIT 1
            FOR UPDATE OF c SKIP LOCKED
        )
        UPDATE contracts
        SET outcome = 'running', claimed_at = NOW()
        WHERE contract_id IN (SELECT contract_id FROM candidate)
        RETURNING contract_id, job_id, contract_number, outcome, due,
                  created_at, claimed_at, finished_at, result_body, error
        "#,
    )
    .bind(&filter.job_type)
    .bind(filter.tags.as_deref())
    .fetch_optional(conn)
    .await?;

    Ok(contract)
}

/// Apply a worker-reported result to the contract behind a commitment.
///
/// Anything but a live `running` contract is rejected as stale, with one
/// exception: acknowledging an already-cancelled contract with `cancelled`
/// is accepted, since that is exactly what a co-operative worker does after
/// a pause.
pub async fn complete_work(
    conn: &mut PgConnection,
    commitment_id: CommitmentId,
    result: &WorkResult,
) -> Result<(), ApiError> {
    let Some(commitment) = Commitment::find(conn, commitment_id).await? else {
        return Err(ApiError::StaleCommitment { commitment_id });
    };

    let Some(contract) = Contract::find_for_update(conn, commitment.contract_id).await? else {
        return Err(ApiError::StaleCommitment { commitment_id });
    };

    if contract.outcome != Outcome::Running {
        if contract.outcome == Outcome::Cancelled && matches!(result, WorkResult::Cancelled) {
            return Ok(());
        }
        return Err(ApiError::StaleCommitment { commitment_id });
    }

    match result {
        WorkResult::Success { body } => {
            Contract::finish(
                conn,
                contract.contract_id,
                Outcome::Success,
                Some(body.clone()),
                None,
            )
            .await?;
            graph::on_dependency_success(conn, contract.job_id).await?;
        }
        WorkResult::Error { message } => {
            Contract::finish(
                conn,
                contract.contract_id,
                Outcome::Error,
                None,
                Some(message.clone()),
            )
            .await?;
        }
        WorkResult::Cancelled => {
            Contract::finish(conn, contract.contract_id, Outcome::Cancelled, None, None).await?;
        }
        WorkResult::TryLater { due, reason } => {
            Contract::finish(
                conn,
                contract.contract_id,
                Outcome::TryLater,
                None,
                reason.clone(),
            )
            .await?;
            Contract::create(conn, contract.job_id, Some(*due)).await?;
        }
        WorkResult::AddDependencies { dependencies } => {
            if dependencies.is_empty() {
                return Err(ApiError::invalid(
                    "add-dependencies requires at least one dependency",
                ));
            }
            // The contract survives, unclaimed; the commitment ends so a
            // later claim can bind a fresh one.
            Contract::reopen(conn, contract.contract_id).await?;
            Commitment::delete(conn, commitment_id).await?;
            for dependency in dependencies {
                graph::attach_dependency(conn, contract.job_id, dependency).await?;
            }
        }
    }

    debug!(
        job = %contract.job_id.short(),
        contract = %contract.contract_id.short(),
        "work completed"
    );
    Ok(())
}

/// Render the view a worker receives: the job's request plus every
/// dependency's request and latest result.
async fn build_view(
    conn: &mut PgConnection,
    commitment_id: CommitmentId,
    contract: &Contract,
) -> Result<ContractView, ApiError> {
    let job = sqlx::query_as::<_, JobFields>(
        "SELECT job_type, request_body, tags FROM jobs WHERE job_id = $1",
    )
    .bind(contract.job_id)
    .fetch_one(&mut *conn)
    .await?;

    let dependencies = sqlx::query_as::<_, DependencyView>(
        r#"
        SELECT j.job_type, j.request_body, latest.result_body
        FROM job_dependencies d
        JOIN jobs j ON j.job_id = d.child_job_id
        LEFT JOIN LATERAL (
            SELECT cc.result_body
            FROM contracts cc
            WHERE cc.job_id = d.child_job_id
            ORDER BY cc.contract_number DESC
            LIMIT 1
        ) latest ON TRUE
        WHERE d.parent_job_id = $1
        "#,
    )
    .bind(contract.job_id)
    .fetch_all(conn)
    .await?;

    Ok(ContractView {
        commitment_id,
        contract: ContractDetails {
            job_id: contract.job_id,
            contract_id: contract.contract_id,
            request_body: job.request_body,
            job_type: job.job_type,
            tags: job.tags,
            dependencies,
        },
        result: contract.result_body.clone(),
    })
}

#[derive(FromRow)]
struct JobFields {
    job_type: String,
    request_body: Value,
    tags: Vec<String>,
}
