//! Fixtures shared by the dispatch integration tests.

use foreman_core::api::Api;
use foreman_core::common::{CommitmentId, JobId};
use foreman_core::domains::agents::AgentDetails;
use foreman_core::domains::contracts::{ContractView, WorkFilter, WorkResult};
use foreman_core::domains::jobs::JobRequest;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// A job type unique to one test, so parallel tests never observe each
/// other's work through the shared database.
pub fn unique_job_type(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

pub fn test_agent() -> AgentDetails {
    AgentDetails {
        hostname: "test-worker".to_string(),
        system_name: "test-suite".to_string(),
        system_version: "0.0.0".to_string(),
    }
}

/// A simple leaf job request.
pub fn job_request(job_type: &str, body: Value) -> JobRequest {
    JobRequest::new(job_type, body)
}

/// Submit a fresh leaf job and return its id.
pub async fn put_leaf_job(api: &Api, job_type: &str, body: Value) -> JobId {
    let job_id = JobId::new();
    api.put_job(job_id, job_request(job_type, body))
        .await
        .expect("put_job failed");
    job_id
}

/// Claim one contract of the given type with a fresh commitment id.
pub async fn claim(api: &Api, job_type: &str) -> Option<ContractView> {
    api.request_work(
        CommitmentId::new(),
        WorkFilter::job_type(job_type),
        test_agent(),
    )
    .await
    .expect("request_work failed")
}

/// Claim one contract of the given type and complete it successfully.
/// Panics when no work is available.
pub async fn claim_and_succeed(api: &Api, job_type: &str, result: Value) -> ContractView {
    let view = claim(api, job_type)
        .await
        .unwrap_or_else(|| panic!("no claimable work for job type {job_type}"));
    api.complete_work(
        view.commitment_id,
        WorkResult::Success {
            body: result,
        },
    )
    .await
    .expect("complete_work failed");
    view
}

/// An empty-ish request body that still differs per call site when needed.
pub fn body(label: &str) -> Value {
    json!({ "label": label })
}

/// Latest contract number recorded for a job.
pub async fn latest_contract_number(pool: &PgPool, job_id: JobId) -> i32 {
    sqlx::query_scalar::<_, i32>(
        "SELECT COALESCE(MAX(contract_number), 0) FROM contracts WHERE job_id = $1",
    )
    .bind(job_id)
    .fetch_one(pool)
    .await
    .expect("contract count query failed")
}
