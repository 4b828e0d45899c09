//! The transactional facade transport adapters talk to.
//!
//! Every operation here is one database transaction, idempotent on its
//! primary key (`job_id` or `commitment_id`). Transient serialization
//! conflicts are retried a bounded number of times; everything else
//! surfaces as an [`ApiError`] with a stable code.

pub mod error;

pub use error::ApiError;

use std::future::Future;

use tracing::debug;

use crate::common::pagination::Page;
use crate::common::{CommitmentId, JobId};
use crate::domains::agents::AgentDetails;
use crate::domains::commitments::{self, HeartbeatReply};
use crate::domains::contracts::engine::{self, ContractView, WorkFilter, WorkResult};
use crate::domains::jobs::job::{self, Job, JobSummary, JobView};
use crate::domains::jobs::{graph, JobRequest};
use crate::kernel::Kernel;

const MAX_TX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Api {
    kernel: Kernel,
}

impl Api {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    /// Submit a job tree. No-op when the identical job already exists;
    /// conflict when the id exists with a different body.
    pub async fn put_job(&self, job_id: JobId, request: JobRequest) -> Result<(), ApiError> {
        retry_transient(|| self.try_put_job(job_id, &request)).await
    }

    /// Fetch a job view with its nested dependencies, or `None`.
    pub async fn get_job(&self, job_id: JobId) -> Result<Option<JobView>, ApiError> {
        retry_transient(|| self.try_get_job(job_id)).await
    }

    /// Newest-first paged listing of submitted jobs.
    pub async fn list_jobs(&self, page: Page) -> Result<Vec<JobSummary>, ApiError> {
        retry_transient(|| self.try_list_jobs(page)).await
    }

    /// Cancel a job and every descendant with a live contract.
    pub async fn pause_job(&self, job_id: JobId) -> Result<(), ApiError> {
        retry_transient(|| self.try_pause_job(job_id)).await
    }

    /// Re-issue waiting contracts for the job and its failed descendants.
    pub async fn retry_job(&self, job_id: JobId) -> Result<(), ApiError> {
        retry_transient(|| self.try_retry_job(job_id)).await
    }

    /// Claim one eligible contract for a worker, or `None` when nothing
    /// qualifies.
    pub async fn request_work(
        &self,
        commitment_id: CommitmentId,
        filter: WorkFilter,
        agent: AgentDetails,
    ) -> Result<Option<ContractView>, ApiError> {
        retry_transient(|| self.try_request_work(commitment_id, &filter, &agent)).await
    }

    /// Record a heartbeat and return the instruction for the worker.
    pub async fn heartbeat(&self, commitment_id: CommitmentId) -> Result<HeartbeatReply, ApiError> {
        retry_transient(|| self.try_heartbeat(commitment_id)).await
    }

    /// Apply a worker-reported result to its claimed contract.
    pub async fn complete_work(
        &self,
        commitment_id: CommitmentId,
        result: WorkResult,
    ) -> Result<(), ApiError> {
        retry_transient(|| self.try_complete_work(commitment_id, &result)).await
    }

    //
    // One transaction per operation. Dropping a transaction rolls it back,
    // so the error paths need no explicit cleanup.
    //

    async fn try_put_job(&self, job_id: JobId, request: &JobRequest) -> Result<(), ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        graph::put_job(&mut tx, job_id, request).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn try_get_job(&self, job_id: JobId) -> Result<Option<JobView>, ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        let view = job::load_view(&mut tx, job_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn try_list_jobs(&self, page: Page) -> Result<Vec<JobSummary>, ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        let jobs = Job::list(&mut tx, page).await?;
        tx.commit().await?;
        Ok(jobs)
    }

    async fn try_pause_job(&self, job_id: JobId) -> Result<(), ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        if Job::find_by_id(&mut tx, job_id).await?.is_none() {
            return Err(ApiError::JobNotFound { job_id });
        }
        let cancelled = graph::cascade_pause(&mut tx, job_id).await?;
        tx.commit().await?;
        debug!(%job_id, cancelled, "paused job subtree");
        Ok(())
    }

    async fn try_retry_job(&self, job_id: JobId) -> Result<(), ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        if Job::find_by_id(&mut tx, job_id).await?.is_none() {
            return Err(ApiError::JobNotFound { job_id });
        }
        let reissued = graph::cascade_retry(&mut tx, job_id).await?;
        tx.commit().await?;
        debug!(%job_id, reissued, "retried job subtree");
        Ok(())
    }

    async fn try_request_work(
        &self,
        commitment_id: CommitmentId,
        filter: &WorkFilter,
        agent: &AgentDetails,
    ) -> Result<Option<ContractView>, ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        let view = engine::request_work(&mut tx, commitment_id, filter, agent).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn try_heartbeat(&self, commitment_id: CommitmentId) -> Result<HeartbeatReply, ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        let reply = commitments::heartbeat(&mut tx, commitment_id).await?;
        tx.commit().await?;
        Ok(reply)
    }

    async fn try_complete_work(
        &self,
        commitment_id: CommitmentId,
        result: &WorkResult,
    ) -> Result<(), ApiError> {
        let mut tx = self.kernel.db.begin().await?;
        engine::complete_work(&mut tx, commitment_id, result).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Run an operation, retrying when the database reports a transient
/// serialization conflict. Each attempt is a fresh transaction.
async fn retry_transient<T, F, Fut>(op: F) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < MAX_TX_ATTEMPTS => {
                debug!(attempt, "retrying after transient database conflict");
                attempt += 1;
            }
            other => return other,
        }
    }
}
