//! Job model and read views.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgConnection};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::api::ApiError;
use crate::common::pagination::Page;
use crate::common::JobId;
use crate::domains::contracts::{Contract, Outcome};

/// A client-submitted job. Immutable once created; execution state lives on
/// its contracts.
#[derive(FromRow, Debug, Clone, Serialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = JobId::new())]
    pub job_id: JobId,
    pub job_type: String,
    #[builder(default = Value::Null)]
    pub request_body: Value,
    pub request_hash: Uuid,
    #[builder(default)]
    pub tags: Vec<String>,
    #[builder(default)]
    pub job_name: Option<String>,
    #[builder(default)]
    pub notes: Option<String>,
    pub fungibility_group_id: JobId,
    #[builder(default)]
    pub parent_job_id: Option<JobId>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub async fn insert(&self, conn: &mut PgConnection) -> Result<Self, ApiError> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO jobs (
                job_id, job_type, request_body, request_hash, tags,
                job_name, notes, fungibility_group_id, parent_job_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING job_id, job_type, request_body, request_hash, tags,
                      job_name, notes, fungibility_group_id, parent_job_id, created_at
            "#,
        )
        .bind(self.job_id)
        .bind(&self.job_type)
        .bind(&self.request_body)
        .bind(self.request_hash)
        .bind(&self.tags)
        .bind(&self.job_name)
        .bind(&self.notes)
        .bind(self.fungibility_group_id)
        .bind(self.parent_job_id)
        .bind(self.created_at)
        .fetch_one(conn)
        .await?;

        Ok(job)
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        job_id: JobId,
    ) -> Result<Option<Self>, ApiError> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            SELECT job_id, job_type, request_body, request_hash, tags,
                   job_name, notes, fungibility_group_id, parent_job_id, created_at
            FROM jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(conn)
        .await?;

        Ok(job)
    }

    /// Direct dependencies of a job.
    pub async fn children(
        conn: &mut PgConnection,
        job_id: JobId,
    ) -> Result<Vec<JobId>, ApiError> {
        let children = sqlx::query_scalar::<_, JobId>(
            r#"
            SELECT child_job_id
            FROM job_dependencies
            WHERE parent_job_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(conn)
        .await?;

        Ok(children)
    }

    /// Newest-first listing for the jobs index.
    pub async fn list(conn: &mut PgConnection, page: Page) -> Result<Vec<JobSummary>, ApiError> {
        let jobs = sqlx::query_as::<_, JobSummary>(
            r#"
            SELECT j.job_id, j.job_type, j.job_name, j.tags, j.created_at, latest.outcome
            FROM jobs j
            LEFT JOIN LATERAL (
                SELECT c.outcome
                FROM contracts c
                WHERE c.job_id = j.job_id
                ORDER BY c.contract_number DESC
                LIMIT 1
            ) latest ON TRUE
            ORDER BY j.created_at DESC, j.job_id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(conn)
        .await?;

        Ok(jobs)
    }
}

/// One row of the jobs index.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<Outcome>,
}

/// A job with its latest contract state and nested dependency views.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub job_type: String,
    pub request_body: Value,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub fungibility_group_id: JobId,
    pub created_at: DateTime<Utc>,
    /// Latest contract outcome; absent while a non-leaf job waits for its
    /// dependencies to produce its first contract.
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub dependencies: Vec<JobView>,
}

/// Load a job with its dependencies, recursively.
///
/// Shared dependencies appear once under each of their parents; the edges
/// form a DAG so the walk terminates.
pub fn load_view<'c>(
    conn: &'c mut PgConnection,
    job_id: JobId,
) -> Pin<Box<dyn Future<Output = Result<Option<JobView>, ApiError>> + Send + 'c>> {
    Box::pin(async move {
        let Some(job) = Job::find_by_id(conn, job_id).await? else {
            return Ok(None);
        };
        let latest = Contract::latest_for_job(conn, job_id).await?;
        let child_ids = Job::children(conn, job_id).await?;

        let mut dependencies = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            if let Some(view) = load_view(conn, child_id).await? {
                dependencies.push(view);
            }
        }

        Ok(Some(JobView {
            job_id: job.job_id,
            job_type: job.job_type,
            request_body: job.request_body,
            tags: job.tags,
            job_name: job.job_name,
            notes: job.notes,
            fungibility_group_id: job.fungibility_group_id,
            created_at: job.created_at,
            outcome: latest.as_ref().map(|c| c.outcome),
            result_body: latest.as_ref().and_then(|c| c.result_body.clone()),
            error: latest.and_then(|c| c.error),
            dependencies,
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::request_hash;
    use serde_json::json;

    fn sample_job() -> Job {
        let body = json!({"url": "http://example.com"});
        Job::builder()
            .job_type("fetch")
            .request_body(body.clone())
            .request_hash(request_hash(&body))
            .fungibility_group_id(JobId::new())
            .build()
    }

    #[test]
    fn builder_defaults_to_no_parent() {
        let job = sample_job();
        assert!(job.parent_job_id.is_none());
    }

    #[test]
    fn builder_defaults_to_empty_tags() {
        let job = sample_job();
        assert!(job.tags.is_empty());
    }

    #[test]
    fn builder_generates_distinct_job_ids() {
        assert_ne!(sample_job().job_id, sample_job().job_id);
    }

    #[test]
    fn view_serializes_outcome_as_kebab_case() {
        let job = sample_job();
        let view = JobView {
            job_id: job.job_id,
            job_type: job.job_type,
            request_body: job.request_body,
            tags: job.tags,
            job_name: None,
            notes: None,
            fungibility_group_id: job.fungibility_group_id,
            created_at: job.created_at,
            outcome: Some(Outcome::TryLater),
            result_body: None,
            error: None,
            dependencies: Vec::new(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["outcome"], "try-later");
        assert!(json.get("result_body").is_none());
    }
}
