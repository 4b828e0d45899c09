//! Job graph engine.
//!
//! Turns submitted job trees into rows and contracts, keeps the dependency
//! DAG consistent while workers mutate it, and cascades pause/retry across
//! subtrees. Everything here runs on a caller-owned transaction.

use std::future::Future;
use std::pin::Pin;

use sqlx::PgConnection;
use tracing::debug;

use crate::api::ApiError;
use crate::common::{request_hash, JobId};
use crate::domains::contracts::Contract;
use crate::domains::jobs::job::Job;
use crate::domains::jobs::request::{DependencyRequest, JobRequest};

type GraphFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'c>>;

/// Submit a job tree.
///
/// Idempotent on `job_id`: resubmitting with an equivalent request body is
/// a no-op, a different body is a conflict. Declared dependencies are
/// inserted recursively; every leaf gets an immediately claimable contract,
/// non-leaf jobs stay contract-less until their dependencies succeed.
pub async fn put_job(
    conn: &mut PgConnection,
    job_id: JobId,
    request: &JobRequest,
) -> Result<(), ApiError> {
    if let Some(body_id) = request.job_id {
        if body_id != job_id {
            return Err(ApiError::invalid(
                "job_id in the request body does not match the submission id",
            ));
        }
    }
    insert_tree(conn, job_id, request, None).await
}

/// Insert one node of a submitted tree, then its dependencies.
fn insert_tree<'c>(
    conn: &'c mut PgConnection,
    job_id: JobId,
    request: &'c JobRequest,
    parent: Option<JobId>,
) -> GraphFuture<'c, ()> {
    Box::pin(async move {
        request.validate()?;

        let hash = request_hash(&request.request_body);
        if let Some(existing) = Job::find_by_id(conn, job_id).await? {
            if existing.request_hash == hash {
                // Same job resubmitted; nothing to do.
                return Ok(());
            }
            return Err(ApiError::Conflict { job_id });
        }

        Job::builder()
            .job_id(job_id)
            .job_type(request.job_type.clone())
            .request_body(request.request_body.clone())
            .request_hash(hash)
            .tags(request.tags.clone())
            .job_name(request.job_name.clone())
            .notes(request.notes.clone())
            .fungibility_group_id(request.fungibility_group_id.unwrap_or(job_id))
            .parent_job_id(parent)
            .build()
            .insert(conn)
            .await?;

        for dependency in &request.dependencies {
            attach_dependency(conn, job_id, dependency).await?;
        }

        // Leaves are claimable at once. So is a job whose declared
        // dependencies all point at jobs that already succeeded.
        if request.dependencies.is_empty() || dependencies_satisfied(conn, job_id).await? {
            Contract::create(conn, job_id, None).await?;
        }

        debug!(%job_id, job_type = %request.job_type, "inserted job");
        Ok(())
    })
}

/// Record one dependency of `parent_id`, inserting the child when it is an
/// inline description and merely linking when it references an existing
/// job.
pub fn attach_dependency<'c>(
    conn: &'c mut PgConnection,
    parent_id: JobId,
    dependency: &'c DependencyRequest,
) -> GraphFuture<'c, ()> {
    Box::pin(async move {
        let child_id = match dependency {
            DependencyRequest::Existing { job_id } => {
                if Job::find_by_id(conn, *job_id).await?.is_none() {
                    return Err(ApiError::invalid(format!(
                        "dependency references unknown job {job_id}"
                    )));
                }
                *job_id
            }
            DependencyRequest::Inline(request) => {
                let child_id = request.job_id.unwrap_or_else(JobId::new);
                insert_tree(conn, child_id, request, Some(parent_id)).await?;
                child_id
            }
        };

        ensure_acyclic(conn, parent_id, child_id).await?;
        link(conn, parent_id, child_id).await?;
        Ok(())
    })
}

async fn link(
    conn: &mut PgConnection,
    parent_id: JobId,
    child_id: JobId,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO job_dependencies (parent_job_id, child_job_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(parent_id)
    .bind(child_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Reject an edge that would make `parent_id` reachable from `child_id`.
async fn ensure_acyclic(
    conn: &mut PgConnection,
    parent_id: JobId,
    child_id: JobId,
) -> Result<(), ApiError> {
    if parent_id == child_id {
        return Err(ApiError::invalid("a job cannot depend on itself"));
    }

    let closes_cycle = sqlx::query_scalar::<_, bool>(
        r#"
        WITH RECURSIVE downstream AS (
            SELECT child_job_id
            FROM job_dependencies
            WHERE parent_job_id = $1
            UNION
            SELECT d.child_job_id
            FROM job_dependencies d
            JOIN downstream s ON d.parent_job_id = s.child_job_id
        )
        SELECT EXISTS (SELECT 1 FROM downstream WHERE child_job_id = $2)
        "#,
    )
    .bind(child_id)
    .bind(parent_id)
    .fetch_one(conn)
    .await?;

    if closes_cycle {
        return Err(ApiError::invalid("dependency would create a cycle"));
    }
    Ok(())
}

/// Whether every dependency of a job has a latest contract in `success`.
async fn dependencies_satisfied(
    conn: &mut PgConnection,
    job_id: JobId,
) -> Result<bool, ApiError> {
    let satisfied = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT NOT EXISTS (
            SELECT 1
            FROM job_dependencies d
            LEFT JOIN LATERAL (
                SELECT cc.outcome
                FROM contracts cc
                WHERE cc.job_id = d.child_job_id
                ORDER BY cc.contract_number DESC
                LIMIT 1
            ) latest ON TRUE
            WHERE d.parent_job_id = $1
              AND (latest.outcome IS NULL OR latest.outcome <> 'success')
        )
        "#,
    )
    .bind(job_id)
    .fetch_one(conn)
    .await?;

    Ok(satisfied)
}

/// React to a child job finishing successfully: every parent whose
/// dependencies are now all satisfied and which never had a contract gets
/// its first one. Parents re-blocked by `add-dependencies` already hold a
/// waiting contract and become claimable without help.
pub async fn on_dependency_success(
    conn: &mut PgConnection,
    child_job_id: JobId,
) -> Result<(), ApiError> {
    let released = sqlx::query_scalar::<_, JobId>(
        r#"
        SELECT d.parent_job_id
        FROM job_dependencies d
        WHERE d.child_job_id = $1
          AND NOT EXISTS (
              SELECT 1 FROM contracts c WHERE c.job_id = d.parent_job_id
          )
          AND NOT EXISTS (
              SELECT 1
              FROM job_dependencies d2
              LEFT JOIN LATERAL (
                  SELECT cc.outcome
                  FROM contracts cc
                  WHERE cc.job_id = d2.child_job_id
                  ORDER BY cc.contract_number DESC
                  LIMIT 1
              ) latest ON TRUE
              WHERE d2.parent_job_id = d.parent_job_id
                AND (latest.outcome IS NULL OR latest.outcome <> 'success')
          )
        "#,
    )
    .bind(child_job_id)
    .fetch_all(&mut *conn)
    .await?;

    for parent_id in released {
        Contract::create(conn, parent_id, None).await?;
        debug!(job = %parent_id.short(), "dependencies satisfied, job released");
    }

    Ok(())
}

/// Cancel the whole subtree rooted at `job_id`: every waiting or running
/// contract among the job and its descendants becomes `cancelled`.
/// Contracts that already finished keep their outcome.
pub async fn cascade_pause(conn: &mut PgConnection, job_id: JobId) -> Result<u64, ApiError> {
    let result = sqlx::query(
        r#"
        WITH RECURSIVE subtree AS (
            SELECT $1::uuid AS job_id
            UNION
            SELECT d.child_job_id
            FROM job_dependencies d
            JOIN subtree s ON d.parent_job_id = s.job_id
        )
        UPDATE contracts c
        SET outcome = 'cancelled', finished_at = NOW()
        FROM subtree s
        WHERE c.job_id = s.job_id
          AND c.outcome IN ('waiting', 'running')
        "#,
    )
    .bind(job_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Re-issue waiting contracts across the subtree rooted at `job_id` for
/// every job whose latest contract ended `cancelled` or `error`.
/// Successful descendants are not re-executed. Contract ids are minted
/// here rather than in SQL so retried contracts keep the time-ordered id
/// form every other creation path uses.
pub async fn cascade_retry(conn: &mut PgConnection, job_id: JobId) -> Result<u64, ApiError> {
    let failed = sqlx::query_scalar::<_, JobId>(
        r#"
        WITH RECURSIVE subtree AS (
            SELECT $1::uuid AS job_id
            UNION
            SELECT d.child_job_id
            FROM job_dependencies d
            JOIN subtree s ON d.parent_job_id = s.job_id
        )
        SELECT latest.job_id
        FROM (
            SELECT DISTINCT ON (c.job_id) c.job_id, c.outcome
            FROM contracts c
            JOIN subtree s ON s.job_id = c.job_id
            ORDER BY c.job_id, c.contract_number DESC
        ) latest
        WHERE latest.outcome IN ('cancelled', 'error')
        "#,
    )
    .bind(job_id)
    .fetch_all(&mut *conn)
    .await?;

    for failed_job in &failed {
        Contract::create(conn, *failed_job, None).await?;
    }

    Ok(failed.len() as u64)
}
