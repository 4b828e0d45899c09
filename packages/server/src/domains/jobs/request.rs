//! Client-facing submission payloads.
//!
//! A job request may declare dependencies, each of which is either a full
//! inline child description (itself allowed to carry dependencies) or a
//! reference to a job that already exists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiError;
use crate::common::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Optional in the body; the submission id in the path wins. When both
    /// are present they must agree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub job_type: String,
    #[serde(default)]
    pub request_body: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fungibility_group_id: Option<JobId>,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, request_body: Value) -> Self {
        Self {
            job_id: None,
            job_type: job_type.into(),
            request_body,
            tags: Vec::new(),
            job_name: None,
            notes: None,
            dependencies: Vec::new(),
            fungibility_group_id: None,
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyRequest) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.job_type.trim().is_empty() {
            return Err(ApiError::invalid("job_type must not be empty"));
        }
        Ok(())
    }
}

/// One declared dependency of a job.
///
/// Variant order matters for deserialization: a payload carrying a
/// `job_type` is an inline child; a bare `{"job_id": ...}` is a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRequest {
    Inline(JobRequest),
    Existing { job_id: JobId },
}

impl DependencyRequest {
    pub fn on_job(job_id: JobId) -> Self {
        DependencyRequest::Existing { job_id }
    }

    pub fn inline(request: JobRequest) -> Self {
        DependencyRequest::Inline(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_parses() {
        let request: JobRequest =
            serde_json::from_value(json!({"job_type": "fetch", "request_body": {"url": "x"}}))
                .unwrap();
        assert_eq!(request.job_type, "fetch");
        assert!(request.dependencies.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_job_type_fails_validation() {
        let request = JobRequest::new("  ", Value::Null);
        let err = request.validate().unwrap_err();
        assert_eq!(err.code(), "invalid-payload");
    }

    #[test]
    fn bare_job_id_parses_as_reference() {
        let id = JobId::new();
        let dep: DependencyRequest = serde_json::from_value(json!({"job_id": id})).unwrap();
        match dep {
            DependencyRequest::Existing { job_id } => assert_eq!(job_id, id),
            DependencyRequest::Inline(_) => panic!("expected a reference"),
        }
    }

    #[test]
    fn payload_with_job_type_parses_as_inline() {
        let dep: DependencyRequest =
            serde_json::from_value(json!({"job_type": "fetch", "request_body": {}})).unwrap();
        assert!(matches!(dep, DependencyRequest::Inline(_)));
    }

    #[test]
    fn inline_dependency_may_carry_its_own_id() {
        let id = JobId::new();
        let dep: DependencyRequest =
            serde_json::from_value(json!({"job_id": id, "job_type": "fetch"})).unwrap();
        match dep {
            DependencyRequest::Inline(request) => assert_eq!(request.job_id, Some(id)),
            DependencyRequest::Existing { .. } => panic!("expected an inline child"),
        }
    }

    #[test]
    fn dependencies_nest() {
        let request: JobRequest = serde_json::from_value(json!({
            "job_type": "report",
            "dependencies": [
                {"job_type": "fetch", "dependencies": [{"job_type": "resolve"}]}
            ]
        }))
        .unwrap();
        let DependencyRequest::Inline(child) = &request.dependencies[0] else {
            panic!("expected inline child");
        };
        assert_eq!(child.dependencies.len(), 1);
    }
}
