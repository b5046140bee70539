use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{RunError, RunResult};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Waiting,
    Approved,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Waiting => "WAITING",
            RunStatus::Approved => "APPROVED",
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_startable(&self) -> bool {
        matches!(self, RunStatus::Waiting | RunStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the target server is asked to process each request. Sent to the
/// target as the `mode` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingMode {
    Sequential,
    Parallel,
    Pooled,
    Capped,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Sequential => "SEQUENTIAL",
            ProcessingMode::Parallel => "PARALLEL",
            ProcessingMode::Pooled => "POOLED",
            ProcessingMode::Capped => "CAPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// GET and DELETE are sent without a body or content type.
    pub fn sends_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_reqwest())
    }
}

/// The request template of a run. Also used as the immutable snapshot handed
/// to the executor once the run starts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDefinition {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub content_type: Option<String>,
}

impl RequestDefinition {
    /// Copy of this template pointed at `effective_url`. Body-carrying methods
    /// get a JSON content type when none was configured.
    pub fn snapshot(&self, effective_url: &str) -> RequestDefinition {
        let content_type = match (&self.content_type, self.method.sends_body()) {
            (Some(ct), _) => Some(ct.clone()),
            (None, true) => Some(JSON_CONTENT_TYPE.to_string()),
            (None, false) => None,
        };

        RequestDefinition {
            url: effective_url.to_string(),
            method: self.method,
            headers: self.headers.clone(),
            body: self.body.clone(),
            content_type,
        }
    }
}

/// Payload used to create a new run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub total_requests: u32,
    pub concurrency: u32,
    pub processing_mode: Option<ProcessingMode>,
    pub pool_size_or_cap: Option<u32>,
    pub delay_ms: Option<u64>,
    pub request: RequestDefinition,
    #[serde(default)]
    pub auto_approve: bool,
}

impl CreateRunRequest {
    pub fn validate(&self) -> RunResult<()> {
        if self.total_requests < 1 {
            return Err(RunError::Validation("totalRequests must be at least 1".into()));
        }
        if self.concurrency < 1 {
            return Err(RunError::Validation("concurrency must be at least 1".into()));
        }
        if self.processing_mode.is_none() {
            return Err(RunError::Validation("processingMode is required".into()));
        }
        if self.pool_size_or_cap == Some(0) {
            return Err(RunError::Validation("poolSizeOrCap must be at least 1".into()));
        }

        let url = url::Url::parse(&self.request.url)
            .map_err(|e| RunError::Validation(format!("invalid url {}: {}", self.request.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RunError::Validation(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(RunError::Validation(format!("url has no host: {}", self.request.url)));
        }

        Ok(())
    }
}

/// One configured execution of a load test.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: Uuid,
    pub total_requests: u32,
    pub concurrency: u32,
    pub processing_mode: Option<ProcessingMode>,
    pub pool_size_or_cap: Option<u32>,
    pub delay_ms: Option<u64>,
    pub request: RequestDefinition,
    pub effective_url: Option<String>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub summary: Option<TestSummary>,
}

impl Run {
    pub fn new(request: CreateRunRequest) -> RunResult<Self> {
        request.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            total_requests: request.total_requests,
            concurrency: request.concurrency,
            processing_mode: request.processing_mode,
            pool_size_or_cap: request.pool_size_or_cap,
            delay_ms: request.delay_ms,
            request: request.request,
            effective_url: None,
            status: if request.auto_approve {
                RunStatus::Approved
            } else {
                RunStatus::Waiting
            },
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            summary: None,
        })
    }
}

/// Result of one dispatched request. Never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: u16,
    pub client_latency_ms: u64,
    pub server_processing_ms: Option<u64>,
    pub queue_wait_ms: Option<u64>,
}

/// Aggregated statistics persisted with a finished or failed run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub successes: u32,
    pub failures: u32,
    pub success_rate: f64,
    pub duration_ms: u64,
    pub throughput_rps: f64,
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_server_processing_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_server_processing_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_queue_wait_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_queue_wait_ms: Option<f64>,
}

impl TestSummary {
    /// Zeroed summary stored on a run whose execution failed.
    pub fn failed(total_requests: u32, duration_ms: u64) -> Self {
        Self {
            successes: 0,
            failures: total_requests,
            success_rate: 0.0,
            duration_ms,
            throughput_rps: 0.0,
            avg_response_time_ms: 0.0,
            p95_response_time_ms: 0.0,
            avg_server_processing_ms: None,
            p95_server_processing_ms: None,
            avg_queue_wait_ms: None,
            p95_queue_wait_ms: None,
        }
    }
}

/// Per-metric statistics gathered from the target's actuator while a run
/// was executing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSummary {
    pub test_id: Uuid,
    pub sample_count: usize,
    pub metrics: Vec<MetricSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub name: String,
    pub samples: usize,
    pub avg: f64,
    pub max: f64,
}

/// Control-plane messages consumed from the commands queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RunCommand {
    Create {
        request: CreateRunRequest,
    },
    #[serde(rename_all = "camelCase")]
    Start {
        test_id: Uuid,
    },
    #[serde(rename_all = "camelCase")]
    Cancel {
        test_id: Uuid,
    },
    Search {
        #[serde(default)]
        filter: crate::store::RunFilter,
        #[serde(default)]
        page: crate::store::PageRequest,
    },
    /// One-off request to the target, answered with its raw response.
    Send {
        request: RequestDefinition,
    },
}
