//! Run state transitions and the per-run target addressing derived when a
//! run starts.

use chrono::Utc;
use url::{form_urlencoded, Url};

use crate::error::{RunError, RunResult};
use crate::types::{RequestDefinition, Run, RunStatus, TestSummary};

/// Everything the executor and sampler need once a run entered RUNNING.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run: Run,
    pub snapshot: RequestDefinition,
    pub actuator_base: Url,
}

impl Run {
    /// Guarded WAITING/APPROVED -> RUNNING transition. Sets the effective URL
    /// and start time and captures the request snapshot. Leaves `self`
    /// untouched on error.
    pub fn begin(&mut self) -> RunResult<(RequestDefinition, Url)> {
        if !self.status.is_startable() {
            return Err(RunError::InvalidState {
                id: self.id,
                status: self.status,
            });
        }

        let effective = compose_target_url(self)?;
        let actuator_base = actuator_base(&self.request.url)?;
        let snapshot = self.request.snapshot(effective.as_str());

        self.effective_url = Some(effective.into());
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());

        Ok((snapshot, actuator_base))
    }

    pub fn finish(&mut self, summary: TestSummary) {
        self.summary = Some(summary);
        self.status = RunStatus::Finished;
        self.finished_at = Some(Utc::now());
    }

    /// Records a failed execution with a zeroed summary.
    pub fn fail(&mut self, error: &RunError) {
        let now = Utc::now();
        let duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        self.summary = Some(TestSummary::failed(self.total_requests, duration_ms));
        self.status = RunStatus::Failed;
        self.finished_at = Some(now);
        self.error_message = Some(error.to_string());
    }
}

/// Template URL with `mode`, `size` and `delay` upserted as query parameters.
pub fn compose_target_url(run: &Run) -> RunResult<Url> {
    let mut url = Url::parse(&run.request.url)
        .map_err(|e| RunError::Validation(format!("invalid url {}: {}", run.request.url, e)))?;

    if let Some(mode) = run.processing_mode {
        upsert_query_param(&mut url, "mode", mode.as_str());
    }
    if let Some(size) = run.pool_size_or_cap {
        upsert_query_param(&mut url, "size", &size.to_string());
    }
    if let Some(delay) = run.delay_ms {
        upsert_query_param(&mut url, "delay", &delay.to_string());
    }

    Ok(url)
}

/// Replaces every `name` parameter with a single `name=value` at the position
/// of the first occurrence, or appends it. Other parameters keep their raw
/// text.
pub fn upsert_query_param(url: &mut Url, name: &str, value: &str) {
    let param: String = form_urlencoded::byte_serialize(name.as_bytes())
        .chain(std::iter::once("="))
        .chain(form_urlencoded::byte_serialize(value.as_bytes()))
        .collect();

    let mut replaced = false;
    let mut segments: Vec<&str> = Vec::new();
    for segment in url.query().unwrap_or("").split('&') {
        if segment.is_empty() {
            continue;
        }
        if query_key(segment) != name {
            segments.push(segment);
        } else if !replaced {
            segments.push(&param);
            replaced = true;
        }
    }
    if !replaced {
        segments.push(&param);
    }

    let query = segments.join("&");
    url.set_query(Some(&query));
}

/// Decoded key of a raw `key[=value]` query segment.
fn query_key(segment: &str) -> String {
    let raw = segment.split('=').next().unwrap_or(segment);
    form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

/// Scheme, host and explicit port of the target, with the path dropped.
pub fn actuator_base(target_url: &str) -> RunResult<Url> {
    let target = Url::parse(target_url).map_err(|e| {
        RunError::Validation(format!(
            "Cannot resolve actuator base from test URL {}: {}",
            target_url, e
        ))
    })?;
    let host = target.host_str().ok_or_else(|| {
        RunError::Validation(format!(
            "Cannot resolve actuator base from test URL: {}",
            target_url
        ))
    })?;

    let base = match target.port() {
        Some(port) => format!("{}://{}:{}", target.scheme(), host, port),
        None => format!("{}://{}", target.scheme(), host),
    };

    Url::parse(&base).map_err(|e| RunError::Validation(e.to_string()))
}
