//! In-process stand-ins for the HTTP sender and hardware sampler.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::cancel::CancellationRegistry;
use crate::client::{RawResponse, RequestSender};
use crate::error::{SamplerError, SendError};
use crate::sampler::HardwareSampler;
use crate::types::{HardwareSummary, RequestDefinition};

/// Answers every request with 200 and a fixed body after a delay, counting
/// calls and the peak number of concurrent sends.
pub struct FakeSender {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub delay: Duration,
    /// Delay used for the first call only.
    pub first_delay: Option<Duration>,
    pub fail_every: Option<usize>,
    pub body: &'static str,
    /// Requests a cancel of the given run when the n-th call starts.
    pub cancel_after: Option<(usize, Uuid, Arc<CancellationRegistry>)>,
    pub urls: Mutex<Vec<String>>,
}

impl FakeSender {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            first_delay: None,
            fail_every: None,
            body: "",
            cancel_after: None,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RequestSender for FakeSender {
    async fn send(&self, request: &RequestDefinition) -> Result<RawResponse, SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.urls.lock().push(request.url.clone());

        if let Some((after, id, registry)) = &self.cancel_after {
            if call == *after {
                registry.request_cancel(*id);
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = match (call, self.first_delay) {
            (1, Some(first)) => first,
            _ => self.delay,
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if matches!(self.fail_every, Some(n) if call % n == 0) {
            return Err(SendError::Transport("connection reset".into()));
        }

        Ok(RawResponse {
            status: 200,
            body: self.body.to_string(),
        })
    }
}

/// Records sampler calls. Stopping a run that is not sampling fails, like
/// the real sampler does.
#[derive(Default)]
pub struct FakeSampler {
    pub started: Mutex<Vec<(Uuid, Url, Duration)>>,
    pub stops: AtomicUsize,
    pub fail_start: bool,
    active: Mutex<Vec<Uuid>>,
}

impl FakeSampler {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }
}

impl HardwareSampler for FakeSampler {
    fn start(&self, test_id: Uuid, base: Url, interval: Duration) -> Result<(), SamplerError> {
        if self.fail_start {
            return Err(SamplerError::Failed("actuator unreachable".into()));
        }
        self.started.lock().push((test_id, base, interval));
        self.active.lock().push(test_id);
        Ok(())
    }

    fn stop_and_summarize(&self, test_id: Uuid) -> Result<HardwareSummary, SamplerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock();
        let position = active
            .iter()
            .position(|id| *id == test_id)
            .ok_or(SamplerError::NotRunning(test_id))?;
        active.remove(position);

        Ok(HardwareSummary {
            test_id,
            sample_count: 0,
            metrics: Vec::new(),
        })
    }
}
