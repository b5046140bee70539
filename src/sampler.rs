use log::{debug, info};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::error::SamplerError;
use crate::stats::round2;
use crate::types::{HardwareSummary, MetricSummary};

/// Polls the target's hardware metrics while a run executes.
pub trait HardwareSampler: Send + Sync {
    fn start(&self, test_id: Uuid, base: Url, interval: Duration) -> Result<(), SamplerError>;

    /// Stops sampling and summarizes what was collected. Fails with
    /// `NotRunning` when no sampler is active for the run.
    fn stop_and_summarize(&self, test_id: Uuid) -> Result<HardwareSummary, SamplerError>;
}

#[derive(Debug, Default)]
struct Samples {
    ticks: usize,
    values: Vec<(String, Vec<f64>)>,
}

impl Samples {
    fn new(metrics: &[String]) -> Self {
        Self {
            ticks: 0,
            values: metrics.iter().map(|m| (m.clone(), Vec::new())).collect(),
        }
    }

    fn summarize(&self, test_id: Uuid) -> HardwareSummary {
        let metrics = self
            .values
            .iter()
            .map(|(name, values)| {
                let avg = if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                };
                let max = values.iter().copied().fold(0.0_f64, f64::max);
                MetricSummary {
                    name: name.clone(),
                    samples: values.len(),
                    avg: round2(avg),
                    max: round2(max),
                }
            })
            .collect();

        HardwareSummary {
            test_id,
            sample_count: self.ticks,
            metrics,
        }
    }
}

struct ActiveSampler {
    handle: JoinHandle<()>,
    samples: Arc<Mutex<Samples>>,
}

/// Samples Spring Boot style `/actuator/metrics/{name}` endpoints.
pub struct ActuatorSampler {
    client: Client,
    metrics: Vec<String>,
    active: Mutex<HashMap<Uuid, ActiveSampler>>,
}

impl ActuatorSampler {
    pub fn new(metrics: Vec<String>, timeout: Duration) -> Result<Self, SamplerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SamplerError::Failed(e.to_string()))?;

        Ok(Self {
            client,
            metrics,
            active: Mutex::new(HashMap::new()),
        })
    }
}

impl HardwareSampler for ActuatorSampler {
    fn start(&self, test_id: Uuid, base: Url, interval: Duration) -> Result<(), SamplerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SamplerError::Failed(e.to_string()))?;

        let samples = Arc::new(Mutex::new(Samples::new(&self.metrics)));
        let task_samples = samples.clone();
        let client = self.client.clone();
        let metrics = self.metrics.clone();

        info!("📈 Sampling {} every {:?} for test {}", base, interval, test_id);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for (idx, name) in metrics.iter().enumerate() {
                    match fetch_metric(&client, &base, name).await {
                        Ok(value) => task_samples.lock().values[idx].1.push(value),
                        Err(e) => debug!("metric {} unavailable for test {}: {}", name, test_id, e),
                    }
                }
                task_samples.lock().ticks += 1;
            }
        });

        let previous = self
            .active
            .lock()
            .insert(test_id, ActiveSampler { handle, samples });
        if let Some(previous) = previous {
            previous.handle.abort();
        }

        Ok(())
    }

    fn stop_and_summarize(&self, test_id: Uuid) -> Result<HardwareSummary, SamplerError> {
        let active = self
            .active
            .lock()
            .remove(&test_id)
            .ok_or(SamplerError::NotRunning(test_id))?;
        active.handle.abort();

        let summary = active.samples.lock().summarize(test_id);
        Ok(summary)
    }
}

async fn fetch_metric(client: &Client, base: &Url, name: &str) -> Result<f64, SamplerError> {
    let url = base
        .join(&format!("actuator/metrics/{}", name))
        .map_err(|e| SamplerError::Failed(e.to_string()))?;

    let body: Value = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| SamplerError::Failed(e.to_string()))?
        .json()
        .await
        .map_err(|e| SamplerError::Failed(e.to_string()))?;

    body.get("measurements")
        .and_then(|m| m.get(0))
        .and_then(|m| m.get("value"))
        .and_then(Value::as_f64)
        .ok_or_else(|| SamplerError::Failed(format!("no measurement for {}", name)))
}
