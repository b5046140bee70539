use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::cancel::CancellationRegistry;
use crate::client::RequestSender;
use crate::error::{RunError, RunResult};
use crate::lifecycle::PreparedRun;
use crate::load_test::LoadTestExecutor;
use crate::sampler::HardwareSampler;
use crate::stats::aggregate;
use crate::store::RunStore;
use crate::types::{HardwareSummary, Run, RunStatus};

pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(100);

/// Drives a run from WAITING/APPROVED to FINISHED or FAILED.
pub struct TestRunner {
    store: Arc<dyn RunStore>,
    executor: LoadTestExecutor,
    cancels: Arc<CancellationRegistry>,
    sampler: Arc<dyn HardwareSampler>,
    sampling_interval: Duration,
    hardware_tx: Option<mpsc::UnboundedSender<HardwareSummary>>,
}

impl TestRunner {
    pub fn new(
        store: Arc<dyn RunStore>,
        sender: Arc<dyn RequestSender>,
        cancels: Arc<CancellationRegistry>,
        sampler: Arc<dyn HardwareSampler>,
    ) -> Self {
        Self {
            store,
            executor: LoadTestExecutor::new(sender, cancels.clone()),
            cancels,
            sampler,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            hardware_tx: None,
        }
    }

    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Hardware summaries of finished runs are forwarded here.
    pub fn with_hardware_sink(mut self, tx: mpsc::UnboundedSender<HardwareSummary>) -> Self {
        self.hardware_tx = Some(tx);
        self
    }

    /// Executes one run. Precondition failures are returned without touching
    /// the run; once it is RUNNING, it always ends FINISHED or FAILED.
    pub async fn run(&self, test_id: Uuid) -> RunResult<Run> {
        let PreparedRun {
            run: mut running,
            snapshot,
            actuator_base,
        } = self.prepare(test_id)?;

        info!("🧪 Starting load test: {}", test_id);

        // Sample target hardware until this scope exits
        let _sampling = SamplingGuard::start(
            self.sampler.clone(),
            test_id,
            actuator_base,
            self.sampling_interval,
            self.hardware_tx.clone(),
        );

        // Execute load test
        let result = self
            .executor
            .execute(
                test_id,
                snapshot,
                running.total_requests,
                running.concurrency,
            )
            .await
            .map(|report| aggregate(&report.outcomes, report.wall_clock_ms));

        match result {
            Ok(summary) => {
                info!(
                    "✅ Test {} finished: {}/{} ok, {} rps, p95 {} ms",
                    test_id,
                    summary.successes,
                    running.total_requests,
                    summary.throughput_rps,
                    summary.p95_response_time_ms
                );
                running.finish(summary);
            }
            Err(e) => {
                error!("❌ Test {} failed: {}", test_id, e);
                running.fail(&e);
            }
        }

        // Persist terminal state
        let saved = self.finalize(running);
        self.cancels.clear(test_id);
        saved
    }

    /// Saves the terminal record. A failed FINISHED save is retried as FAILED
    /// so the run never stays RUNNING.
    fn finalize(&self, mut run: Run) -> RunResult<Run> {
        if run.status != RunStatus::Finished {
            return self.store.save(run);
        }

        match self.store.save(run.clone()) {
            Ok(saved) => Ok(saved),
            Err(save_err) => {
                error!("❌ Failed to save finished test {}: {}", run.id, save_err);
                run.fail(&save_err);
                self.store.save(run).map_err(|retry_err| {
                    error!("❌ Failed to save failed test: {}", retry_err);
                    save_err
                })
            }
        }
    }

    /// Guard, RUNNING transition and snapshot capture as one store update.
    fn prepare(&self, test_id: Uuid) -> RunResult<PreparedRun> {
        let mut captured = None;
        let run = self.store.update(test_id, &mut |run| {
            captured = Some(run.begin()?);
            Ok(())
        })?;

        let (snapshot, actuator_base) = captured
            .ok_or_else(|| RunError::Store(format!("run {} was not prepared", test_id)))?;

        Ok(PreparedRun {
            run,
            snapshot,
            actuator_base,
        })
    }
}

/// Keeps the hardware sampler running for the lifetime of a run and stops it
/// on every exit path. Sampler failures are only logged.
struct SamplingGuard {
    sampler: Arc<dyn HardwareSampler>,
    test_id: Uuid,
    sink: Option<mpsc::UnboundedSender<HardwareSummary>>,
}

impl SamplingGuard {
    fn start(
        sampler: Arc<dyn HardwareSampler>,
        test_id: Uuid,
        base: Url,
        interval: Duration,
        sink: Option<mpsc::UnboundedSender<HardwareSummary>>,
    ) -> Self {
        if let Err(e) = sampler.start(test_id, base, interval) {
            warn!("Failed to start HW sampler for test {}: {}", test_id, e);
        }

        Self {
            sampler,
            test_id,
            sink,
        }
    }
}

impl Drop for SamplingGuard {
    fn drop(&mut self) {
        match self.sampler.stop_and_summarize(self.test_id) {
            Ok(summary) => {
                info!(
                    "📈 HW summary for test {}: {} samples",
                    self.test_id, summary.sample_count
                );
                if let Some(sink) = &self.sink {
                    let _ = sink.send(summary);
                }
            }
            Err(e) => warn!("Failed to stop HW sampler for test {}: {}", self.test_id, e),
        }
    }
}
