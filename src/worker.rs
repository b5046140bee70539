use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{options::*, types::FieldTable, BasicProperties, Channel, Consumer};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cancel::CancellationRegistry;
use crate::client::RequestSender;
use crate::runner::TestRunner;
use crate::store::{Page, RunStore};
use crate::types::{HardwareSummary, Run, RunCommand, RunStatus};

/// Sink for outgoing messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl Publisher for Channel {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default(),
        )
        .await?;
        Ok(())
    }
}

/// Messages published to the results queue.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandReply {
    Run {
        run: Run,
    },
    Page {
        page: Page<Run>,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        status: u16,
        body: String,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        test_id: Option<Uuid>,
        error: String,
    },
}

pub async fn publish_json<T: Serialize>(
    publisher: &dyn Publisher,
    queue: &str,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    publisher.publish(queue, payload).await
}

pub struct CommandHandler {
    store: Arc<dyn RunStore>,
    cancels: Arc<CancellationRegistry>,
    runner: Arc<TestRunner>,
    sender: Arc<dyn RequestSender>,
    publisher: Arc<dyn Publisher>,
    results_queue: String,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn RunStore>,
        cancels: Arc<CancellationRegistry>,
        runner: Arc<TestRunner>,
        sender: Arc<dyn RequestSender>,
        publisher: Arc<dyn Publisher>,
        results_queue: String,
    ) -> Self {
        Self {
            store,
            cancels,
            runner,
            sender,
            publisher,
            results_queue,
        }
    }

    /// Applies one command. Started runs and one-off sends execute in the
    /// background; their task handle is returned.
    pub async fn handle(&self, command: RunCommand) -> Result<Option<JoinHandle<()>>> {
        match command {
            RunCommand::Create { request } => {
                let reply = match Run::new(request).and_then(|run| self.store.save(run)) {
                    Ok(run) => {
                        info!("📝 Created test {} ({})", run.id, run.status);
                        CommandReply::Run { run }
                    }
                    Err(e) => {
                        warn!("Rejected test creation: {}", e);
                        CommandReply::Rejected {
                            test_id: None,
                            error: e.to_string(),
                        }
                    }
                };
                self.reply(&reply).await?;
                Ok(None)
            }
            RunCommand::Start { test_id } => {
                let runner = self.runner.clone();
                let publisher = self.publisher.clone();
                let queue = self.results_queue.clone();

                let handle = tokio::spawn(async move {
                    let reply = match runner.run(test_id).await {
                        Ok(run) => CommandReply::Run { run },
                        Err(e) => {
                            if e.is_precondition() {
                                warn!("Test {} not started: {}", test_id, e);
                            } else {
                                error!("❌ Test {} could not be finalized: {}", test_id, e);
                            }
                            CommandReply::Rejected {
                                test_id: Some(test_id),
                                error: e.to_string(),
                            }
                        }
                    };
                    if let Err(e) = publish_json(publisher.as_ref(), &queue, &reply).await {
                        error!("❌ Failed to publish result of test {}: {}", test_id, e);
                    }
                });
                Ok(Some(handle))
            }
            RunCommand::Cancel { test_id } => {
                let status = self.store.find_by_id(test_id)?.map(|r| r.status);
                match status {
                    Some(RunStatus::Running) => {
                        if self.cancels.request_cancel(test_id) {
                            info!("🛑 Cancel requested for test {}", test_id);
                        }
                        // The run may have ended after the status check
                        let still_running = self
                            .store
                            .find_by_id(test_id)?
                            .map_or(false, |r| !r.status.is_terminal());
                        if !still_running {
                            self.cancels.clear(test_id);
                        }
                    }
                    Some(status) => {
                        let reason = if status.is_terminal() {
                            "already finished"
                        } else {
                            "not running"
                        };
                        self.reply(&CommandReply::Rejected {
                            test_id: Some(test_id),
                            error: format!("Test {} is {} ({})", test_id, reason, status),
                        })
                        .await?;
                    }
                    None => {
                        self.reply(&CommandReply::Rejected {
                            test_id: Some(test_id),
                            error: format!("TestRun not found: {}", test_id),
                        })
                        .await?;
                    }
                }
                Ok(None)
            }
            RunCommand::Search { filter, page } => {
                let reply = match self.store.find_filtered(&filter, page) {
                    Ok(page) => CommandReply::Page { page },
                    Err(e) => CommandReply::Rejected {
                        test_id: None,
                        error: e.to_string(),
                    },
                };
                self.reply(&reply).await?;
                Ok(None)
            }
            RunCommand::Send { request } => {
                let sender = self.sender.clone();
                let publisher = self.publisher.clone();
                let queue = self.results_queue.clone();

                let handle = tokio::spawn(async move {
                    let snapshot = request.snapshot(&request.url);
                    let started = Instant::now();
                    let reply = match sender.send(&snapshot).await {
                        Ok(response) => {
                            let duration_ms = started.elapsed().as_millis() as u64;
                            info!(
                                "📬 {} {} -> {} in {} ms",
                                snapshot.method, snapshot.url, response.status, duration_ms
                            );
                            CommandReply::Response {
                                status: response.status,
                                body: response.body,
                                duration_ms,
                            }
                        }
                        Err(e) => {
                            warn!("Request to {} failed: {}", snapshot.url, e);
                            CommandReply::Rejected {
                                test_id: None,
                                error: e.to_string(),
                            }
                        }
                    };
                    if let Err(e) = publish_json(publisher.as_ref(), &queue, &reply).await {
                        error!("❌ Failed to publish response: {}", e);
                    }
                });
                Ok(Some(handle))
            }
        }
    }

    async fn reply(&self, reply: &CommandReply) -> Result<()> {
        publish_json(self.publisher.as_ref(), &self.results_queue, reply).await
    }
}

pub async fn declare_queues(channel: &Channel, queues: &[&str]) -> Result<()> {
    for queue in queues {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
    }
    Ok(())
}

/// Forwards hardware summaries to the metrics queue until the runner is gone.
pub fn spawn_hardware_publisher(
    publisher: Arc<dyn Publisher>,
    queue: String,
    mut hardware_rx: mpsc::UnboundedReceiver<HardwareSummary>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(summary) = hardware_rx.recv().await {
            if let Err(e) = publish_json(publisher.as_ref(), &queue, &summary).await {
                warn!("Failed to publish HW summary of test {}: {}", summary.test_id, e);
            }
        }
    })
}

/// Consumes commands until the consumer stream ends.
pub async fn consume(mut consumer: Consumer, handler: CommandHandler) -> Result<()> {
    info!("🎧 Waiting for load test commands...");

    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                let payload = String::from_utf8_lossy(&delivery.data);
                info!("📨 Received message: {}", payload);

                match serde_json::from_str::<RunCommand>(&payload) {
                    Ok(command) => {
                        if let Err(e) = handler.handle(command).await {
                            error!("❌ Failed to handle command: {}", e);
                        }
                        delivery.ack(BasicAckOptions::default()).await?;
                    }
                    Err(e) => {
                        error!("❌ Failed to parse message: {}", e);
                        delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await?;
                    }
                }
            }
            Err(e) => {
                error!("❌ Consumer error: {}", e);
            }
        }
    }

    Ok(())
}
