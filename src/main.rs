use anyhow::Result;
use lapin::{options::*, types::FieldTable, Connection, ConnectionProperties};
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

mod cancel;
mod client;
mod config;
mod error;
mod lifecycle;
mod runner;
mod sampler;
mod stats;
mod store;
#[cfg(test)]
mod testing;
mod types;
mod worker;

use cancel::CancellationRegistry;
use client::HttpSender;
use config::WorkerConfig;
use runner::TestRunner;
use sampler::ActuatorSampler;
use store::{InMemoryRunStore, RunStore};
use worker::{CommandHandler, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    info!("🚀 LoadTester Worker starting...");

    let config = WorkerConfig::from_env()?;

    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
    let cancels = Arc::new(CancellationRegistry::new());
    let sender = Arc::new(HttpSender::new(config.request_timeout)?);
    let sampler = Arc::new(ActuatorSampler::new(
        config.actuator_metrics.clone(),
        config.request_timeout,
    )?);

    let (hardware_tx, hardware_rx) = mpsc::unbounded_channel();
    let runner = Arc::new(
        TestRunner::new(store.clone(), sender.clone(), cancels.clone(), sampler)
            .with_sampling_interval(config.sampler_interval)
            .with_hardware_sink(hardware_tx),
    );

    info!("📡 Connecting to RabbitMQ at {}", config.rabbitmq_url);

    let conn = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;

    info!("✅ Connected to RabbitMQ successfully");

    worker::declare_queues(
        &channel,
        &[
            config.commands_queue.as_str(),
            config.results_queue.as_str(),
            config.metrics_queue.as_str(),
        ],
    )
    .await?;

    let publisher: Arc<dyn Publisher> = Arc::new(channel.clone());
    worker::spawn_hardware_publisher(publisher.clone(), config.metrics_queue.clone(), hardware_rx);

    let consumer = channel
        .basic_consume(
            &config.commands_queue,
            "loadtester_worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let handler = CommandHandler::new(
        store,
        cancels,
        runner,
        sender,
        publisher,
        config.results_queue.clone(),
    );

    worker::consume(consumer, handler).await
}
