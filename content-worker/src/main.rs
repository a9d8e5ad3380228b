mod config;
mod db;
mod error;
mod llm;
mod models;
mod notify;
mod processors;
mod splitter;
mod urls;
mod vector;
mod workflow;

use std::sync::Arc;

use anyhow::Context;
use rabbitmq::{Worker, WorkerOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;

use config::{mask_secret, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    // One process runs exactly one stage.
    let stage = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROCESSOR_NAME").ok())
        .context("no stage selected; pass a stage name as argv[1] or set PROCESSOR_NAME")?;

    let config = Arc::new(Config::from_env());
    info!(
        "content-worker starting; stage={} broker={} exchange={}",
        stage,
        config.masked_broker_url(),
        config.exchange
    );
    info!(
        "API keys: openai={} gemini={} youtube={} telegram={}",
        mask_secret(&config.openai_api_key, 4, 4),
        mask_secret(&config.gemini_api_key, 4, 4),
        mask_secret(&config.youtube_api_key, 4, 4),
        mask_secret(&config.telegram_bot_token, 4, 4),
    );

    let processor = workflow::create_processor(config.clone(), &stage)?;
    let worker = Worker::new(
        WorkerOptions {
            amqp_url: config.broker_url.clone(),
            exchange: config.exchange.clone(),
            processing_timeout: config.processing_timeout,
            max_retries: config.max_retries,
        },
        processor,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    worker.run(shutdown).await?;

    info!("content-worker stopped cleanly; stage={}", stage);
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}
