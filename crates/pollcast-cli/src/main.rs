//! Pollcast Command-Line Client
//!
//! Listen and notify on a sled-backed pollcast database.

mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollcast::PubSub;
use pollcast_sled::SledEngine;

use config::{Args, CliConfig, Command};
use error::Error;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries notifications.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();

    if let Err(e) = run(config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: CliConfig) -> Result<(), Error> {
    tracing::info!(
        data_path = ?config.engine.path,
        poll_interval = ?config.engine.poll_interval,
        "opening database"
    );
    let engine = SledEngine::new(config.engine)?;
    let pubsub = PubSub::with_config(engine.clone(), config.pubsub)?;
    for channel in &config.json_channels {
        pubsub.json(channel);
    }

    let result = match &config.command {
        Command::Listen { channels } => commands::run_listen(&pubsub, channels).await,
        Command::Notify { channel, payload } => {
            let json = config.json_channels.contains(channel);
            commands::run_notify(&pubsub, json, channel, payload)
        }
        Command::Pipe { channels } => {
            commands::run_pipe(&pubsub, &config.json_channels, channels).await
        }
    };

    pubsub.dispose();
    engine.flush()?;
    result
}
