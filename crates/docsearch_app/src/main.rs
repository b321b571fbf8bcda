mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use client_logging::LogDestination;
use docsearch_client::DocSearchClient;

use crate::cli::Cli;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let destination = match &cli.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    client_logging::initialize(destination, cli.log_level);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(user_id) = cli.user_id {
        config.user_id = user_id;
    }

    let client = DocSearchClient::new(config.to_settings())
        .with_context(|| format!("creating client for {}", config.base_url))?;
    commands::run(&client, cli.command).await
}
