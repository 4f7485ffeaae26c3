mod cli;
mod commands;

use clap::Parser;
use studio_proto::config::Config;
use studio_proto::platform;
use studio_proto::session::{FileSessionStore, SessionContext};
use studio_sync::{ApiClient, ApiError};

use crate::cli::{Cli, Command};
use crate::commands::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("studio.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins; otherwise keep HTTP client internals quiet
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,studio_sync=debug,studio=debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    if matches!(cli.command, Command::Watch { .. }) {
        eprintln!("studio log: {}", log_path.display());
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Config unreadable, using defaults: {:#}", e);
        Config::default()
    });
    if let Some(url) = cli.api_url.clone() {
        config.api.base_url = url;
    }
    tracing::info!("studio starting (api={})", config.api.endpoint());

    let session = SessionContext::load(Box::new(FileSessionStore::new(
        config.paths.session_file.clone(),
    )))?;
    let api = ApiClient::new(&config.api)?.with_token(session.token().map(str::to_string));

    let mut app = App {
        config,
        session,
        api,
    };

    if let Err(e) = app.dispatch(cli.command).await {
        tracing::error!("Command failed: {:#}", e);
        eprintln!("error: {:#}", e);
        if e
            .downcast_ref::<ApiError>()
            .is_some_and(ApiError::needs_login)
        {
            eprintln!("Log in with `studio login <username>`.");
        }
        std::process::exit(1);
    }
    Ok(())
}
