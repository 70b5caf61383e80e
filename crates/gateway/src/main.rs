use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dq_domain::config::{Config, ConfigSeverity};
use dq_gateway::api::router::build_router;
use dq_gateway::bootstrap::build_state;
use dq_gateway::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, path) = cli::load_config(args.config.as_deref())?;
            abort_on_config_errors(&config, &path)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config(args.config.as_deref())?;
            if !cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config(args.config.as_deref())?;
            cli::show(&config);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn abort_on_config_errors(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => tracing::error!(%issue, "config error"),
            ConfigSeverity::Warning => tracing::warn!(%issue, "config warning"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("configuration errors in {}", path.display());
    }
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = build_state(config.clone());

    // Ledger retention runs in the background for the process lifetime.
    {
        let ledger = state.ledger.clone();
        let retention_days = config.ledger.retention_days;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                tick.tick().await;
                ledger.purge_older_than(retention_days).await;
            }
        });
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "dataquill gateway listening");

    axum::serve(listener, build_router(state))
        .await
        .context("server error")?;
    Ok(())
}
