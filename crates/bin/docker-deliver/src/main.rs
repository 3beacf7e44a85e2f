//! Command-line entry point for docker-deliver.
//!
//! `save` packages a compose project into an offline bundle; `mcp` serves
//! the same pipeline as Model Context Protocol tools over stdio or
//! streamable HTTP.

mod config;
mod registry;

use std::process::ExitCode;

use clap::Parser;
use deliver_core::deliver::{DeliverClient, DeliverConfig, LogLevel};
use deliver_core::engine::EngineClient;
use deliver_mcp::server::{McpServer, McpServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Command, McpArgs};
use crate::registry::build_registry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(err.as_ref());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Save(args) => {
            let config = DeliverConfig::try_from(&args)?;
            init_tracing(config.log_level, false);
            run_save(config).await
        }
        Command::Mcp(args) => {
            let level: LogLevel = args.loglevel.parse()?;
            init_tracing(level, args.log_protocol);
            run_mcp(&args).await
        }
    }
}

/// Logs go to stderr; stdout stays free for the stdio MCP transport.
fn init_tracing(level: LogLevel, log_protocol: bool) {
    let mut directives = level.as_str().to_string();
    if log_protocol {
        directives.push_str(",docker_deliver::wire=trace");
    }
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_save(config: DeliverConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = DeliverClient::new(config)?;
    let engine = EngineClient::connect(None)?;
    let report = client.deliver(&engine).await?;
    info!(
        project = %report.project,
        built = report.built.len(),
        images = report.images.len(),
        manifest = %report.manifest_path.display(),
        "bundle complete"
    );
    Ok(())
}

async fn run_mcp(args: &McpArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry()?;
    let server = McpServer::new(McpServerConfig::from(args), registry);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                interrupt.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for interrupt"),
        }
    });

    server.run(cancel).await?;
    Ok(())
}

fn report_error(err: &dyn std::error::Error) {
    eprintln!("error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}
