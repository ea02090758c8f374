use clap::Parser;
use getnet_pos::application::service::PaymentService;
use getnet_pos::interfaces::cli::Cli;
use getnet_pos::interfaces::json::result_writer::ResultWriter;
use miette::{IntoDiagnostic, Result};
use std::io;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, stdout carries only JSON results
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = cli.config.into_config().into_diagnostic()?;
    let service = PaymentService::from_config(&config).into_diagnostic()?;
    let service = PaymentService::install_default(service).into_diagnostic()?;

    let mut writer = ResultWriter::new(io::stdout(), cli.pretty);
    cli.command
        .run(&service, &mut writer)
        .await
        .into_diagnostic()?;

    Ok(())
}
