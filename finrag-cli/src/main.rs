use anyhow::Context;
use clap::Parser;
use finrag_cli::{Cli, Settings, run};
use finrag_telemetry::{TelemetryConfig, init_telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let telemetry = TelemetryConfig::from_env("finrag").context("invalid telemetry settings")?;
    let _guard = init_telemetry(&telemetry).context("failed to initialize telemetry")?;

    let settings = Settings::from_env().context("invalid configuration")?;
    tracing::debug!(?settings, "loaded settings");

    run(cli, settings).await
}
