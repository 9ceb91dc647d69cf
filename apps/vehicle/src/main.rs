use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vehicle_core::{
    config::{GpioBackend, DEFAULT_SETTINGS_FILE},
    load_settings, run_link, Dispatcher, Settings,
};

/// On-vehicle teleoperation controller.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    #[arg(long)]
    relay_url: Option<String>,
    /// Endpoint name registered with the relay.
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    camera_url: Option<String>,
    /// `log` or `gpio`.
    #[arg(long)]
    gpio_backend: Option<GpioBackend>,
    #[arg(long)]
    mediamtx_bin_path: Option<PathBuf>,
    #[arg(long)]
    mediamtx_config_path: Option<PathBuf>,
}

impl Args {
    /// Flags given on the command line take precedence over file and environment.
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.relay_url {
            settings.relay_url = v.clone();
        }
        if let Some(v) = &self.source {
            settings.source_name = v.clone();
        }
        if let Some(v) = &self.camera_url {
            settings.camera_url = Some(v.clone());
        }
        if let Some(v) = self.gpio_backend {
            settings.gpio_backend = v;
        }
        if let Some(v) = &self.mediamtx_bin_path {
            settings.mediamtx_bin_path = Some(v.clone());
        }
        if let Some(v) = &self.mediamtx_config_path {
            settings.mediamtx_config_path = Some(v.clone());
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings(&args.settings)?;
    args.apply(&mut settings);
    info!(
        relay_url = %settings.relay_url,
        source = %settings.source_name,
        gpio_backend = ?settings.gpio_backend,
        "starting vehicle"
    );

    let mut dispatcher =
        Dispatcher::from_settings(&settings).context("failed to open actuator outputs")?;
    let mut shutdown = Box::pin(shutdown_signal());
    run_link(&settings, &mut dispatcher, &mut shutdown).await?;

    info!("vehicle stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            error!(%err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
