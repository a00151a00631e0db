use std::fs::File;
use std::io::Read;

use anyhow::Context as _;
use cloud_provider::{shim, Capability, CloudProvider, Registry};
use supervisor::config::Config;
use supervisor::version::PROGRAM;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = Config::new_from_flags(env!("CARGO_PKG_VERSION"));

    let mut registry = Registry::new();
    shim::register(&mut registry)?;
    let provider = if config.disable_cloud_controller {
        None
    } else {
        Some(build_cloud_provider(&registry, &config)?)
    };
    if let Some(provider) = &provider {
        let supported: Vec<String> = Capability::ALL
            .iter()
            .filter(|c| provider.supports(**c))
            .map(|c| format!("{:?}", c))
            .collect();
        info!(provider = %provider.provider_name(), ?supported, "Cloud provider ready");
    }

    let shutdown = CancellationToken::new();
    let _context = supervisor::bootstrap(&config, &shutdown).await?;

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("Shutting down");
    shutdown.cancel();
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().compact())
        .with(env_filter)
        .try_init()?;
    Ok(())
}

fn build_cloud_provider(
    registry: &Registry,
    config: &Config,
) -> anyhow::Result<Box<dyn CloudProvider>> {
    let provider = match &config.cloud_config {
        Some(path) => {
            let mut file = File::open(path)
                .with_context(|| format!("unable to open cloud config {}", path.display()))?;
            registry.get(PROGRAM, Some(&mut file as &mut dyn Read))?
        }
        None => registry.get(PROGRAM, None)?,
    };
    Ok(provider)
}
