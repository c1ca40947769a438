//! Queue server binary for nowserving.
//!
//! # Startup Sequence
//!
//! 1. Read `nowserving.yaml` (or `$NOWSERVING_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Apply environment overrides and validate
//! 4. Build the push hub, or connect the pull store
//! 5. Serve until `Ctrl-C`

use std::sync::Arc;

use anyhow::Context;
use nowserving_core::NowservingConfig;
use nowserving_core::config::LoggingConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Read configuration.
    let mut config =
        NowservingConfig::from_default_location().context("failed to read configuration")?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("nowserving-server starting");

    // 3. Environment overrides and validation.
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        transport = config.server.transport.as_str(),
        store = config.store.backend.as_str(),
        "Configuration loaded"
    );

    // 4. Build the transport.
    let state = nowserving_server::build_state(&config)
        .await
        .context("failed to set up the state store")?;

    // 5. Serve.
    nowserving_server::start_server(&config.server, Arc::new(state)).await?;

    info!("nowserving-server exited cleanly");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
