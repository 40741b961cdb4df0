mod cli;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use wsbridge::Proxy;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = cli.proxy_config();
    info!(
        listen = %config.listen,
        backend = %config.backend,
        compression = !config.registry.is_empty(),
        "wsbridge starting"
    );

    let proxy = Proxy::bind(config)
        .await
        .context("failed to bind listen address")?;
    proxy
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("relay failed")?;

    info!("wsbridge stopped");
    Ok(())
}
