use anyhow::Context;
use clap::Parser;
use decoy::config::ServerConfig;
use decoy::ImposterManager;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "decoy", version, about = "Multi-protocol imposter server")]
struct Args {
    /// Imposter configuration file (YAML or JSON)
    #[arg(short, long, env = "DECOY_CONFIG")]
    config: Option<PathBuf>,
    /// Bind address for imposters without an explicit host
    #[arg(long, env = "DECOY_HOST")]
    host: Option<String>,
    /// Allow inject, decorate, shellTransform and function waits
    #[arg(long, env = "DECOY_ALLOW_INJECTION")]
    allow_injection: bool,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "DECOY_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    config.allow_injection |= args.allow_injection;

    let manager = ImposterManager::new(config.host.clone(), config.allow_injection);
    for imposter in config.imposters {
        let port = imposter.port;
        let created = manager
            .create_imposter(imposter)
            .await
            .with_context(|| match port {
                Some(port) => format!("Failed to start imposter on port {port}"),
                None => "Failed to start imposter".to_string(),
            })?;
        info!("Started {} imposter on port {}", created.protocol(), created.port());
    }

    info!(
        "decoy running with {} imposter(s), injection {}",
        manager.count(),
        if config.allow_injection { "enabled" } else { "disabled" }
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    manager.delete_all().await;
    Ok(())
}
