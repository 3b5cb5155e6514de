use clap::Parser;
use gantry::{config::Config, core::MemoryBus, server::GantryServer};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Layer-4 TCP load balancer")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gantry.yaml")]
    config: String,
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    // Map RUST_LOG to a max level (debug/info/warn/error/trace)
    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let _ = fmt.with_max_level(level).try_init();
}

fn build_bus(config: &Config) -> Result<MemoryBus, Box<dyn std::error::Error>> {
    let mut bus = match &config.topology.initial_pool {
        Some(pool) => MemoryBus::with_pool(pool)?,
        None => MemoryBus::new(),
    };
    if let Some(path) = &config.topology.snapshot_file {
        info!("Pool snapshot persisted to {}", path);
        bus = bus.with_snapshot_file(path);
    }
    Ok(bus)
}

async fn run_with_config_path_and_shutdown(
    config_path: &str,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_yaml_file(config_path).await?;
    let bus = Arc::new(build_bus(&config)?);

    let (server, watch) = GantryServer::from_config(config, bus).await?;
    let result = server.listen_with_shutdown(shutdown).await;
    watch.abort();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    info!("Starting Gantry - Layer-4 TCP load balancer");
    run_with_config_path_and_shutdown(&args.config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;
    info!("Gantry stopped");
    Ok(())
}
