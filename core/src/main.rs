use clap::Parser;
use tidemq::{BrokerConfig, BrokerServer, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidemq")]
#[command(about = "A single-node AMQP-style message broker written in Rust")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value = "8085")]
    port: u16,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Virtual host served by this broker
    #[arg(long, default_value = "default")]
    vhost: String,

    /// Threads running asynchronous deliveries
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Skip fsync after each durable append
    #[arg(long)]
    no_sync: bool,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Read configuration from TIDEMQ_* environment variables instead
    #[arg(long)]
    from_env: bool,
}

impl Args {
    fn into_config(self) -> Result<BrokerConfig> {
        if self.from_env {
            return BrokerConfig::from_env();
        }

        let mut config = BrokerConfig::default()
            .with_host(&self.host)
            .with_port(self.port)
            .with_data_dir(self.data_dir)
            .with_vhost(&self.vhost)
            .with_worker_threads(self.workers);
        if self.no_sync {
            config = config.without_sync();
        }
        config.log_level = self.log_level;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;

    // RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting TideMQ broker on {}", config.bind_addr());
    info!("Data directory: {}", config.data_dir);
    info!("Virtual host: {}", config.vhost);
    info!("Worker threads: {}", config.worker_threads);
    info!("Synchronous writes: {}", config.sync_writes);

    let server = BrokerServer::new(config)?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down...");
                let _ = shutdown.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    info!("TideMQ broker stopped");
    Ok(())
}
