use log::{error, info};
use markboard_relay::{RelayServer, ServerConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Markboard relay...");

    let config = ServerConfig::from_env()?;
    match &config.allowed_origin {
        Some(origin) => info!("Accepting browser connections from {origin}"),
        None => info!("Accepting browser connections from any origin"),
    }
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Relay stopped: {e}");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down ({} connections served, {} events relayed)",
                stats.total_connections, stats.events_relayed
            );
            Ok(())
        }
    }
}
