use clap::Parser;

use beacon_server::ServerConfig;

/// Real-time pub/sub relay over WebSockets.
#[derive(Debug, Parser)]
#[command(name = "beacon", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8089)]
    port: u16,
    /// Outbound mailbox capacity per connection.
    #[arg(long, default_value_t = 256)]
    mailbox_capacity: usize,
    /// Broadcast intake queue capacity.
    #[arg(long, default_value_t = 1024)]
    intake_capacity: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig {
        port: args.port,
        mailbox_capacity: args.mailbox_capacity,
        intake_capacity: args.intake_capacity,
    };

    let handle = beacon_server::start(config)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "beacon ready");
    tracing::info!("websocket endpoint: ws://localhost:{}/ws", handle.port);
    tracing::info!("broadcast endpoint: http://localhost:{}/broadcast", handle.port);

    // Wait for shutdown signal. All state is in-memory: clients reconnect
    // and re-subscribe after a restart.
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}
