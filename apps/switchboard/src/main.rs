use clap::Parser;
use tracing::info;

use switchboard::cli::Cli;
use switchboard::config::Config;
use switchboard::websocket::RelayState;

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);

    info!("Starting switchboard relay on port {}", config.port);
    if config.presence_replies {
        info!("Presence replies enabled");
    }

    let state = RelayState::new(config.presence_replies);
    let app = switchboard::app(state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("Switchboard listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
