//! The CLI launcher: reads configuration, wires C1-C5 together, serves the
//! thin HTTP surface, and tears everything down on SIGINT/SIGTERM.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};
use config::NodeConfig;
use ilp_edge_btp::{PeerSession, SessionConfig};
use ilp_edge_connector::{BusinessLogicClient, InboundHandler, OutboundHandler};
use log::{error, info};

#[tokio::main]
async fn main() {
    let matches = App::new("ilp-edge-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bilateral ILP edge runtime")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Optional config file merged under environment variables")
                .takes_value(true),
        )
        .get_matches();

    let node_config = match NodeConfig::load(matches.value_of("config")) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(node_config.log_level.clone()),
    );
    builder.init();

    if let Err(err) = run(node_config).await {
        error!("fatal error: {}", err);
        std::process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to start the BTP session: {0}")]
    Session(#[from] ilp_edge_btp::SessionError),
    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}

async fn run(node_config: NodeConfig) -> Result<(), RunError> {
    let fulfillment_scheme = node_config.fulfillment_scheme()?;
    let peer_btp_url = node_config.peer_btp_url()?;
    let business_logic_url = node_config.business_logic_url()?;
    let _base_address = node_config.base_address()?;

    let session_config = SessionConfig {
        peer_url: peer_btp_url,
        auth_token: node_config.peer_secret.clone(),
        account_id: node_config.peer_id.clone(),
        fulfillment_scheme,
        shared_secret: Some(node_config.peer_secret.clone().into_bytes()),
        auth_timeout: Duration::from_millis(node_config.peer_auth_timeout_ms),
        keepalive_interval: Duration::from_millis(node_config.peer_ping_interval_ms),
        pong_timeout: Duration::from_millis(node_config.peer_pong_timeout_ms),
        min_backoff: Duration::from_millis(node_config.peer_reconnect_base_ms),
        max_backoff: Duration::from_millis(node_config.peer_reconnect_cap_ms),
        max_retries: node_config.peer_max_retries,
    };
    let session = Arc::new(PeerSession::new(session_config));

    let business_client = BusinessLogicClient::new(business_logic_url, node_config.business_logic_timeout());
    let inbound_handler = InboundHandler::new(business_client, fulfillment_scheme, None);
    let inbound_for_http = Arc::new(inbound_handler.clone());
    let outbound_handler = Arc::new(OutboundHandler::new(session.clone(), fulfillment_scheme, None));

    let reconnect_session = session.clone();
    tokio::spawn(async move {
        reconnect_session.run_with_reconnect(|| inbound_handler.clone()).await;
    });

    let routes = ilp_edge_connector::routes::api(
        node_config.node_id.clone(),
        session.clone(),
        inbound_for_http,
        outbound_handler,
    );
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], node_config.port).into();
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        shutdown_signal().await;
    });

    info!("ilp-edge-node '{}' listening on port {}", node_config.node_id, node_config.port);
    server.await;

    session.disconnect().await;
    info!("ilp-edge-node shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
