//! The Glade room server: authoritative rooms, opened on demand from the
//! configured templates, behind one TCP listener.

mod bridge;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use glade_config::{CliArgs, Config, default_config_dir};
use glade_multiplayer::RoomRegistry;
use glade_net::{TransportConfig, TransportServer};

use crate::bridge::Bridge;

/// Capacity of the transport-to-application event channel.
const TRANSPORT_EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    config.validate()?;

    glade_log::init_logging(cfg!(debug_assertions), Some(&config));
    info!("Config directory: {}", config_dir.display());

    let ip: IpAddr = config.server.bind_address.parse()?;
    let mut transport_config = TransportConfig::new(SocketAddr::new(ip, config.server.port));
    transport_config.max_connections = config.server.max_connections;

    let (outgoing_tx, outgoing) = mpsc::unbounded_channel();
    let rooms = RoomRegistry::new(config.room.clone(), config.lobby.clone(), outgoing_tx);
    info!(
        "Hosting up to {} rooms, default template {:?}",
        config.lobby.max_rooms, config.lobby.default_template
    );

    let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
    let transport = Arc::new(TransportServer::new(transport_config, events_tx));
    let bridge = Bridge::new(rooms, transport.connections());

    let listener = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.run().await })
    };

    tokio::select! {
        () = bridge.run(events_rx, outgoing) => {
            info!("Bridge stopped");
        }
        result = listener => {
            result??;
            info!("Listener stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    transport.shutdown();
    info!("Server stopped");
    Ok(())
}
