//! Configuration system for Glade.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line via clap. Unknown or missing fields fall back to defaults so
//! older and newer config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    ClientConfig, Config, DebugConfig, LobbyConfig, MAX_GRID_SIZE, RoomConfig, RoomTemplate,
    ServerConfig, default_config_dir,
};
pub use error::ConfigError;
