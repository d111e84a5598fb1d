//! Command-line argument parsing for the Glade server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Glade server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "glade-server", about = "Authoritative Glade room server")]
pub struct CliArgs {
    /// Address to bind to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum concurrent participants in the room.
    #[arg(long)]
    pub max_participants: Option<usize>,

    /// Side length of the play area.
    #[arg(long)]
    pub grid_size: Option<f64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.server.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(max) = args.max_participants {
            self.room.max_participants = max;
        }
        if let Some(size) = args.grid_size {
            self.room.grid_size = size;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(4100),
            max_participants: Some(8),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.room.max_participants, 8);
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.room.grid_size, 20.0);
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["glade-server", "--port", "5000", "--grid-size", "12"]);
        assert_eq!(args.port, Some(5000));
        assert_eq!(args.grid_size, Some(12.0));
        assert!(args.config.is_none());
    }
}
