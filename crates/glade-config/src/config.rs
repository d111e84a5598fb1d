//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Largest accepted side length of a room.
pub const MAX_GRID_SIZE: f64 = 256.0;

/// Top-level configuration shared by the server binary and clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// Base rules every hosted room starts from.
    pub room: RoomConfig,
    /// Room templates and hosting limits.
    pub lobby: LobbyConfig,
    /// Client prediction and smoothing settings.
    pub client: ClientConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Listener configuration for the authoritative server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum concurrent transport connections.
    pub max_connections: usize,
}

/// Rules of one authoritative room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoomConfig {
    /// Side length of the square play area, in grid units.
    pub grid_size: f64,
    /// Maximum concurrent participants.
    pub max_participants: usize,
    /// Number of chat messages retained for late joiners.
    pub chat_history: usize,
    /// Maximum chat message length in characters, after trimming.
    pub max_chat_length: usize,
    /// Time a gather takes to complete.
    pub gather_duration_ms: u64,
    /// Time a depleted node needs to come back.
    pub respawn_duration_ms: u64,
    /// Maximum distance between a participant and a node it gathers.
    pub interaction_radius: f64,
}

/// Client-side prediction and presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Fraction of the remaining distance covered per rendered frame.
    pub interpolation_factor: f64,
    /// Remaining distance below which the rendered position snaps to target.
    pub snap_distance: f64,
    /// Distance moved per frame while a movement key is held.
    pub move_speed: f64,
    /// How long a chat bubble stays above an avatar.
    pub chat_bubble_ms: u64,
}

/// Which rooms the server may host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LobbyConfig {
    /// Template used by a plain join, which fills an open room of this
    /// template or opens a new one.
    pub default_template: String,
    /// Templates clients may open rooms from.
    pub templates: Vec<RoomTemplate>,
    /// Rooms hosted at once, across all templates.
    pub max_rooms: usize,
}

/// A kind of room clients can open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomTemplate {
    /// Key clients refer to, e.g. `"cafe"`.
    pub id: String,
    /// Name shown in room listings when the opener gives none.
    pub name: String,
    /// Capacity override; `None` keeps the base room capacity.
    #[serde(default)]
    pub max_participants: Option<usize>,
}

impl RoomTemplate {
    fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            max_participants: None,
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory for JSON log files in debug builds.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3001,
            max_connections: 256,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            grid_size: 20.0,
            max_participants: 50,
            chat_history: 50,
            max_chat_length: 100,
            gather_duration_ms: 2_000,
            respawn_duration_ms: 10_000,
            interaction_radius: 2.0,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interpolation_factor: 0.2,
            snap_distance: 0.05,
            move_speed: 0.5,
            chat_bubble_ms: 5_000,
        }
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            default_template: "lobby".to_string(),
            templates: vec![
                RoomTemplate::named("lobby", "Lobby"),
                RoomTemplate::named("cafe", "Cafe"),
                RoomTemplate::named("club", "Club"),
            ],
            max_rooms: 64,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl RoomConfig {
    /// Rejects values the room cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1.0..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(ConfigError::InvalidRoom(format!(
                "grid_size must be between 1 and {MAX_GRID_SIZE}, got {}",
                self.grid_size
            )));
        }
        if self.max_participants == 0 {
            return Err(ConfigError::InvalidRoom(
                "max_participants must be positive".to_string(),
            ));
        }
        if self.chat_history == 0 {
            return Err(ConfigError::InvalidRoom(
                "chat_history must be positive".to_string(),
            ));
        }
        if !self.interaction_radius.is_finite() || self.interaction_radius < 0.0 {
            return Err(ConfigError::InvalidRoom(format!(
                "interaction_radius must be non-negative, got {}",
                self.interaction_radius
            )));
        }
        Ok(())
    }
}

impl LobbyConfig {
    /// A template by id.
    pub fn template(&self, id: &str) -> Option<&RoomTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Rules for a room opened from template `id`, derived from `base`.
    pub fn room_config(&self, base: &RoomConfig, id: &str) -> Option<RoomConfig> {
        let template = self.template(id)?;
        let mut room = base.clone();
        if let Some(max) = template.max_participants {
            room.max_participants = max;
        }
        Some(room)
    }

    /// Rejects template sets the registry cannot host from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rooms == 0 {
            return Err(ConfigError::InvalidRoom(
                "lobby.max_rooms must be positive".to_string(),
            ));
        }
        if self.template(&self.default_template).is_none() {
            return Err(ConfigError::InvalidRoom(format!(
                "default template {:?} is not defined",
                self.default_template
            )));
        }
        for (i, template) in self.templates.iter().enumerate() {
            if self.templates[..i].iter().any(|t| t.id == template.id) {
                return Err(ConfigError::InvalidRoom(format!(
                    "template {:?} is defined twice",
                    template.id
                )));
            }
            if template.max_participants == Some(0) {
                return Err(ConfigError::InvalidRoom(format!(
                    "template {:?} has no capacity",
                    template.id
                )));
            }
        }
        Ok(())
    }
}

/// Default config directory: `<platform config dir>/glade`, or `./glade`
/// when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("glade")
}

// --- Load / Save ---

impl Config {
    /// Checks the room rules and the lobby templates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.room.validate()?;
        self.lobby.validate()
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::Read)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::Write)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 3001"));
        assert!(ron_str.contains("max_participants: 50"));
    }

    #[test]
    fn test_defaults_match_room_rules() {
        let room = RoomConfig::default();
        assert_eq!(room.grid_size, 20.0);
        assert_eq!(room.chat_history, 50);
        assert_eq!(room.max_chat_length, 100);
        assert_eq!(room.gather_duration_ms, 2_000);
        assert_eq!(room.respawn_duration_ms, 10_000);
        assert!(room.validate().is_ok());
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(server: (port: 4000))").unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.room, RoomConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(voice_chat: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.room.grid_size = 32.0;
        config.debug.log_level = "debug".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_invalid_room_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(room: (max_participants: 0))").unwrap();
        let err = Config::load_or_create(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRoom(_)));
    }

    #[test]
    fn test_grid_size_is_capped() {
        let huge = RoomConfig {
            grid_size: 3_000.0,
            ..RoomConfig::default()
        };
        assert!(matches!(huge.validate(), Err(ConfigError::InvalidRoom(_))));
        let largest = RoomConfig {
            grid_size: MAX_GRID_SIZE,
            ..RoomConfig::default()
        };
        assert!(largest.validate().is_ok());
        let nan = RoomConfig {
            grid_size: f64::NAN,
            ..RoomConfig::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_templates_derive_room_rules() {
        let mut lobby = LobbyConfig::default();
        assert!(lobby.validate().is_ok());
        lobby.templates[1].max_participants = Some(12);

        let base = RoomConfig::default();
        assert_eq!(lobby.room_config(&base, "cafe").unwrap().max_participants, 12);
        assert_eq!(lobby.room_config(&base, "club").unwrap().max_participants, 50);
        assert!(lobby.room_config(&base, "arcade").is_none());
    }

    #[test]
    fn test_bad_lobby_rejected() {
        let missing_default = LobbyConfig {
            default_template: "arcade".to_string(),
            ..LobbyConfig::default()
        };
        assert!(missing_default.validate().is_err());

        let mut duplicated = LobbyConfig::default();
        duplicated.templates.push(RoomTemplate::named("cafe", "Other Cafe"));
        assert!(duplicated.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(lobby: (max_rooms: 0))").unwrap();
        assert!(Config::load_or_create(dir.path()).is_err());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
