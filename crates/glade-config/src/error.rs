//! Errors raised while loading or checking the server configuration.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config file: {0}")]
    Read(#[source] io::Error),

    /// The config directory or file could not be written.
    #[error("cannot write config file: {0}")]
    Write(#[source] io::Error),

    /// The file exists but is not valid RON for [`crate::Config`].
    #[error("config file is malformed: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// Rendering the in-memory config back to RON failed.
    #[error("config could not be rendered as RON: {0}")]
    Serialize(#[source] ron::Error),

    /// Parsed fine, but a room cannot run with these values.
    #[error("room settings rejected: {0}")]
    InvalidRoom(String),
}
