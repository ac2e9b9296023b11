use std::path::PathBuf;

use crate::domain::ChatId;

/// Core error type for the relay bot.
///
/// Adapter crates map their transport-specific failures into this type so the
/// router can treat every failure the same way: log it, abort the current
/// event, keep running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {path}: {reason}")]
    Store { path: PathBuf, reason: String },

    #[error("relay mapping inconsistent for chat {chat}: {reason}")]
    Mapping { chat: ChatId, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
