//! Error types for the engine, its sinks, and configuration parsing.

use thiserror::Error;

/// Failure reported by an event sink for a single emit call.
///
/// The generator treats every sink error as transient: the event is dropped
/// and the loop continues.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The output could not be opened
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The output refused this particular event
    #[error("event rejected: {0}")]
    Rejected(String),

    /// Every downstream consumer has gone away
    #[error("sink disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from loading or parsing configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown note name: {0}")]
    UnknownNote(String),

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("unknown texture: {0}")]
    UnknownTexture(String),
}

/// Errors surfaced to the caller by `Engine::start`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open event sink: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to spawn generator thread: {0}")]
    Spawn(std::io::Error),
}
