//! Error types for lumen-sr
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Every failure here is locally recoverable: the relay reports
//! it on the event bus and keeps the queue and cursor consistent.

use thiserror::Error;

/// Main error type for the stream relay
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Appliance system database errors (renderer state probe)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// No cached or resolvable result for a query, fallback included
    #[error("Resolution failed for '{query}': {reason}")]
    Resolution { query: String, reason: String },

    /// Transcoder process failed to start or produced no output
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Stream port not yet released by a previous listener
    #[error("Stream port {0} still busy")]
    PortBusy(u16),

    /// A higher-priority audio source took over the output
    #[error("Renderer preempted playback")]
    RendererPreempted,

    /// Queue state errors (invalid index, empty queue)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Another queue advance is already in flight
    #[error("Transition already in progress")]
    Busy,

    /// Playback daemon protocol or connection errors
    #[error("Playback daemon error: {0}")]
    Player(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache document (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type using the relay Error
pub type Result<T> = std::result::Result<T, Error>;
