//! # Lumen Stream Relay (lumen-sr)
//!
//! Local stream relay and playback sequencer for a home audio appliance.
//!
//! **Purpose:** Resolve free-text track references to remote media, relay
//! them through a local transcoded MP3 endpoint, and drive the appliance's
//! playback daemon through a reference-log queue with explicit transition
//! semantics.
//!
//! **Architecture:** One tokio process: an axum control surface with SSE,
//! a sequencer owning queue and transitions, and a per-track stream
//! listener feeding a spawned transcoder's output to the daemon.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod player;
pub mod relay;
pub mod renderer;
pub mod resolver;
pub mod sequencer;
pub mod songlog;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
