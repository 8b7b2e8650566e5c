//! Control surface for the relay
//!
//! Axum HTTP API on the control port: playback verbs, queue inspection and
//! editing, and an SSE event stream mirroring the broadcast bus.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{run, AppContext};
