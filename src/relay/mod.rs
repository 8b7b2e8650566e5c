//! Local stream relay: per-track HTTP listener plus transcoder supervision

pub mod server;
pub mod transcode;

pub use server::{wait_port_released, SessionHooks, StreamServer, TranscoderSlot, STREAM_PATH};
pub use transcode::{TranscodeSession, StreamEnd};
