//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the WebSocket handshake, the HTTP
//! submission endpoint, connect retry, and a [`session::ComfyUISession`]
//! that demultiplexes one shared event channel into per-prompt waits.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod session;
pub mod tracker;
