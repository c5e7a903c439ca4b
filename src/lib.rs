//! macemu-gateway - browser access to classic Macintosh emulators
//!
//! A standalone gateway that launches a BasiliskII / SheepShaver emulator,
//! reads its framebuffer from a triple-buffered shared-memory channel,
//! streams H.264 video to browsers over WebRTC, and relays browser input
//! back over a Unix-domain control socket.

pub mod config;
pub mod emulator;
pub mod error;
pub mod input;
pub mod ipc;
pub mod rtp;
pub mod state;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{GatewayError, Result};
