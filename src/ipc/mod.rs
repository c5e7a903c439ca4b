//! IPC between gateway and emulator: shared-memory video and control socket

pub mod control;
pub mod shm;

pub use control::{ControlSocket, InputFrame};
pub use shm::{FrameReader, FrameView, FrameWriter, VideoRegion};
