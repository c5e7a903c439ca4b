//! Frame format definitions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ipc::shm;

/// Pixel layout of the shared-memory framebuffer. Fixed by the IPC contract
/// to packed four-byte little-endian pixels; only the channel order varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    Rgba,
    Bgra,
}

impl PixelFormat {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            shm::FORMAT_RGBA => Some(PixelFormat::Rgba),
            shm::FORMAT_BGRA => Some(PixelFormat::Bgra),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgba => write!(f, "RGBA"),
            PixelFormat::Bgra => write!(f, "BGRA"),
        }
    }
}

/// Frame dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.width <= shm::MAX_WIDTH
            && self.height <= shm::MAX_HEIGHT
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Classic Mac default
    pub const SVGA: Resolution = Resolution {
        width: 800,
        height: 600,
    };
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const UHD4K: Resolution = Resolution {
        width: 3840,
        height: 2160,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
