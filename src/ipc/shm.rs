//! Shared-memory video channel
//!
//! Triple-buffered video frames in POSIX shared memory. The emulator writes
//! frames, the gateway reads them for encoding. The layout is fixed and
//! byte-compatible across processes:
//!
//! Writer protocol:
//! 1. `next = (write_index + 1) % 3`; if `next == read_index` the frame is
//!    dropped (the reader still holds that slot).
//! 2. Write the full frame into slot `next`.
//! 3. Publish with a release store: `write_index := next`.
//! 4. Release-increment `frame_count` and update `timestamp_us`.
//!
//! Reader protocol:
//! 1. Acquire-load `frame_count`; unchanged means no new frame.
//! 2. Acquire-load `write_index` as `r`.
//! 3. Release-store `read_index := r` so the writer avoids that slot.
//! 4. Consume slot `r` at leisure.
//!
//! No locks needed: the writer never touches the slot the reader published
//! as `read_index`. Dropped frames are never recovered; the stream is lossy
//! by design.

use std::fs::File;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::error::{GatewayError, Result};

/// Magic word identifying a video region ("MEMU")
pub const VIDEO_MAGIC: u32 = 0x4D45_4D55;

/// IPC protocol version
pub const IPC_VERSION: u32 = 1;

/// Maximum supported frame dimensions (4K at 32bpp)
pub const MAX_WIDTH: u32 = 3840;
pub const MAX_HEIGHT: u32 = 2160;

/// Size of one frame slot
pub const MAX_FRAME_SIZE: usize = (MAX_WIDTH as usize) * (MAX_HEIGHT as usize) * 4;

/// Number of frame slots
pub const FRAME_SLOTS: usize = 3;

/// Frame pixel formats carried in the region header
pub const FORMAT_RGBA: u32 = 0;
pub const FORMAT_BGRA: u32 = 1;

/// Region header, shared between emulator and gateway.
///
/// `width`/`height`/`stride`/`format` are atomics because the emulator may
/// change the display mode mid-run; the release store on `frame_count`
/// orders them for the reader.
#[repr(C)]
pub struct VideoRegionHeader {
    pub magic: u32,
    pub version: u32,
    pub width: AtomicU32,
    pub height: AtomicU32,
    pub stride: AtomicU32,
    pub format: AtomicU32,
    _reserved: [u32; 2],
    pub write_index: AtomicU32,
    pub read_index: AtomicU32,
    pub frame_count: AtomicU64,
    pub timestamp_us: AtomicU64,
}

const HEADER_SIZE: usize = std::mem::size_of::<VideoRegionHeader>();
const REGION_SIZE: usize = HEADER_SIZE + FRAME_SLOTS * MAX_FRAME_SIZE;

/// A mapped shared video region.
///
/// The gateway creates and owns the region (and unlinks it on drop); tests
/// and diagnostic tools may instead attach to an existing one with
/// [`VideoRegion::open`], which validates the header.
pub struct VideoRegion {
    map: MmapMut,
    name: String,
    owned: bool,
}

impl VideoRegion {
    /// Create a new region, replacing any stale object with the same name.
    pub fn create(name: &str, width: u32, height: u32) -> Result<Self> {
        let _ = shm_unlink(name);

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|e| GatewayError::Startup(format!("shm_open({}) failed: {}", name, e)))?;

        let file = File::from(fd);
        file.set_len(REGION_SIZE as u64)
            .map_err(|e| GatewayError::Startup(format!("failed to size shm: {}", e)))?;

        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| GatewayError::Startup(format!("failed to map shm: {}", e)))?;

        let region = Self {
            map,
            name: name.to_string(),
            owned: true,
        };

        // ftruncate zeroed the mapping; fill in the header.
        unsafe {
            let header = &mut *(region.map.as_ptr() as *mut VideoRegionHeader);
            header.magic = VIDEO_MAGIC;
            header.version = IPC_VERSION;
            header.width.store(width, Ordering::Relaxed);
            header.height.store(height, Ordering::Relaxed);
            header.stride.store(width * 4, Ordering::Relaxed);
            header.format.store(FORMAT_RGBA, Ordering::Relaxed);
        }

        tracing::info!("Created video shared memory '{}' ({}x{})", name, width, height);
        Ok(region)
    }

    /// Attach to an existing region and validate its header.
    pub fn open(name: &str) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| GatewayError::EmulatorGone(format!("shm_open({}) failed: {}", name, e)))?;

        let file = File::from(fd);
        let len = file
            .metadata()
            .map_err(GatewayError::Io)?
            .len() as usize;
        if len < REGION_SIZE {
            return Err(GatewayError::IncompatibleChannel(format!(
                "region '{}' too small: {} bytes",
                name, len
            )));
        }

        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| GatewayError::IncompatibleChannel(format!("failed to map shm: {}", e)))?;

        let region = Self {
            map,
            name: name.to_string(),
            owned: false,
        };

        let header = region.header();
        if header.magic != VIDEO_MAGIC {
            return Err(GatewayError::IncompatibleChannel(format!(
                "bad magic 0x{:08X} in '{}'",
                header.magic, name
            )));
        }
        if header.version != IPC_VERSION {
            return Err(GatewayError::IncompatibleChannel(format!(
                "unsupported version {} in '{}'",
                header.version, name
            )));
        }
        let (w, h) = (
            header.width.load(Ordering::Relaxed),
            header.height.load(Ordering::Relaxed),
        );
        if w > MAX_WIDTH || h > MAX_HEIGHT {
            return Err(GatewayError::IncompatibleChannel(format!(
                "dimensions {}x{} exceed limits",
                w, h
            )));
        }

        Ok(region)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &VideoRegionHeader {
        unsafe { &*(self.map.as_ptr() as *const VideoRegionHeader) }
    }

    /// Borrow one frame slot.
    pub fn slot(&self, index: usize) -> &[u8] {
        let offset = HEADER_SIZE + (index % FRAME_SLOTS) * MAX_FRAME_SIZE;
        &self.map[offset..offset + MAX_FRAME_SIZE]
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        let offset = HEADER_SIZE + (index % FRAME_SLOTS) * MAX_FRAME_SIZE;
        unsafe { self.map.as_ptr().add(offset) as *mut u8 }
    }
}

impl Drop for VideoRegion {
    fn drop(&mut self) {
        if self.owned {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}

/// A borrowed view of the most recent published frame.
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub frame_count: u64,
    pub timestamp_us: u64,
}

/// Reader side of the triple-buffer protocol.
///
/// Tracks the last observed `frame_count` so [`FrameReader::poll`] returns
/// `None` when nothing new has been published. Always consumes the most
/// recent frame; gaps in `frame_count` are reported but not recovered.
#[derive(Default)]
pub struct FrameReader {
    last_count: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the last observed frame count (after a reconnect).
    pub fn reset(&mut self) {
        self.last_count = 0;
    }

    pub fn poll<'a>(&mut self, region: &'a VideoRegion) -> Option<FrameView<'a>> {
        let header = region.header();

        let count = header.frame_count.load(Ordering::Acquire);
        if count == self.last_count {
            return None;
        }
        if count > self.last_count + 1 && self.last_count != 0 {
            tracing::trace!("dropped {} frame(s)", count - self.last_count - 1);
        }
        self.last_count = count;

        let index = header.write_index.load(Ordering::Acquire) % FRAME_SLOTS as u32;
        header.read_index.store(index, Ordering::Release);

        let width = header.width.load(Ordering::Relaxed);
        let height = header.height.load(Ordering::Relaxed);
        let stride = header.stride.load(Ordering::Relaxed);
        if width == 0 || height == 0 || width > MAX_WIDTH || height > MAX_HEIGHT {
            return None;
        }

        let used = (stride as usize) * (height as usize);
        let slot = region.slot(index as usize);
        Some(FrameView {
            data: &slot[..used.min(slot.len())],
            width,
            height,
            stride,
            format: header.format.load(Ordering::Relaxed),
            frame_count: count,
            timestamp_us: header.timestamp_us.load(Ordering::Acquire),
        })
    }
}

/// Writer side of the triple-buffer protocol.
///
/// The emulator implements this contract on its side of the channel; the
/// gateway carries it for the test suite and for diagnostic tooling.
pub struct FrameWriter {
    epoch: std::time::Instant,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }

    /// Publish one frame. Returns `false` when the payload was dropped
    /// because the only free slot is held by the reader; `frame_count` still
    /// advances so the reader can detect the gap.
    pub fn publish(&self, region: &VideoRegion, data: &[u8], width: u32, height: u32) -> bool {
        let header = region.header();

        let current = header.write_index.load(Ordering::Relaxed);
        let next = (current + 1) % FRAME_SLOTS as u32;
        if next == header.read_index.load(Ordering::Acquire) {
            header.frame_count.fetch_add(1, Ordering::Release);
            return false;
        }

        header.width.store(width, Ordering::Relaxed);
        header.height.store(height, Ordering::Relaxed);
        header.stride.store(width * 4, Ordering::Relaxed);

        let len = data.len().min(MAX_FRAME_SIZE);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), region.slot_ptr(next as usize), len);
        }

        header.write_index.store(next, Ordering::Release);
        header
            .timestamp_us
            .store(self.epoch.elapsed().as_micros() as u64, Ordering::Release);
        header.frame_count.fetch_add(1, Ordering::Release);
        true
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}
