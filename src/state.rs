//! Shared gateway state
//!
//! One state struct passed to all components. The supervisor loop is the
//! only writer of emulator/IPC state; everything shared across tasks is an
//! explicit atomic or a mutex-guarded cell.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::GatewayConfig;
use crate::emulator::EmulatorState;
use crate::ipc::InputFrame;

/// Capacity of the browser-input queue drained by the supervisor
pub const INPUT_QUEUE_DEPTH: usize = 256;

/// Current frame dimensions, published by the supervisor and read by the
/// input relay for clamping.
#[derive(Debug, Default)]
pub struct DisplaySize {
    width: AtomicU32,
    height: AtomicU32,
}

impl DisplaySize {
    pub fn get(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }

    pub fn set(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Relaxed);
        self.height.store(height, Ordering::Relaxed);
    }
}

/// Lifecycle requests raised by the HTTP surface, consumed by the
/// supervisor on its next iteration.
#[derive(Debug, Default)]
pub struct LifecycleRequests {
    start: AtomicBool,
    stop: AtomicBool,
    restart: AtomicBool,
}

impl LifecycleRequests {
    pub fn request_start(&self) {
        self.start.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    pub fn take_start(&self) -> bool {
        self.start.swap(false, Ordering::SeqCst)
    }

    pub fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::SeqCst)
    }
}

/// Supervisor-published status for the HTTP API.
#[derive(Debug, Default)]
pub struct EmulatorStatus {
    state: Mutex<Option<EmulatorStateSnapshot>>,
}

#[derive(Debug, Clone)]
pub struct EmulatorStateSnapshot {
    pub state: EmulatorState,
    pub pid: Option<u32>,
    pub connected: bool,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl EmulatorStatus {
    pub async fn publish(&self, snapshot: EmulatorStateSnapshot) {
        *self.state.lock().await = Some(snapshot);
    }

    pub async fn snapshot(&self) -> Option<EmulatorStateSnapshot> {
        self.state.lock().await.clone()
    }
}

/// Application-wide state shared across tasks.
pub struct GatewayState {
    pub config: GatewayConfig,
    /// Current frame dimensions
    pub display: Arc<DisplaySize>,
    /// Browser input queue: DataChannel callbacks produce, supervisor drains
    pub input_tx: mpsc::Sender<InputFrame>,
    pub input_rx: Mutex<Option<mpsc::Receiver<InputFrame>>>,
    /// Lifecycle buttons from the web UI
    pub lifecycle: LifecycleRequests,
    /// Emulator status snapshot for the HTTP API
    pub status: EmulatorStatus,
    /// Frames encoded since start (stats)
    pub frames_encoded: AtomicU64,
    /// Shutdown broadcast
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config,
            display: Arc::new(DisplaySize::default()),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            lifecycle: LifecycleRequests::default(),
            status: EmulatorStatus::default(),
            frames_encoded: AtomicU64::new(0),
            shutdown_tx,
        })
    }

    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Take the input receiver; the supervisor is its single consumer.
    pub async fn take_input_rx(&self) -> Option<mpsc::Receiver<InputFrame>> {
        self.input_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_flags_are_one_shot() {
        let requests = LifecycleRequests::default();
        requests.request_restart();
        assert!(requests.take_restart());
        assert!(!requests.take_restart());
        assert!(!requests.take_start());
    }

    #[test]
    fn display_size_roundtrip() {
        let display = DisplaySize::default();
        assert_eq!(display.get(), (0, 0));
        display.set(800, 600);
        assert_eq!(display.get(), (800, 600));
    }
}
