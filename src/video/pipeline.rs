//! Supervisor and video pipeline
//!
//! One loop owns the emulator lifecycle, the control socket, the
//! shared-memory reader, the encoder, and the RTP counters. Per iteration it
//! pumps the emulator, accepts or health-checks the control connection,
//! polls for a new frame, encodes, packetizes, and fans out to peers. No
//! error escapes the loop; failures are logged and the loop carries on.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::emulator::{prefs, EmulatorController};
use crate::error::Result;
use crate::ipc::{ControlSocket, FrameReader, InputFrame, VideoRegion};
use crate::rtp::RtpPacketizer;
use crate::state::{EmulatorStateSnapshot, GatewayState};
use crate::webrtc::PeerSessionManager;

use super::encoder::VideoEncoder;
use super::format::{PixelFormat, Resolution};

/// Poll interval while waiting for the next frame
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Cadence of emulator health checks and lifecycle pumping
const EMULATOR_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Cadence of the stats line
const STATS_INTERVAL: Duration = Duration::from_secs(3);

pub struct VideoPipeline {
    state: Arc<GatewayState>,
    peers: Arc<PeerSessionManager>,
    region: VideoRegion,
    reader: FrameReader,
    control: ControlSocket,
    emulator: EmulatorController,
    encoder: Option<VideoEncoder>,
    packetizer: RtpPacketizer,
    input_rx: mpsc::Receiver<InputFrame>,
    last_emulator_check: Instant,
    last_stats: Instant,
    stats_frames: u64,
}

impl VideoPipeline {
    /// Create the IPC resources the gateway owns and wire up the
    /// controller. Failing to create them is a startup failure.
    pub async fn new(state: Arc<GatewayState>, peers: Arc<PeerSessionManager>) -> Result<Self> {
        let config = &state.config;

        // Initial region dimensions come from the prefs the emulator will
        // boot with.
        let settings = prefs::read_prefs(&config.prefs_path);
        let (width, height) = settings.screen_dimensions();

        let region = VideoRegion::create(&config.video_shm_name, width, height)?;
        let control = ControlSocket::bind(&config.control_sock_path, &config.video_shm_name)?;

        let emulator = EmulatorController::new(
            config.emulator_path.clone(),
            config.prefs_path.clone(),
            config.control_sock_path.clone(),
            config.auto_start,
        );

        let input_rx = state.take_input_rx().await.ok_or_else(|| {
            crate::error::GatewayError::Startup("input receiver already taken".into())
        })?;

        state.display.set(width, height);

        Ok(Self {
            packetizer: RtpPacketizer::new(config.fps),
            state,
            peers,
            region,
            reader: FrameReader::new(),
            control,
            emulator,
            encoder: None,
            input_rx,
            last_emulator_check: Instant::now(),
            last_stats: Instant::now(),
            stats_frames: 0,
        })
    }

    /// Run until shutdown, then tear the emulator down.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.state.config.auto_start {
            if let Err(e) = self.emulator.start() {
                tracing::warn!("Auto-start failed: {}", e);
            }
        } else {
            tracing::info!("Auto-start disabled, waiting for emulator to connect");
        }

        tracing::info!("Video pipeline running");

        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => break,
            }
            self.iterate().await;
        }

        tracing::info!("Video pipeline shutting down");
        self.emulator.stop().await;
        self.control.disconnect();
    }

    /// One supervisor iteration.
    async fn iterate(&mut self) {
        if self.last_emulator_check.elapsed() >= EMULATOR_CHECK_INTERVAL {
            self.last_emulator_check = Instant::now();
            self.pump_emulator().await;
            self.publish_status().await;
        }

        if !self.control.is_connected() {
            if self.control.try_accept().await {
                self.reader.reset();
            }
        } else if self.control.poll_health().is_err() {
            // Emulator side closed; frame counting restarts with the next
            // process.
            self.reader.reset();
        }

        self.drain_input();

        let Some(encoded) = self.read_and_encode() else {
            tokio::time::sleep(FRAME_POLL_INTERVAL).await;
            return;
        };

        match self.packetizer.packetize(&encoded.data) {
            Ok(packets) => {
                self.peers.dispatch(&packets, encoded.key_frame).await;
            }
            Err(e) => tracing::warn!("Packetization failed: {}", e),
        }

        self.stats_frames += 1;
        self.state.frames_encoded.fetch_add(1, Ordering::Relaxed);

        if self.last_stats.elapsed() >= STATS_INTERVAL {
            let fps = self.stats_frames as f32 / self.last_stats.elapsed().as_secs_f32();
            tracing::info!(
                "fps={:.1} peers={} emulator={}",
                fps,
                self.peers.peer_count().await,
                self.emulator.state()
            );
            self.stats_frames = 0;
            self.last_stats = Instant::now();
        }
    }

    /// Reap the child, honor lifecycle buttons, and route restart requests.
    async fn pump_emulator(&mut self) {
        self.emulator.poll();

        if self.state.lifecycle.take_start() {
            if let Err(e) = self.emulator.start() {
                tracing::warn!("Start request failed: {}", e);
            }
        }

        if self.state.lifecycle.take_stop() {
            if self.control.is_connected() {
                let _ = self.control.send_frame(InputFrame::Stop);
            }
            self.emulator.stop().await;
        }

        if self.state.lifecycle.take_restart() {
            if self.control.is_connected() {
                tracing::info!("Routing restart request over the control socket");
                if self.control.send_frame(InputFrame::Reset).is_err() {
                    self.emulator.restart().await;
                }
            } else if self.emulator.is_running() {
                self.emulator.restart().await;
            } else {
                // Nothing to restart: treat it as a start request.
                if let Err(e) = self.emulator.start() {
                    tracing::warn!("Restart-as-start failed: {}", e);
                }
            }
        }
    }

    /// Forward queued browser input to the emulator, bounded per iteration
    /// by the queue depth.
    fn drain_input(&mut self) {
        while let Ok(frame) = self.input_rx.try_recv() {
            if !self.control.is_connected() {
                continue;
            }
            if let Err(e) = self.control.send_frame(frame) {
                tracing::warn!("{}", e);
                self.reader.reset();
                break;
            }
        }
    }

    /// Poll the shared region and encode the newest frame, reinitializing
    /// the codec on dimension changes.
    fn read_and_encode(&mut self) -> Option<super::encoder::EncodedFrame> {
        let view = self.reader.poll(&self.region)?;

        let resolution = Resolution::new(view.width, view.height);
        if !resolution.is_valid() {
            return None;
        }
        let format = PixelFormat::from_wire(view.format)?;

        self.state.display.set(view.width, view.height);

        match self.encoder.as_mut() {
            None => {
                let config = &self.state.config;
                match VideoEncoder::new(resolution, config.fps, config.bitrate_kbps) {
                    Ok(encoder) => self.encoder = Some(encoder),
                    Err(e) => {
                        tracing::error!("{}", e);
                        return None;
                    }
                }
            }
            Some(encoder) if encoder.resolution() != resolution => {
                if let Err(e) = encoder.reinit(resolution) {
                    tracing::error!("{}", e);
                    self.encoder = None;
                    return None;
                }
            }
            Some(_) => {}
        }

        let encoder = self.encoder.as_mut()?;

        if self.peers.take_keyframe_request() {
            encoder.request_keyframe();
        }

        match encoder.encode_packed(&view.data, view.stride as usize, format) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    async fn publish_status(&self) {
        let header = self.region.header();
        self.state
            .status
            .publish(EmulatorStateSnapshot {
                state: self.emulator.state(),
                pid: self.emulator.pid(),
                connected: self.control.is_connected(),
                frame_count: header.frame_count.load(Ordering::Acquire),
                width: header.width.load(Ordering::Relaxed),
                height: header.height.load(Ordering::Relaxed),
            })
            .await;
    }

    /// Emulator state, exposed for tests.
    #[cfg(test)]
    fn emulator_state(&self) -> crate::emulator::EmulatorState {
        self.emulator.state()
    }
}
