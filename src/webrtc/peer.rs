//! Per-browser peer connection
//!
//! One entry per connected browser session: the underlying peer connection,
//! a single outbound video track fed with pre-built RTP packets, and the
//! "input" DataChannel whose messages are translated and queued for the
//! supervisor. Candidates arriving before the remote description are held
//! in a pending queue and applied in receive order after the answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::TrackLocalWriter;

use crate::error::{GatewayError, Result};
use crate::input::InputTranslator;
use crate::ipc::InputFrame;
use crate::rtp::VIDEO_CLOCK_RATE;
use crate::state::DisplaySize;

/// H.264 constrained-baseline fmtp line for broad browser compatibility
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

pub struct GatewayPeer {
    pub id: String,
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticRTP>,
    data_channel: Arc<RTCDataChannel>,
    ready: Arc<AtomicBool>,
    has_remote_description: AtomicBool,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    /// Set once the peer has been sent a keyframe; until then the dispatcher
    /// withholds delta frames.
    saw_keyframe: AtomicBool,
}

impl GatewayPeer {
    /// Create the peer connection with its video track and input channel.
    /// `removal_tx` receives the peer id when the connection reaches a
    /// terminal state.
    pub async fn new(
        id: String,
        stun_server: &str,
        display: Arc<DisplaySize>,
        input_tx: mpsc::Sender<InputFrame>,
        keyframe_wanted: Arc<AtomicBool>,
        removal_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| GatewayError::WebRtc(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if stun_server.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: vec![stun_server.to_string()],
                ..Default::default()
            }]
        };

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                channels: 0,
                sdp_fmtp_line: H264_FMTP.to_string(),
                rtcp_feedback: vec![],
            },
            "video".to_string(),
            "macemu-stream".to_string(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let data_channel = pc.create_data_channel("input", None).await?;

        let peer = Arc::new(Self {
            id: id.clone(),
            pc,
            track,
            data_channel,
            ready: Arc::new(AtomicBool::new(false)),
            has_remote_description: AtomicBool::new(false),
            pending_candidates: Mutex::new(vec![]),
            saw_keyframe: AtomicBool::new(false),
        });

        peer.setup_input_channel(display, input_tx);
        peer.setup_state_handler(keyframe_wanted, removal_tx);

        Ok(peer)
    }

    fn setup_input_channel(&self, display: Arc<DisplaySize>, input_tx: mpsc::Sender<InputFrame>) {
        let translator = Arc::new(parking_lot::Mutex::new(InputTranslator::new()));
        let peer_id = self.id.clone();

        self.data_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let translator = translator.clone();
                let display = display.clone();
                let input_tx = input_tx.clone();
                let peer_id = peer_id.clone();

                Box::pin(async move {
                    let Ok(text) = std::str::from_utf8(&msg.data) else {
                        tracing::debug!("Non-text input message from {}", peer_id);
                        return;
                    };

                    let frame = translator.lock().translate(text, display.get());
                    if let Some(frame) = frame {
                        if input_tx.try_send(frame).is_err() {
                            tracing::warn!("Input queue full, dropping event from {}", peer_id);
                        }
                    }
                })
            }));
    }

    fn setup_state_handler(
        &self,
        keyframe_wanted: Arc<AtomicBool>,
        removal_tx: mpsc::UnboundedSender<String>,
    ) {
        let ready = self.ready.clone();
        let peer_id = self.id.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let ready = ready.clone();
                let keyframe_wanted = keyframe_wanted.clone();
                let removal_tx = removal_tx.clone();
                let peer_id = peer_id.clone();

                Box::pin(async move {
                    tracing::info!("Peer {} state: {}", peer_id, state);
                    match state {
                        RTCPeerConnectionState::Connected => {
                            ready.store(true, Ordering::SeqCst);
                            // The new viewer must start on a keyframe.
                            keyframe_wanted.store(true, Ordering::SeqCst);
                        }
                        RTCPeerConnectionState::Disconnected => {
                            ready.store(false, Ordering::SeqCst);
                        }
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            ready.store(false, Ordering::SeqCst);
                            let _ = removal_tx.send(peer_id.clone());
                        }
                        _ => {}
                    }
                })
            }));
    }

    /// Create the offer and return it only after ICE gathering completes,
    /// so the single SDP carries every local candidate.
    pub async fn create_offer(&self) -> Result<(String, String)> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gathering_complete.recv().await;

        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| GatewayError::WebRtc("no local description".into()))?;
        Ok((desc.sdp_type.to_string(), desc.sdp))
    }

    /// Apply the browser's answer, then flush candidates that arrived early,
    /// in receive order.
    pub async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        self.has_remote_description.store(true, Ordering::SeqCst);

        let pending: Vec<RTCIceCandidateInit> =
            std::mem::take(&mut *self.pending_candidates.lock().await);
        if !pending.is_empty() {
            tracing::debug!(
                "Applying {} queued candidate(s) for {}",
                pending.len(),
                self.id
            );
        }
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                tracing::warn!("Queued candidate failed for {}: {}", self.id, e);
            }
        }
        Ok(())
    }

    /// Add a trickled candidate, queueing it while the remote description
    /// is not yet applied. Duplicate candidates are a no-op in the agent.
    pub async fn add_candidate(&self, candidate: String, mid: Option<String>) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate,
            sdp_mid: mid,
            sdp_mline_index: None,
            username_fragment: None,
        };

        if self.has_remote_description.load(Ordering::SeqCst) {
            self.pc.add_ice_candidate(init).await?;
        } else {
            self.pending_candidates.lock().await.push(init);
        }
        Ok(())
    }

    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Whether this frame may go to the peer: keyframes always, deltas only
    /// after the first keyframe was delivered.
    pub fn accepts_frame(&self, is_keyframe: bool) -> bool {
        if is_keyframe {
            self.saw_keyframe.store(true, Ordering::SeqCst);
            return true;
        }
        self.saw_keyframe.load(Ordering::SeqCst)
    }

    /// Send one RTP packet down the video track.
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        self.track
            .write_rtp(packet)
            .await
            .map_err(|e| GatewayError::PeerSend {
                peer: self.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!("Closing peer {}: {}", self.id, e);
        }
    }
}
