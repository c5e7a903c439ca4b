//! Peer session manager
//!
//! Accepts signaling connections, drives offer/answer exchange and candidate
//! trickling, and fans encoded RTP packets out to every ready peer. The
//! peers map is the single registry; the lock is held only for the duration
//! of one frame's dispatch so teardown can never race a send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc, RwLock};
use webrtc::rtp::packet::Packet;

use crate::error::{GatewayError, Result};
use crate::ipc::InputFrame;
use crate::state::DisplaySize;

use super::peer::GatewayPeer;
use super::signaling::{ClientMessage, ServerMessage};

pub struct PeerSessionManager {
    stun_server: String,
    peers: RwLock<HashMap<String, Arc<GatewayPeer>>>,
    display: Arc<DisplaySize>,
    input_tx: mpsc::Sender<InputFrame>,
    keyframe_wanted: Arc<AtomicBool>,
    removal_tx: mpsc::UnboundedSender<String>,
}

impl PeerSessionManager {
    pub fn new(
        stun_server: String,
        display: Arc<DisplaySize>,
        input_tx: mpsc::Sender<InputFrame>,
    ) -> Arc<Self> {
        let (removal_tx, mut removal_rx) = mpsc::unbounded_channel::<String>();

        let manager = Arc::new(Self {
            stun_server,
            peers: RwLock::new(HashMap::new()),
            display,
            input_tx,
            keyframe_wanted: Arc::new(AtomicBool::new(false)),
            removal_tx,
        });

        // Reap peers that hit a terminal state from their own callbacks.
        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            while let Some(peer_id) = removal_rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.remove_peer(&peer_id).await;
            }
        });

        manager
    }

    /// Create a peer for a `connect` request and produce the offer message.
    pub async fn create_peer(&self) -> Result<(String, ServerMessage)> {
        let id = uuid::Uuid::new_v4().to_string();
        let peer = GatewayPeer::new(
            id.clone(),
            &self.stun_server,
            self.display.clone(),
            self.input_tx.clone(),
            self.keyframe_wanted.clone(),
            self.removal_tx.clone(),
        )
        .await?;

        let (sdp_type, sdp) = peer.create_offer().await?;

        // Collision means replace; ids are random so this is defensive only
        // in name: a reconnecting client reuses the flow, not the id.
        let previous = self.peers.write().await.insert(id.clone(), peer);
        if let Some(previous) = previous {
            previous.close().await;
        }

        tracing::info!("Peer {} created", id);
        Ok((id, ServerMessage::description(&sdp_type, sdp)))
    }

    pub async fn apply_answer(&self, peer_id: &str, sdp: String) -> Result<()> {
        let peer = self.get_peer(peer_id).await?;
        peer.apply_answer(sdp).await
    }

    pub async fn add_candidate(
        &self,
        peer_id: &str,
        candidate: String,
        mid: Option<String>,
    ) -> Result<()> {
        let peer = self.get_peer(peer_id).await?;
        peer.add_candidate(candidate, mid).await
    }

    pub async fn pending_candidate_count(&self, peer_id: &str) -> usize {
        match self.get_peer(peer_id).await {
            Ok(peer) => peer.pending_candidate_count().await,
            Err(_) => 0,
        }
    }

    async fn get_peer(&self, peer_id: &str) -> Result<Arc<GatewayPeer>> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| GatewayError::WebRtc(format!("unknown peer {}", peer_id)))
    }

    pub async fn remove_peer(&self, peer_id: &str) {
        let peer = self.peers.write().await.remove(peer_id);
        if let Some(peer) = peer {
            tracing::info!("Peer {} removed", peer_id);
            peer.close().await;
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// True once, when a peer became ready since the last call. The video
    /// pipeline turns this into a keyframe request.
    pub fn take_keyframe_request(&self) -> bool {
        self.keyframe_wanted.swap(false, Ordering::SeqCst)
    }

    /// Send one frame's packets to every ready peer. A peer that has not
    /// yet been delivered a keyframe is withheld delta frames. Per-peer
    /// errors are logged and never abort the cycle.
    pub async fn dispatch(&self, packets: &[Packet], is_keyframe: bool) -> usize {
        if packets.is_empty() {
            return 0;
        }

        let peers = self.peers.read().await;
        let mut sent = 0;
        for peer in peers.values() {
            if !peer.is_ready() || !peer.accepts_frame(is_keyframe) {
                continue;
            }
            let mut failed = false;
            for packet in packets {
                if let Err(e) = peer.send_packet(packet).await {
                    tracing::debug!("{}", e);
                    failed = true;
                    break;
                }
            }
            if !failed {
                sent += 1;
            }
        }
        sent
    }

    pub async fn close_all(&self) {
        let peers: Vec<Arc<GatewayPeer>> = self.peers.write().await.drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.close().await;
        }
    }

    /// Run the signaling WebSocket server until shutdown.
    pub async fn serve_signaling(
        self: Arc<Self>,
        port: u16,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let app = Router::new().route("/", get(ws_upgrade)).with_state(self);

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| GatewayError::Startup(format!("signaling port {}: {}", port, e)))?;

        tracing::info!("Signaling server on port {}", port);

        Ok(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            });
            if let Err(e) = server.await {
                tracing::error!("Signaling server error: {}", e);
            }
        }))
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<PeerSessionManager>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

async fn handle_socket(mut socket: WebSocket, manager: Arc<PeerSessionManager>) {
    let welcome = serde_json::to_string(&ServerMessage::welcome()).unwrap_or_default();
    if socket.send(Message::Text(welcome.into())).await.is_err() {
        return;
    }

    // The peer owned by this signaling connection, if any.
    let mut session_peer: Option<String> = None;

    while let Some(result) = socket.recv().await {
        let message = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let parsed = match serde_json::from_str::<ClientMessage>(&message) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Ignoring malformed signaling message: {}", e);
                continue;
            }
        };

        match parsed {
            ClientMessage::Connect => {
                if let Some(old) = session_peer.take() {
                    manager.remove_peer(&old).await;
                }
                match manager.create_peer().await {
                    Ok((id, offer)) => {
                        session_peer = Some(id);
                        let json = match serde_json::to_string(&offer) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("Offer serialization failed: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Peer creation failed: {}", e),
                }
            }
            ClientMessage::Answer { sdp } => {
                let Some(ref id) = session_peer else {
                    tracing::warn!("Answer without a connected peer");
                    continue;
                };
                if let Err(e) = manager.apply_answer(id, sdp).await {
                    tracing::warn!("Answer rejected for {}: {}", id, e);
                }
            }
            ClientMessage::Candidate { candidate, mid } => {
                let Some(ref id) = session_peer else {
                    tracing::warn!("Candidate without a connected peer");
                    continue;
                };
                if let Err(e) = manager.add_candidate(id, candidate, mid).await {
                    tracing::warn!("Candidate rejected for {}: {}", id, e);
                }
            }
        }
    }

    if let Some(id) = session_peer {
        manager.remove_peer(&id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::interceptor_registry::register_default_interceptors;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::api::APIBuilder;
    use webrtc::interceptor::registry::Registry;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    fn test_manager() -> Arc<PeerSessionManager> {
        let (input_tx, _input_rx) = mpsc::channel(8);
        // No STUN so ICE gathering finishes on host candidates alone.
        PeerSessionManager::new(String::new(), Arc::new(DisplaySize::default()), input_tx)
    }

    async fn browser_answer(offer_sdp: String) -> String {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).unwrap();
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap();

        let offer = RTCSessionDescription::offer(offer_sdp).unwrap();
        pc.set_remote_description(offer).await.unwrap();
        let answer = pc.create_answer(None).await.unwrap();
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer).await.unwrap();
        sdp
    }

    const HOST_CANDIDATE: &str = "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host";

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_produces_full_offer() {
        let manager = test_manager();
        let (id, offer) = manager.create_peer().await.unwrap();
        assert_eq!(manager.peer_count().await, 1);

        match offer {
            ServerMessage::Offer { sdp } => {
                assert!(sdp.contains("m=video"), "offer must carry the video track");
                assert!(sdp.contains("ice-ufrag"), "offer must carry ICE credentials");
            }
            other => panic!("expected offer, got {:?}", serde_json::to_string(&other)),
        }

        manager.remove_peer(&id).await;
        assert_eq!(manager.peer_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn candidate_before_answer_is_queued_then_applied() {
        let manager = test_manager();
        let (id, offer) = manager.create_peer().await.unwrap();
        let ServerMessage::Offer { sdp } = offer else {
            panic!("expected offer")
        };

        // Candidate arrives out of order: it must wait for the answer.
        manager
            .add_candidate(&id, HOST_CANDIDATE.to_string(), Some("0".to_string()))
            .await
            .unwrap();
        assert_eq!(manager.pending_candidate_count(&id).await, 1);

        let answer_sdp = browser_answer(sdp).await;
        manager.apply_answer(&id, answer_sdp).await.unwrap();

        // Queue flushed in receive order on answer.
        assert_eq!(manager.pending_candidate_count(&id).await, 0);

        // A repeated candidate after the answer applies idempotently.
        manager
            .add_candidate(&id, HOST_CANDIDATE.to_string(), Some("0".to_string()))
            .await
            .unwrap();
        manager
            .add_candidate(&id, HOST_CANDIDATE.to_string(), Some("0".to_string()))
            .await
            .unwrap();

        manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_skips_peers_that_are_not_ready() {
        let manager = test_manager();
        let (_id, _offer) = manager.create_peer().await.unwrap();

        let packet = Packet::default();
        let sent = manager.dispatch(&[packet], true).await;
        assert_eq!(sent, 0, "no peer is ready before the media path connects");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operations_on_unknown_peer_fail_cleanly() {
        let manager = test_manager();
        assert!(manager.apply_answer("ghost", "sdp".into()).await.is_err());
        assert!(manager
            .add_candidate("ghost", HOST_CANDIDATE.into(), None)
            .await
            .is_err());
        assert_eq!(manager.pending_candidate_count("ghost").await, 0);
    }
}
