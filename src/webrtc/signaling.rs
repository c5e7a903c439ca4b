//! Signaling message types
//!
//! JSON text frames over the signaling WebSocket. Three client-to-server
//! types and the server-to-client offer/welcome. Unknown or malformed
//! messages are ignored with a warning.

use serde::{Deserialize, Serialize};

/// Client → server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Request a new peer connection
    Connect,
    /// SDP answer to our offer
    Answer { sdp: String },
    /// Trickled ICE candidate
    Candidate {
        candidate: String,
        #[serde(default)]
        mid: Option<String>,
    },
}

/// Server → client messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    /// Full SDP, sent once ICE gathering is complete
    Offer { sdp: String },
    Answer { sdp: String },
}

impl ServerMessage {
    pub fn welcome() -> Self {
        ServerMessage::Welcome {
            peer_id: "server".to_string(),
        }
    }

    /// Wrap a local description by its SDP type string.
    pub fn description(sdp_type: &str, sdp: String) -> Self {
        match sdp_type {
            "answer" => ServerMessage::Answer { sdp },
            _ => ServerMessage::Offer { sdp },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_connect() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"connect"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Connect));
    }

    #[test]
    fn parse_answer() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        match msg {
            ClientMessage::Answer { sdp } => assert_eq!(sdp, "v=0\r\n"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_candidate_with_and_without_mid() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"candidate","candidate":"candidate:1 1 udp 2130706431 10.0.0.1 50000 typ host","mid":"0"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Candidate { candidate, mid } => {
                assert!(candidate.starts_with("candidate:1"));
                assert_eq!(mid.as_deref(), Some("0"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"candidate","candidate":"candidate:x"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Candidate { mid: None, .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn welcome_wire_shape() {
        let json = serde_json::to_string(&ServerMessage::welcome()).unwrap();
        assert_eq!(json, r#"{"type":"welcome","peerId":"server"}"#);
    }

    #[test]
    fn offer_wire_shape() {
        let json =
            serde_json::to_string(&ServerMessage::description("offer", "v=0".into())).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
    }
}
