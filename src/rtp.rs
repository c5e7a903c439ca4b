//! RTP packetization for encoded video
//!
//! Produces ready-to-send RTP packets for each encoded access unit. The
//! sequence/timestamp counters are server-global: every peer receives
//! identical packets, so dispatch is a plain fan-out.

use bytes::Bytes;
use webrtc::rtp::codecs::h264::H264Payloader;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Payloader;

use crate::error::{GatewayError, Result};

/// MTU budget for one RTP packet, conservative for most networks
pub const RTP_MTU: usize = 1200;

/// Fixed RTP header size (version 2, no padding/extension/CSRC)
pub const RTP_HEADER_SIZE: usize = 12;

/// Dynamic payload type negotiated in the SDP
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;

/// 90 kHz video clock
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Synchronization source for the single video stream
pub const VIDEO_SSRC: u32 = 1;

/// Server-global RTP packetizer.
///
/// H.264 access units in Annex B form are split by the payloader
/// (single-NAL / STAP-A / FU-A as sizes dictate) under the MTU budget, then
/// stamped with consecutive sequence numbers, the frame's timestamp, and the
/// Marker bit on the final packet of each frame.
pub struct RtpPacketizer {
    payloader: H264Payloader,
    sequence: u16,
    timestamp: u32,
    timestamp_step: u32,
}

impl RtpPacketizer {
    pub fn new(fps: u32) -> Self {
        Self {
            payloader: H264Payloader::default(),
            sequence: 0,
            timestamp: 0,
            timestamp_step: VIDEO_CLOCK_RATE / fps.max(1),
        }
    }

    /// Packetize one encoded frame. All packets carry the same timestamp;
    /// the timestamp advances once per frame.
    pub fn packetize(&mut self, frame: &Bytes) -> Result<Vec<Packet>> {
        if frame.is_empty() {
            return Ok(vec![]);
        }

        let payloads = self
            .payloader
            .payload(RTP_MTU - RTP_HEADER_SIZE, frame)
            .map_err(|e| GatewayError::WebRtc(format!("payload failed: {}", e)))?;

        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);

        let last = payloads.len().saturating_sub(1);
        let packets = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let header = Header {
                    version: 2,
                    padding: false,
                    extension: false,
                    marker: i == last,
                    payload_type: VIDEO_PAYLOAD_TYPE,
                    sequence_number: self.sequence,
                    timestamp,
                    ssrc: VIDEO_SSRC,
                    ..Default::default()
                };
                self.sequence = self.sequence.wrapping_add(1);
                Packet { header, payload }
            })
            .collect();

        Ok(packets)
    }
}
