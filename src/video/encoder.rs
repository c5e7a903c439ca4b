//! H.264 encoding for the video pipeline
//!
//! Wraps the bundled-source openh264 encoder behind the narrow contract the
//! pipeline needs: `encode(frame) -> bytes + keyframe flag`, reinitializable
//! on dimension change, keyframe producible on demand.

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig};
use openh264::OpenH264API;

use crate::error::{GatewayError, Result};

use super::convert::Yuv420Buffer;
use super::format::{PixelFormat, Resolution};

/// Maximum distance between keyframes (0.5 s at 30 fps)
pub const KEYFRAME_INTERVAL: u32 = 15;

/// Consecutive encode failures that trigger a codec reinit
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// One encoded access unit (Annex B)
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub key_frame: bool,
    pub resolution: Resolution,
    pub sequence: u64,
}

pub struct VideoEncoder {
    encoder: Encoder,
    yuv: Yuv420Buffer,
    resolution: Resolution,
    fps: u32,
    bitrate_kbps: u32,
    sequence: u64,
    keyframe_requested: bool,
    frames_since_keyframe: u32,
    consecutive_failures: u32,
}

impl VideoEncoder {
    pub fn new(resolution: Resolution, fps: u32, bitrate_kbps: u32) -> Result<Self> {
        let encoder = create_encoder(fps, bitrate_kbps)?;
        tracing::info!(
            "Encoder initialized: {} @ {} fps, {} kbps",
            resolution,
            fps,
            bitrate_kbps
        );
        Ok(Self {
            encoder,
            yuv: Yuv420Buffer::new(resolution),
            resolution,
            fps,
            bitrate_kbps,
            sequence: 0,
            keyframe_requested: true,
            frames_since_keyframe: 0,
            consecutive_failures: 0,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Ask for a keyframe on the next encode (new peer attached).
    pub fn request_keyframe(&mut self) {
        self.keyframe_requested = true;
    }

    /// Reinitialize for new dimensions. Always forces a keyframe.
    pub fn reinit(&mut self, resolution: Resolution) -> Result<()> {
        tracing::info!(
            "Encoder reinit: {} -> {}",
            self.resolution,
            resolution
        );
        self.encoder = create_encoder(self.fps, self.bitrate_kbps)?;
        self.yuv = Yuv420Buffer::new(resolution);
        self.resolution = resolution;
        self.keyframe_requested = true;
        self.frames_since_keyframe = 0;
        self.consecutive_failures = 0;
        Ok(())
    }

    /// Encode one packed frame from the shared-memory slot.
    pub fn encode_packed(
        &mut self,
        data: &[u8],
        stride: usize,
        format: PixelFormat,
    ) -> Result<EncodedFrame> {
        if self.keyframe_requested || self.frames_since_keyframe >= KEYFRAME_INTERVAL {
            self.encoder.force_intra_frame();
            self.keyframe_requested = false;
        }

        self.yuv.fill_from_packed(data, stride, format);

        let bitstream = match self.encoder.encode(&self.yuv) {
            Ok(bs) => bs,
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(
                        "{} consecutive encode failures, reinitializing codec",
                        self.consecutive_failures
                    );
                    self.reinit(self.resolution)?;
                }
                return Err(GatewayError::Encode(e.to_string()));
            }
        };
        self.consecutive_failures = 0;

        let data = Bytes::from(bitstream.to_vec());
        let key_frame = contains_idr(&data);
        if key_frame {
            self.frames_since_keyframe = 0;
        } else {
            self.frames_since_keyframe += 1;
        }

        self.sequence += 1;
        Ok(EncodedFrame {
            data,
            key_frame,
            resolution: self.resolution,
            sequence: self.sequence,
        })
    }
}

fn create_encoder(fps: u32, bitrate_kbps: u32) -> Result<Encoder> {
    let config = EncoderConfig::new()
        .set_bitrate_bps(bitrate_kbps * 1000)
        .max_frame_rate(fps as f32)
        .enable_skip_frame(false);

    Encoder::with_api_config(OpenH264API::from_source(), config)
        .map_err(|e| GatewayError::CodecInit(e.to_string()))
}

/// Whether Annex B data contains an IDR slice (NAL type 5). Start codes may
/// be three or four bytes.
pub fn contains_idr(data: &[u8]) -> bool {
    let mut i = 0;
    while i + 3 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            let nal_start = if data[i + 2] == 1 {
                i + 3
            } else if i + 4 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                i + 4
            } else {
                i += 1;
                continue;
            };

            if nal_start < data.len() && data[nal_start] & 0x1F == 5 {
                return true;
            }
            i = nal_start;
        } else {
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idr_detection() {
        // IDR with 4-byte start code
        assert!(contains_idr(&[0x00, 0x00, 0x00, 0x01, 0x65]));
        // IDR with 3-byte start code
        assert!(contains_idr(&[0x00, 0x00, 0x01, 0x65]));
        // Non-IDR slice
        assert!(!contains_idr(&[0x00, 0x00, 0x00, 0x01, 0x41]));
        // SPS alone is not a keyframe
        assert!(!contains_idr(&[0x00, 0x00, 0x00, 0x01, 0x67]));
        // SPS + PPS + IDR
        assert!(contains_idr(&[
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1F, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80, //
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84,
        ]));
        assert!(!contains_idr(&[]));
    }

    #[test]
    fn first_frame_is_a_keyframe() {
        let mut encoder = VideoEncoder::new(Resolution::new(320, 240), 30, 2000).unwrap();
        let frame = vec![0x40u8; 320 * 240 * 4];
        let encoded = encoder.encode_packed(&frame, 320 * 4, PixelFormat::Rgba).unwrap();
        assert!(encoded.key_frame);
        assert!(!encoded.data.is_empty());
        assert_eq!(encoded.sequence, 1);
    }

    #[test]
    fn keyframe_on_request() {
        let mut encoder = VideoEncoder::new(Resolution::new(320, 240), 30, 2000).unwrap();
        let frame = vec![0x80u8; 320 * 240 * 4];

        encoder.encode_packed(&frame, 320 * 4, PixelFormat::Rgba).unwrap();
        // A couple of deltas in between.
        encoder.encode_packed(&frame, 320 * 4, PixelFormat::Rgba).unwrap();

        encoder.request_keyframe();
        let encoded = encoder.encode_packed(&frame, 320 * 4, PixelFormat::Rgba).unwrap();
        assert!(encoded.key_frame);
    }

    #[test]
    fn reinit_on_dimension_change_forces_keyframe() {
        let mut encoder = VideoEncoder::new(Resolution::new(320, 240), 30, 2000).unwrap();
        let small = vec![0x20u8; 320 * 240 * 4];
        encoder.encode_packed(&small, 320 * 4, PixelFormat::Rgba).unwrap();
        encoder.encode_packed(&small, 320 * 4, PixelFormat::Rgba).unwrap();

        encoder.reinit(Resolution::new(640, 480)).unwrap();
        let big = vec![0x20u8; 640 * 480 * 4];
        let encoded = encoder.encode_packed(&big, 640 * 4, PixelFormat::Rgba).unwrap();
        assert!(encoded.key_frame);
        assert_eq!(encoded.resolution, Resolution::new(640, 480));
    }

    #[test]
    fn keyframe_interval_honored() {
        let mut encoder = VideoEncoder::new(Resolution::new(160, 120), 30, 1000).unwrap();
        let frame = vec![0x55u8; 160 * 120 * 4];

        let mut since_key = 0u32;
        for _ in 0..40 {
            let encoded = encoder.encode_packed(&frame, 160 * 4, PixelFormat::Rgba).unwrap();
            if encoded.key_frame {
                since_key = 0;
            } else {
                since_key += 1;
                assert!(since_key <= KEYFRAME_INTERVAL);
            }
        }
    }
}
