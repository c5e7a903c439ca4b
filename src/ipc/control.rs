//! Control socket between gateway and emulator
//!
//! The gateway binds a Unix stream socket at a well-known PID-derived path
//! and accepts a single emulator connection. On accept it sends one JSON
//! handshake line advertising the shared-memory name, then switches to a
//! binary protocol of fixed 8-byte frames: the first byte selects the frame
//! type, the remaining seven bytes are type-specific. There is no length
//! prefix; the type determines the size.
//!
//! The gateway writes input and lifecycle commands; anything the emulator
//! writes back (optional acks) is drained and ignored. A zero-length read
//! means the emulator is gone.

use std::path::{Path, PathBuf};

use futures::FutureExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

use crate::error::{GatewayError, Result};

/// Wire size of every control frame
pub const FRAME_SIZE: usize = 8;

/// Frame type bytes
pub const TYPE_MOUSE: u8 = 1;
pub const TYPE_KEY: u8 = 2;
pub const TYPE_CMD_RESET: u8 = 10;
pub const TYPE_CMD_QUIT: u8 = 11;
pub const TYPE_CMD_STOP: u8 = 12;

/// Key frame flags
pub const KEY_DOWN: u8 = 1;
pub const KEY_UP: u8 = 2;

/// Mouse buttons bitmask
pub const BUTTON_LEFT: u8 = 0x01;
pub const BUTTON_RIGHT: u8 = 0x02;
pub const BUTTON_MIDDLE: u8 = 0x04;

/// A control frame, exactly 8 bytes on the wire. Multi-byte fields are
/// little-endian, tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFrame {
    Mouse {
        flags: u8,
        x: i16,
        y: i16,
        buttons: u8,
    },
    Key {
        flags: u8,
        mac_keycode: u8,
        modifiers: u8,
    },
    Reset,
    Quit,
    Stop,
}

impl InputFrame {
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        match *self {
            InputFrame::Mouse {
                flags,
                x,
                y,
                buttons,
            } => {
                buf[0] = TYPE_MOUSE;
                buf[1] = flags;
                buf[2..4].copy_from_slice(&x.to_le_bytes());
                buf[4..6].copy_from_slice(&y.to_le_bytes());
                buf[6] = buttons;
            }
            InputFrame::Key {
                flags,
                mac_keycode,
                modifiers,
            } => {
                buf[0] = TYPE_KEY;
                buf[1] = flags;
                buf[2] = mac_keycode;
                buf[3] = modifiers;
            }
            InputFrame::Reset => buf[0] = TYPE_CMD_RESET,
            InputFrame::Quit => buf[0] = TYPE_CMD_QUIT,
            InputFrame::Stop => buf[0] = TYPE_CMD_STOP,
        }
        buf
    }

    pub fn decode(buf: &[u8; FRAME_SIZE]) -> Option<InputFrame> {
        match buf[0] {
            TYPE_MOUSE => Some(InputFrame::Mouse {
                flags: buf[1],
                x: i16::from_le_bytes([buf[2], buf[3]]),
                y: i16::from_le_bytes([buf[4], buf[5]]),
                buttons: buf[6],
            }),
            TYPE_KEY => Some(InputFrame::Key {
                flags: buf[1],
                mac_keycode: buf[2],
                modifiers: buf[3],
            }),
            TYPE_CMD_RESET => Some(InputFrame::Reset),
            TYPE_CMD_QUIT => Some(InputFrame::Quit),
            TYPE_CMD_STOP => Some(InputFrame::Stop),
            _ => None,
        }
    }
}

/// Handshake line sent to the emulator after accept
#[derive(Debug, Serialize)]
struct Handshake<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: u32,
    video_shm: &'a str,
}

/// Listener plus the (at most one) accepted emulator connection.
pub struct ControlSocket {
    listener: UnixListener,
    stream: Option<UnixStream>,
    path: PathBuf,
    video_shm_name: String,
}

impl ControlSocket {
    /// Bind the listener, replacing any stale socket file. Mode 0666 so an
    /// emulator running as another user can connect.
    pub fn bind(path: &Path, video_shm_name: &str) -> Result<Self> {
        let _ = std::fs::remove_file(path);

        let listener = UnixListener::bind(path)
            .map_err(|e| GatewayError::Startup(format!("bind {} failed: {}", path.display(), e)))?;

        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)) {
            tracing::warn!("Failed to chmod control socket: {}", e);
        }

        tracing::info!("Listening for emulator on '{}'", path.display());
        Ok(Self {
            listener,
            stream: None,
            path: path.to_path_buf(),
            video_shm_name: video_shm_name.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Accept a pending emulator connection without blocking. Returns `true`
    /// when a new connection was established this call.
    pub async fn try_accept(&mut self) -> bool {
        if self.stream.is_some() {
            return false;
        }
        let accepted = match self.listener.accept().now_or_never() {
            Some(Ok((stream, _))) => stream,
            Some(Err(e)) => {
                tracing::warn!("Control socket accept failed: {}", e);
                return false;
            }
            None => return false,
        };

        let handshake = Handshake {
            kind: "hello",
            version: 1,
            video_shm: &self.video_shm_name,
        };
        let mut line = serde_json::to_string(&handshake).unwrap_or_default();
        line.push('\n');

        let mut stream = accepted;
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            tracing::warn!("Handshake write failed: {}", e);
            return false;
        }

        tracing::info!("Emulator connected on control socket");
        self.stream = Some(stream);
        true
    }

    /// Send one 8-byte frame. A short write means the emulator is gone.
    pub fn send_frame(&mut self, frame: InputFrame) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| GatewayError::EmulatorGone("control socket not connected".into()))?;

        let buf = frame.encode();
        match stream.try_write(&buf) {
            Ok(n) if n == FRAME_SIZE => Ok(()),
            Ok(n) => {
                self.disconnect();
                Err(GatewayError::EmulatorGone(format!(
                    "short write ({} of {} bytes)",
                    n, FRAME_SIZE
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::warn!("Control socket backpressure, frame dropped");
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(GatewayError::EmulatorGone(format!("write failed: {}", e)))
            }
        }
    }

    /// Detect disconnect and drain any inbound bytes. Returns
    /// `EmulatorGone` on a zero-length read (peer closed).
    pub fn poll_health(&mut self) -> Result<()> {
        let stream = match self.stream.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };

        let mut scratch = [0u8; 64];
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    self.disconnect();
                    return Err(GatewayError::EmulatorGone("connection closed".into()));
                }
                Ok(n) => {
                    // Optional acks from the emulator; nothing to do with them.
                    tracing::trace!("Drained {} bytes from emulator", n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    self.disconnect();
                    return Err(GatewayError::EmulatorGone(format!("read failed: {}", e)));
                }
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Emulator disconnected from control socket");
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn every_frame_is_eight_bytes() {
        let frames = [
            InputFrame::Mouse {
                flags: 0,
                x: 100,
                y: -5,
                buttons: BUTTON_LEFT,
            },
            InputFrame::Key {
                flags: KEY_DOWN,
                mac_keycode: 0x24,
                modifiers: 0,
            },
            InputFrame::Reset,
            InputFrame::Quit,
            InputFrame::Stop,
        ];
        for frame in frames {
            assert_eq!(frame.encode().len(), FRAME_SIZE);
        }
    }

    #[test]
    fn mouse_frame_roundtrip() {
        let frame = InputFrame::Mouse {
            flags: 1,
            x: -320,
            y: 240,
            buttons: BUTTON_LEFT | BUTTON_MIDDLE,
        };
        let buf = frame.encode();
        assert_eq!(buf[0], TYPE_MOUSE);
        // x = -320 little-endian
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), -320);
        assert_eq!(InputFrame::decode(&buf), Some(frame));
    }

    #[test]
    fn key_frame_roundtrip() {
        let frame = InputFrame::Key {
            flags: KEY_UP,
            mac_keycode: 0x00,
            modifiers: 0x05,
        };
        let buf = frame.encode();
        assert_eq!(buf[0], TYPE_KEY);
        assert_eq!(buf[1], KEY_UP);
        assert_eq!(InputFrame::decode(&buf), Some(frame));
    }

    #[test]
    fn command_frames_have_zero_payload() {
        for (frame, ty) in [
            (InputFrame::Reset, TYPE_CMD_RESET),
            (InputFrame::Quit, TYPE_CMD_QUIT),
            (InputFrame::Stop, TYPE_CMD_STOP),
        ] {
            let buf = frame.encode();
            assert_eq!(buf[0], ty);
            assert!(buf[1..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn unknown_type_rejected() {
        let buf = [200u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(InputFrame::decode(&buf), None);
    }

    #[tokio::test]
    async fn accept_handshake_and_frame_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");

        let mut socket = ControlSocket::bind(&path, "/macemu-video-test").unwrap();
        assert!(!socket.is_connected());

        let mut client = UnixStream::connect(&path).await.unwrap();

        // Accept may need a scheduler tick for the connection to land.
        for _ in 0..50 {
            if socket.try_accept().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(socket.is_connected());

        // Handshake is one JSON line naming the shared memory.
        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["video_shm"], "/macemu-video-test");

        // Binary frames follow.
        socket
            .send_frame(InputFrame::Mouse {
                flags: 0,
                x: 10,
                y: 20,
                buttons: 0,
            })
            .unwrap();

        let mut frame_buf = [0u8; FRAME_SIZE];
        client.read_exact(&mut frame_buf).await.unwrap();
        assert_eq!(
            InputFrame::decode(&frame_buf),
            Some(InputFrame::Mouse {
                flags: 0,
                x: 10,
                y: 20,
                buttons: 0,
            })
        );
    }

    #[tokio::test]
    async fn closed_connection_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");

        let mut socket = ControlSocket::bind(&path, "/macemu-video-test").unwrap();
        let client = UnixStream::connect(&path).await.unwrap();
        for _ in 0..50 {
            if socket.try_accept().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(socket.is_connected());

        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        match socket.poll_health() {
            Err(GatewayError::EmulatorGone(_)) => {}
            other => panic!("expected EmulatorGone, got {:?}", other.map(|_| ())),
        }
        assert!(!socket.is_connected());
    }
}
