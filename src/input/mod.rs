//! Browser input relay
//!
//! Translates the compact DataChannel text protocol into 8-byte control
//! frames. The relay is stateless across messages apart from the per-peer
//! accumulators: absolute mouse position, held buttons, held modifiers.
//!
//! Message formats:
//! - `M<dx>,<dy>` - relative mouse delta
//! - `D<n>` / `U<n>` - button n down/up (0=left, 1=middle, 2=right)
//! - `K<keycode>` / `k<keycode>` - key down/up by browser keyCode

pub mod keymap;

use crate::ipc::control::{
    InputFrame, BUTTON_LEFT, BUTTON_MIDDLE, BUTTON_RIGHT, KEY_DOWN, KEY_UP,
};

/// Per-peer input translator state.
#[derive(Debug, Default)]
pub struct InputTranslator {
    x: i32,
    y: i32,
    buttons: u8,
    modifiers: u8,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one DataChannel message into at most one control frame.
    /// `display` is the current frame size used to clamp the absolute
    /// position.
    pub fn translate(&mut self, message: &str, display: (u32, u32)) -> Option<InputFrame> {
        let (kind, rest) = message.split_at(message.len().min(1));
        match kind {
            "M" => {
                let (dx, dy) = rest.split_once(',')?;
                let dx: i32 = dx.trim().parse().ok()?;
                let dy: i32 = dy.trim().parse().ok()?;
                self.apply_delta(dx, dy, display);
                Some(self.mouse_frame())
            }
            "D" => {
                let bit = button_bit(rest.trim().parse().ok()?)?;
                self.buttons |= bit;
                Some(self.mouse_frame())
            }
            "U" => {
                let bit = button_bit(rest.trim().parse().ok()?)?;
                self.buttons &= !bit;
                Some(self.mouse_frame())
            }
            "K" => self.key_frame(rest, KEY_DOWN),
            "k" => self.key_frame(rest, KEY_UP),
            _ => {
                tracing::debug!("Unrecognized input message: {:?}", message);
                None
            }
        }
    }

    fn apply_delta(&mut self, dx: i32, dy: i32, display: (u32, u32)) {
        let max_x = (display.0 as i32 - 1).max(0);
        let max_y = (display.1 as i32 - 1).max(0);
        self.x = (self.x + dx).clamp(0, max_x);
        self.y = (self.y + dy).clamp(0, max_y);
    }

    fn mouse_frame(&self) -> InputFrame {
        InputFrame::Mouse {
            flags: 0,
            x: self.x as i16,
            y: self.y as i16,
            buttons: self.buttons,
        }
    }

    fn key_frame(&mut self, rest: &str, flags: u8) -> Option<InputFrame> {
        let keycode: u32 = rest.trim().parse().ok()?;

        if let Some(bit) = keymap::modifier_bit(keycode) {
            if flags == KEY_DOWN {
                self.modifiers |= bit;
            } else {
                self.modifiers &= !bit;
            }
        }

        let Some(mac_keycode) = keymap::browser_to_adb(keycode) else {
            tracing::debug!("No ADB mapping for browser keyCode {}", keycode);
            return None;
        };

        Some(InputFrame::Key {
            flags,
            mac_keycode,
            modifiers: self.modifiers,
        })
    }
}

fn button_bit(button: u8) -> Option<u8> {
    match button {
        0 => Some(BUTTON_LEFT),
        1 => Some(BUTTON_MIDDLE),
        2 => Some(BUTTON_RIGHT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::keymap::{MOD_SHIFT, adb};

    const DISPLAY: (u32, u32) = (640, 480);

    #[test]
    fn mouse_delta_then_button_press() {
        let mut translator = InputTranslator::new();

        // Delta lands clamped non-negative.
        let frame = translator.translate("M10,-5", DISPLAY).unwrap();
        assert_eq!(
            frame,
            InputFrame::Mouse {
                flags: 0,
                x: 10,
                y: 0,
                buttons: 0,
            }
        );

        // Left button down keeps the position.
        let frame = translator.translate("D0", DISPLAY).unwrap();
        assert_eq!(
            frame,
            InputFrame::Mouse {
                flags: 0,
                x: 10,
                y: 0,
                buttons: BUTTON_LEFT,
            }
        );

        let frame = translator.translate("U0", DISPLAY).unwrap();
        assert_eq!(
            frame,
            InputFrame::Mouse {
                flags: 0,
                x: 10,
                y: 0,
                buttons: 0,
            }
        );
    }

    #[test]
    fn position_clamps_to_display() {
        let mut translator = InputTranslator::new();
        translator.translate("M10000,10000", DISPLAY).unwrap();
        let frame = translator.translate("M5,5", DISPLAY).unwrap();
        assert_eq!(
            frame,
            InputFrame::Mouse {
                flags: 0,
                x: 639,
                y: 479,
                buttons: 0,
            }
        );
    }

    #[test]
    fn button_numbering_follows_wire_bitmask() {
        let mut translator = InputTranslator::new();
        translator.translate("D0", DISPLAY).unwrap();
        translator.translate("D1", DISPLAY).unwrap();
        let frame = translator.translate("D2", DISPLAY).unwrap();
        assert_eq!(
            frame,
            InputFrame::Mouse {
                flags: 0,
                x: 0,
                y: 0,
                buttons: BUTTON_LEFT | BUTTON_MIDDLE | BUTTON_RIGHT,
            }
        );
    }

    #[test]
    fn key_down_and_up() {
        let mut translator = InputTranslator::new();
        let down = translator.translate("K65", DISPLAY).unwrap();
        assert_eq!(
            down,
            InputFrame::Key {
                flags: KEY_DOWN,
                mac_keycode: adb::KEY_A,
                modifiers: 0,
            }
        );
        let up = translator.translate("k65", DISPLAY).unwrap();
        assert_eq!(
            up,
            InputFrame::Key {
                flags: KEY_UP,
                mac_keycode: adb::KEY_A,
                modifiers: 0,
            }
        );
    }

    #[test]
    fn held_modifiers_are_folded_into_key_frames() {
        let mut translator = InputTranslator::new();

        let shift_down = translator.translate("K16", DISPLAY).unwrap();
        assert_eq!(
            shift_down,
            InputFrame::Key {
                flags: KEY_DOWN,
                mac_keycode: adb::KEY_SHIFT,
                modifiers: MOD_SHIFT,
            }
        );

        let a_down = translator.translate("K65", DISPLAY).unwrap();
        assert!(
            matches!(a_down, InputFrame::Key { modifiers, .. } if modifiers == MOD_SHIFT)
        );

        translator.translate("k16", DISPLAY).unwrap();
        let a_again = translator.translate("K65", DISPLAY).unwrap();
        assert!(matches!(a_again, InputFrame::Key { modifiers: 0, .. }));
    }

    #[test]
    fn unknown_keycode_is_dropped() {
        let mut translator = InputTranslator::new();
        assert!(translator.translate("K255", DISPLAY).is_none());
    }

    #[test]
    fn garbage_messages_are_dropped() {
        let mut translator = InputTranslator::new();
        assert!(translator.translate("", DISPLAY).is_none());
        assert!(translator.translate("Mnope", DISPLAY).is_none());
        assert!(translator.translate("D9", DISPLAY).is_none());
        assert!(translator.translate("X1,2", DISPLAY).is_none());
    }
}
