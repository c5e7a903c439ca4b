//! Browser key code to Mac ADB scancode mapping
//!
//! Classic Mac OS virtual key codes (the set BasiliskII feeds to the ROM),
//! indexed by the legacy JavaScript `keyCode` the client sends.

/// Mac ADB virtual key codes
#[allow(dead_code)]
pub mod adb {
    pub const KEY_A: u8 = 0x00;
    pub const KEY_S: u8 = 0x01;
    pub const KEY_D: u8 = 0x02;
    pub const KEY_F: u8 = 0x03;
    pub const KEY_H: u8 = 0x04;
    pub const KEY_G: u8 = 0x05;
    pub const KEY_Z: u8 = 0x06;
    pub const KEY_X: u8 = 0x07;
    pub const KEY_C: u8 = 0x08;
    pub const KEY_V: u8 = 0x09;
    pub const KEY_B: u8 = 0x0B;
    pub const KEY_Q: u8 = 0x0C;
    pub const KEY_W: u8 = 0x0D;
    pub const KEY_E: u8 = 0x0E;
    pub const KEY_R: u8 = 0x0F;
    pub const KEY_Y: u8 = 0x10;
    pub const KEY_T: u8 = 0x11;
    pub const KEY_1: u8 = 0x12;
    pub const KEY_2: u8 = 0x13;
    pub const KEY_3: u8 = 0x14;
    pub const KEY_4: u8 = 0x15;
    pub const KEY_6: u8 = 0x16;
    pub const KEY_5: u8 = 0x17;
    pub const KEY_EQUAL: u8 = 0x18;
    pub const KEY_9: u8 = 0x19;
    pub const KEY_7: u8 = 0x1A;
    pub const KEY_MINUS: u8 = 0x1B;
    pub const KEY_8: u8 = 0x1C;
    pub const KEY_0: u8 = 0x1D;
    pub const KEY_RIGHT_BRACKET: u8 = 0x1E;
    pub const KEY_O: u8 = 0x1F;
    pub const KEY_U: u8 = 0x20;
    pub const KEY_LEFT_BRACKET: u8 = 0x21;
    pub const KEY_I: u8 = 0x22;
    pub const KEY_P: u8 = 0x23;
    pub const KEY_RETURN: u8 = 0x24;
    pub const KEY_L: u8 = 0x25;
    pub const KEY_J: u8 = 0x26;
    pub const KEY_QUOTE: u8 = 0x27;
    pub const KEY_K: u8 = 0x28;
    pub const KEY_SEMICOLON: u8 = 0x29;
    pub const KEY_BACKSLASH: u8 = 0x2A;
    pub const KEY_COMMA: u8 = 0x2B;
    pub const KEY_SLASH: u8 = 0x2C;
    pub const KEY_N: u8 = 0x2D;
    pub const KEY_M: u8 = 0x2E;
    pub const KEY_PERIOD: u8 = 0x2F;
    pub const KEY_TAB: u8 = 0x30;
    pub const KEY_SPACE: u8 = 0x31;
    pub const KEY_GRAVE: u8 = 0x32;
    pub const KEY_DELETE: u8 = 0x33;
    pub const KEY_ESCAPE: u8 = 0x35;
    pub const KEY_COMMAND: u8 = 0x37;
    pub const KEY_SHIFT: u8 = 0x38;
    pub const KEY_CAPS_LOCK: u8 = 0x39;
    pub const KEY_OPTION: u8 = 0x3A;
    pub const KEY_CONTROL: u8 = 0x3B;
    pub const KEY_F5: u8 = 0x60;
    pub const KEY_F6: u8 = 0x61;
    pub const KEY_F7: u8 = 0x62;
    pub const KEY_F3: u8 = 0x63;
    pub const KEY_F8: u8 = 0x64;
    pub const KEY_F9: u8 = 0x65;
    pub const KEY_F11: u8 = 0x67;
    pub const KEY_F10: u8 = 0x6D;
    pub const KEY_F12: u8 = 0x6F;
    pub const KEY_HOME: u8 = 0x73;
    pub const KEY_PAGE_UP: u8 = 0x74;
    pub const KEY_FORWARD_DELETE: u8 = 0x75;
    pub const KEY_F4: u8 = 0x76;
    pub const KEY_END: u8 = 0x77;
    pub const KEY_F2: u8 = 0x78;
    pub const KEY_PAGE_DOWN: u8 = 0x79;
    pub const KEY_F1: u8 = 0x7A;
    pub const KEY_LEFT_ARROW: u8 = 0x7B;
    pub const KEY_RIGHT_ARROW: u8 = 0x7C;
    pub const KEY_DOWN_ARROW: u8 = 0x7D;
    pub const KEY_UP_ARROW: u8 = 0x7E;
}

/// Modifier bits carried in the KEY frame
pub const MOD_SHIFT: u8 = 0x01;
pub const MOD_CONTROL: u8 = 0x02;
pub const MOD_OPTION: u8 = 0x04;
pub const MOD_COMMAND: u8 = 0x08;

/// Map a browser `keyCode` to a Mac ADB scancode. Unknown codes map to
/// nothing and the caller drops the event.
pub fn browser_to_adb(keycode: u32) -> Option<u8> {
    use adb::*;
    let code = match keycode {
        8 => KEY_DELETE,
        9 => KEY_TAB,
        13 => KEY_RETURN,
        16 => KEY_SHIFT,
        17 => KEY_CONTROL,
        18 => KEY_OPTION,
        20 => KEY_CAPS_LOCK,
        27 => KEY_ESCAPE,
        32 => KEY_SPACE,
        33 => KEY_PAGE_UP,
        34 => KEY_PAGE_DOWN,
        35 => KEY_END,
        36 => KEY_HOME,
        37 => KEY_LEFT_ARROW,
        38 => KEY_UP_ARROW,
        39 => KEY_RIGHT_ARROW,
        40 => KEY_DOWN_ARROW,
        46 => KEY_FORWARD_DELETE,
        48 => KEY_0,
        49 => KEY_1,
        50 => KEY_2,
        51 => KEY_3,
        52 => KEY_4,
        53 => KEY_5,
        54 => KEY_6,
        55 => KEY_7,
        56 => KEY_8,
        57 => KEY_9,
        65 => KEY_A,
        66 => KEY_B,
        67 => KEY_C,
        68 => KEY_D,
        69 => KEY_E,
        70 => KEY_F,
        71 => KEY_G,
        72 => KEY_H,
        73 => KEY_I,
        74 => KEY_J,
        75 => KEY_K,
        76 => KEY_L,
        77 => KEY_M,
        78 => KEY_N,
        79 => KEY_O,
        80 => KEY_P,
        81 => KEY_Q,
        82 => KEY_R,
        83 => KEY_S,
        84 => KEY_T,
        85 => KEY_U,
        86 => KEY_V,
        87 => KEY_W,
        88 => KEY_X,
        89 => KEY_Y,
        90 => KEY_Z,
        91 | 93 | 224 => KEY_COMMAND,
        112 => KEY_F1,
        113 => KEY_F2,
        114 => KEY_F3,
        115 => KEY_F4,
        116 => KEY_F5,
        117 => KEY_F6,
        118 => KEY_F7,
        119 => KEY_F8,
        120 => KEY_F9,
        121 => KEY_F10,
        122 => KEY_F11,
        123 => KEY_F12,
        186 => KEY_SEMICOLON,
        187 => KEY_EQUAL,
        188 => KEY_COMMA,
        189 => KEY_MINUS,
        190 => KEY_PERIOD,
        191 => KEY_SLASH,
        192 => KEY_GRAVE,
        219 => KEY_LEFT_BRACKET,
        220 => KEY_BACKSLASH,
        221 => KEY_RIGHT_BRACKET,
        222 => KEY_QUOTE,
        _ => return None,
    };
    Some(code)
}

/// The modifier bit a browser key contributes while held, if any.
pub fn modifier_bit(keycode: u32) -> Option<u8> {
    match keycode {
        16 => Some(MOD_SHIFT),
        17 => Some(MOD_CONTROL),
        18 => Some(MOD_OPTION),
        91 | 93 | 224 => Some(MOD_COMMAND),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits_map() {
        assert_eq!(browser_to_adb(65), Some(adb::KEY_A));
        assert_eq!(browser_to_adb(90), Some(adb::KEY_Z));
        assert_eq!(browser_to_adb(48), Some(adb::KEY_0));
        assert_eq!(browser_to_adb(57), Some(adb::KEY_9));
    }

    #[test]
    fn unknown_codes_are_unmapped() {
        assert_eq!(browser_to_adb(255), None);
        assert_eq!(browser_to_adb(0), None);
    }

    #[test]
    fn modifier_bits() {
        assert_eq!(modifier_bit(16), Some(MOD_SHIFT));
        assert_eq!(modifier_bit(17), Some(MOD_CONTROL));
        assert_eq!(modifier_bit(91), Some(MOD_COMMAND));
        assert_eq!(modifier_bit(65), None);
    }
}
