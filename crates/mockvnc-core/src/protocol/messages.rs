//! RFB 3.8 message types and constants used by the server.
//!
//! Only the subset of the protocol the server speaks is modelled: the
//! handshake, ServerInit, the client-to-server messages it must parse or
//! skip, and the single-rectangle raw FramebufferUpdate it sends back.
//! All multi-byte integers on the wire are big-endian.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Version string sent by the server as the first 12 bytes of a session.
pub const RFB_VERSION: &[u8; 12] = b"RFB 003.008\n";

/// Length of the version string the client sends back.
pub const VERSION_LEN: usize = 12;

/// Security type "None" (no authentication).
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security-types message advertising exactly one type, "None".
pub const SECURITY_TYPES: [u8; 2] = [1, SECURITY_TYPE_NONE];

/// SecurityResult word meaning "OK".
pub const SECURITY_RESULT_OK: [u8; 4] = [0, 0, 0, 0];

/// Size of an encoded [`PixelFormat`] in bytes, including padding.
pub const PIXEL_FORMAT_LEN: usize = 16;

/// Server-to-client FramebufferUpdate message type.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Raw encoding identifier.
pub const ENCODING_RAW: i32 = 0;

/// Size of the FramebufferUpdate header (type, padding, rectangle count).
pub const UPDATE_HEADER_LEN: usize = 4;

/// Size of one rectangle header (x, y, width, height, encoding).
pub const RECTANGLE_HEADER_LEN: usize = 12;

// ── Pixel format ──────────────────────────────────────────────────────────────

/// The 16-byte RFB PIXEL_FORMAT structure.
///
/// Flags are kept as the raw wire bytes so the 13 field bytes of a decoded
/// structure re-encode unchanged.  The 3 trailing padding bytes are not kept
/// and are always written as zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian_flag: u8,
    pub true_color_flag: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32bpp, depth 24, little-endian true colour with 8-bit channels at
    /// shifts 16/8/0.  Every session starts with this format.
    pub const fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_color_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// The 8bpp 3-3-2 layout (R: 3 bits at 5, G: 3 bits at 2, B: 2 bits at 0).
    pub const fn bgr233() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian_flag: 0,
            true_color_flag: 1,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 5,
            green_shift: 2,
            blue_shift: 0,
        }
    }

    pub fn is_big_endian(&self) -> bool {
        self.big_endian_flag != 0
    }

    pub fn is_true_color(&self) -> bool {
        self.true_color_flag == 1
    }

    /// Whether the server can produce pixels in this format.
    pub fn is_supported(&self) -> bool {
        self.is_true_color() && matches!(self.bits_per_pixel, 8 | 24 | 32)
    }

    /// Whether the channel masks and shifts are exactly the 3-3-2 layout.
    pub fn is_bgr233_layout(&self) -> bool {
        self.red_max == 7
            && self.green_max == 7
            && self.blue_max == 3
            && self.red_shift == 5
            && self.green_shift == 2
            && self.blue_shift == 0
    }

    /// Short human-readable signature used in log lines.
    pub fn signature(&self) -> String {
        format!(
            "{}bpp trueColor={}",
            self.bits_per_pixel, self.true_color_flag
        )
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgb888()
    }
}

// ── Client message type codes ─────────────────────────────────────────────────

/// Client-to-server message type codes the server recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    SetPixelFormat = 0,
    SetEncodings = 2,
    FramebufferUpdateRequest = 3,
    KeyEvent = 4,
    PointerEvent = 5,
    ClientCutText = 6,
    EnableContinuousUpdates = 150,
}

impl TryFrom<u8> for ClientMessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(ClientMessageType::SetPixelFormat),
            2 => Ok(ClientMessageType::SetEncodings),
            3 => Ok(ClientMessageType::FramebufferUpdateRequest),
            4 => Ok(ClientMessageType::KeyEvent),
            5 => Ok(ClientMessageType::PointerEvent),
            6 => Ok(ClientMessageType::ClientCutText),
            150 => Ok(ClientMessageType::EnableContinuousUpdates),
            _ => Err(()),
        }
    }
}

/// Payload sizes (excluding the type byte) of the fixed-length client messages.
pub mod payload_len {
    /// 3 padding bytes + 16-byte pixel format.
    pub const SET_PIXEL_FORMAT: usize = 19;
    /// 1 padding byte + u16 encoding count; followed by count × 4 bytes.
    pub const SET_ENCODINGS_HEADER: usize = 3;
    /// incremental + x + y + width + height.
    pub const FRAMEBUFFER_UPDATE_REQUEST: usize = 9;
    /// down-flag + 2 padding + u32 keysym.
    pub const KEY_EVENT: usize = 7;
    /// button-mask + x + y.
    pub const POINTER_EVENT: usize = 5;
    /// 3 padding bytes + u32 length; followed by the text.
    pub const CLIENT_CUT_TEXT_HEADER: usize = 7;
    /// enable-flag + x + y + width + height.
    pub const ENABLE_CONTINUOUS_UPDATES: usize = 9;
    /// Bytes discarded after an unrecognised message type.
    pub const UNKNOWN_SKIP: usize = 255;
}

// ── Message structs ───────────────────────────────────────────────────────────

/// ServerInit: sent once after the client's ClientInit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    /// Desktop name; sent as raw bytes without a terminator.
    pub name: String,
}

/// FramebufferUpdateRequest as sent by the client.
///
/// The server parses it only for logging: every request is answered with the
/// full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferUpdateRequest {
    pub incremental: bool,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Header of one rectangle inside a FramebufferUpdate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectangleHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_is_twelve_bytes_with_newline() {
        assert_eq!(RFB_VERSION.len(), VERSION_LEN);
        assert_eq!(RFB_VERSION[11], b'\n');
    }

    #[test]
    fn test_default_pixel_format_is_rgb888() {
        let pf = PixelFormat::default();
        assert_eq!(pf.bits_per_pixel, 32);
        assert_eq!(pf.depth, 24);
        assert!(!pf.is_big_endian());
        assert!(pf.is_true_color());
        assert_eq!((pf.red_shift, pf.green_shift, pf.blue_shift), (16, 8, 0));
    }

    #[test]
    fn test_is_supported_accepts_8_24_32_true_color() {
        for bpp in [8, 24, 32] {
            let pf = PixelFormat {
                bits_per_pixel: bpp,
                ..PixelFormat::rgb888()
            };
            assert!(pf.is_supported(), "{bpp}bpp must be supported");
        }
    }

    #[test]
    fn test_is_supported_rejects_16bpp_and_colour_map() {
        let sixteen = PixelFormat {
            bits_per_pixel: 16,
            ..PixelFormat::rgb888()
        };
        let palette = PixelFormat {
            true_color_flag: 0,
            ..PixelFormat::rgb888()
        };
        assert!(!sixteen.is_supported());
        assert!(!palette.is_supported());
    }

    #[test]
    fn test_true_color_flag_must_be_exactly_one() {
        let pf = PixelFormat {
            true_color_flag: 2,
            ..PixelFormat::rgb888()
        };
        assert!(!pf.is_true_color());
    }

    #[test]
    fn test_bgr233_layout_detection() {
        assert!(PixelFormat::bgr233().is_bgr233_layout());
        assert!(!PixelFormat::rgb888().is_bgr233_layout());
    }

    #[test]
    fn test_signature_format() {
        let pf = PixelFormat {
            true_color_flag: 0,
            ..PixelFormat::bgr233()
        };
        assert_eq!(pf.signature(), "8bpp trueColor=0");
    }

    #[test]
    fn test_client_message_type_from_known_codes() {
        assert_eq!(
            ClientMessageType::try_from(0),
            Ok(ClientMessageType::SetPixelFormat)
        );
        assert_eq!(
            ClientMessageType::try_from(3),
            Ok(ClientMessageType::FramebufferUpdateRequest)
        );
        assert_eq!(
            ClientMessageType::try_from(150),
            Ok(ClientMessageType::EnableContinuousUpdates)
        );
    }

    #[test]
    fn test_client_message_type_rejects_unknown_codes() {
        for code in [1u8, 7, 127, 149, 255] {
            assert!(ClientMessageType::try_from(code).is_err(), "code {code}");
        }
    }
}
