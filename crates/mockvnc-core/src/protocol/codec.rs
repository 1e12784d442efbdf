//! Binary codec for the RFB messages the server sends and parses.
//!
//! Wire layouts:
//! ```text
//! PixelFormat      [bpp:1][depth:1][big_endian:1][true_color:1]
//!                  [red_max:2][green_max:2][blue_max:2]
//!                  [red_shift:1][green_shift:1][blue_shift:1][pad:3]
//! ServerInit       [width:2][height:2][pixel_format:16][name_len:4][name:N]
//! FramebufferUpdate[type=0:1][pad:1][rects=1:2]
//!                  [x:2][y:2][width:2][height:2][encoding=0:4][pixels]
//! ```
//! All multi-byte integers are big-endian.

use thiserror::Error;

use crate::domain::framebuffer::Framebuffer;
use crate::protocol::messages::{
    FramebufferUpdateRequest, PixelFormat, RectangleHeader, ServerInit, ENCODING_RAW,
    PIXEL_FORMAT_LEN, RECTANGLE_HEADER_LEN, SERVER_MSG_FRAMEBUFFER_UPDATE, UPDATE_HEADER_LEN,
};
use crate::protocol::pixel::PixelEncoder;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The leading message type byte is not the one being decoded.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType { expected: u8, actual: u8 },

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── PixelFormat ───────────────────────────────────────────────────────────────

/// Appends the 16-byte wire form of `pf` to `buf`.
pub fn encode_pixel_format(buf: &mut Vec<u8>, pf: &PixelFormat) {
    buf.push(pf.bits_per_pixel);
    buf.push(pf.depth);
    buf.push(pf.big_endian_flag);
    buf.push(pf.true_color_flag);
    buf.extend_from_slice(&pf.red_max.to_be_bytes());
    buf.extend_from_slice(&pf.green_max.to_be_bytes());
    buf.extend_from_slice(&pf.blue_max.to_be_bytes());
    buf.push(pf.red_shift);
    buf.push(pf.green_shift);
    buf.push(pf.blue_shift);
    buf.extend_from_slice(&[0, 0, 0]); // padding
}

/// Decodes a [`PixelFormat`] from the first 16 bytes of `p`.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if `p` is shorter than 16 bytes.
pub fn decode_pixel_format(p: &[u8]) -> Result<PixelFormat, ProtocolError> {
    require_len(p, PIXEL_FORMAT_LEN)?;
    Ok(PixelFormat {
        bits_per_pixel: p[0],
        depth: p[1],
        big_endian_flag: p[2],
        true_color_flag: p[3],
        red_max: read_u16(p, 4),
        green_max: read_u16(p, 6),
        blue_max: read_u16(p, 8),
        red_shift: p[10],
        green_shift: p[11],
        blue_shift: p[12],
    })
}

// ── ServerInit ────────────────────────────────────────────────────────────────

/// Encodes a ServerInit message.  The declared name length always equals the
/// byte length of the name that follows.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the name does not fit a u32
/// length field.
pub fn encode_server_init(msg: &ServerInit) -> Result<Vec<u8>, ProtocolError> {
    let name = msg.name.as_bytes();
    let name_len = u32::try_from(name.len())
        .map_err(|_| ProtocolError::MalformedPayload("desktop name too long".to_string()))?;

    let mut buf = Vec::with_capacity(4 + PIXEL_FORMAT_LEN + 4 + name.len());
    buf.extend_from_slice(&msg.width.to_be_bytes());
    buf.extend_from_slice(&msg.height.to_be_bytes());
    encode_pixel_format(&mut buf, &msg.pixel_format);
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name);
    Ok(buf)
}

/// Decodes a ServerInit message, returning it with the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the buffer is truncated or the name is not UTF-8.
pub fn decode_server_init(p: &[u8]) -> Result<(ServerInit, usize), ProtocolError> {
    let fixed = 4 + PIXEL_FORMAT_LEN + 4;
    require_len(p, fixed)?;
    let width = read_u16(p, 0);
    let height = read_u16(p, 2);
    let pixel_format = decode_pixel_format(&p[4..4 + PIXEL_FORMAT_LEN])?;
    let name_len = read_u32(p, 4 + PIXEL_FORMAT_LEN) as usize;
    require_len(p, fixed + name_len)?;
    let name = std::str::from_utf8(&p[fixed..fixed + name_len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("desktop name: {e}")))?
        .to_string();
    Ok((
        ServerInit {
            width,
            height,
            pixel_format,
            name,
        },
        fixed + name_len,
    ))
}

// ── FramebufferUpdateRequest ──────────────────────────────────────────────────

/// Decodes the 9-byte FramebufferUpdateRequest payload (type byte excluded).
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if `p` is shorter than 9 bytes.
pub fn decode_update_request(p: &[u8]) -> Result<FramebufferUpdateRequest, ProtocolError> {
    require_len(p, 9)?;
    Ok(FramebufferUpdateRequest {
        incremental: p[0] != 0,
        x: read_u16(p, 1),
        y: read_u16(p, 3),
        width: read_u16(p, 5),
        height: read_u16(p, 7),
    })
}

// ── FramebufferUpdate ─────────────────────────────────────────────────────────

/// Encodes the whole framebuffer as a single raw-encoded rectangle.
///
/// Rows go top to bottom with no per-row padding; each pixel is produced by
/// `encoder`.  The payload after the headers is exactly
/// `width × height × encoder.bytes_per_pixel()` bytes.
pub fn encode_framebuffer_update(fb: &Framebuffer, encoder: &PixelEncoder) -> Vec<u8> {
    let width = fb.width();
    let height = fb.height();
    let pixel_bytes = usize::from(width) * usize::from(height) * encoder.bytes_per_pixel();

    let mut buf = Vec::with_capacity(UPDATE_HEADER_LEN + RECTANGLE_HEADER_LEN + pixel_bytes);
    buf.push(SERVER_MSG_FRAMEBUFFER_UPDATE);
    buf.push(0x00); // padding
    buf.extend_from_slice(&1u16.to_be_bytes());

    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&width.to_be_bytes());
    buf.extend_from_slice(&height.to_be_bytes());
    buf.extend_from_slice(&ENCODING_RAW.to_be_bytes());

    for row in fb.rows() {
        for cell in row.chunks_exact(Framebuffer::BYTES_PER_CELL) {
            // Cells are stored B, G, R, 0.
            encoder.encode_into(cell[2], cell[1], cell[0], &mut buf);
        }
    }
    buf
}

/// Decodes the FramebufferUpdate header and the first rectangle header.
///
/// Returns the rectangle count, the first rectangle, and the offset at which
/// its pixel data starts.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the buffer is truncated or is not a
/// FramebufferUpdate.
pub fn decode_framebuffer_update_header(
    p: &[u8],
) -> Result<(u16, RectangleHeader, usize), ProtocolError> {
    let total = UPDATE_HEADER_LEN + RECTANGLE_HEADER_LEN;
    require_len(p, total)?;
    if p[0] != SERVER_MSG_FRAMEBUFFER_UPDATE {
        return Err(ProtocolError::UnexpectedMessageType {
            expected: SERVER_MSG_FRAMEBUFFER_UPDATE,
            actual: p[0],
        });
    }
    let rect_count = read_u16(p, 2);
    let r = &p[UPDATE_HEADER_LEN..];
    let rect = RectangleHeader {
        x: read_u16(r, 0),
        y: read_u16(r, 2),
        width: read_u16(r, 4),
        height: read_u16(r, 6),
        encoding: read_u32(r, 8) as i32,
    };
    Ok((rect_count, rect, total))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Caller must have checked the length.
fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Caller must have checked the length.
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
