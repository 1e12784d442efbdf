//! Per-pixel conversion from the 8-bit-per-channel source image into the
//! client's negotiated [`PixelFormat`].
//!
//! The encoder is selected once per format change and then applied to every
//! pixel of every frame, so selection does all the format inspection and the
//! hot path is a single `match`.

use crate::protocol::messages::PixelFormat;

/// Strategy for packing one truecolor pixel into wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoder {
    /// 32bpp: mask, shift, and OR each channel into a word, then emit it in
    /// the requested byte order.
    TrueColor32 {
        red_max: u32,
        green_max: u32,
        blue_max: u32,
        red_shift: u32,
        green_shift: u32,
        blue_shift: u32,
        big_endian: bool,
    },
    /// 24bpp: the three channel bytes unchanged, R then G then B.
    Rgb24,
    /// 8bpp in the fixed 3-3-2 layout.
    Bgr233,
    /// One luminance byte per pixel.  Fallback for every other layout.
    Luma8,
}

impl PixelEncoder {
    /// Selects the encoder for `pf`.
    ///
    /// Any 8bpp layout other than 3-3-2, and any unrecognised depth, falls
    /// back to [`PixelEncoder::Luma8`].
    pub fn for_format(pf: &PixelFormat) -> Self {
        match pf.bits_per_pixel {
            32 => PixelEncoder::TrueColor32 {
                red_max: u32::from(pf.red_max),
                green_max: u32::from(pf.green_max),
                blue_max: u32::from(pf.blue_max),
                red_shift: u32::from(pf.red_shift),
                green_shift: u32::from(pf.green_shift),
                blue_shift: u32::from(pf.blue_shift),
                big_endian: pf.is_big_endian(),
            },
            24 => PixelEncoder::Rgb24,
            8 if pf.is_bgr233_layout() => PixelEncoder::Bgr233,
            _ => PixelEncoder::Luma8,
        }
    }

    /// Number of bytes [`encode_into`](Self::encode_into) appends per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelEncoder::TrueColor32 { .. } => 4,
            PixelEncoder::Rgb24 => 3,
            PixelEncoder::Bgr233 | PixelEncoder::Luma8 => 1,
        }
    }

    /// Appends the wire representation of `(r, g, b)` to `out`.
    #[inline]
    pub fn encode_into(&self, r: u8, g: u8, b: u8, out: &mut Vec<u8>) {
        match *self {
            PixelEncoder::TrueColor32 {
                red_max,
                green_max,
                blue_max,
                red_shift,
                green_shift,
                blue_shift,
                big_endian,
            } => {
                let word = pack_channel(r, red_max, red_shift)
                    | pack_channel(g, green_max, green_shift)
                    | pack_channel(b, blue_max, blue_shift);
                if big_endian {
                    out.extend_from_slice(&word.to_be_bytes());
                } else {
                    out.extend_from_slice(&word.to_le_bytes());
                }
            }
            PixelEncoder::Rgb24 => out.extend_from_slice(&[r, g, b]),
            PixelEncoder::Bgr233 => out.push(((r >> 5) << 5) | ((g >> 5) << 2) | (b >> 6)),
            PixelEncoder::Luma8 => out.push(luma(r, g, b)),
        }
    }

    /// Convenience wrapper returning the bytes for a single pixel.
    pub fn encode(&self, r: u8, g: u8, b: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_per_pixel());
        self.encode_into(r, g, b, &mut out);
        out
    }
}

/// Masks a channel with the format's max and shifts it into place.
///
/// Shifts past the word width contribute nothing instead of overflowing.
#[inline]
fn pack_channel(value: u8, max: u32, shift: u32) -> u32 {
    (u32::from(value) & max).checked_shl(shift).unwrap_or(0)
}

/// Rounded Rec. 601 luminance with integer weights 30/59/11.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = (u32::from(r) * 30 + u32::from(g) * 59 + u32::from(b) * 11 + 50) / 100;
    // Weights sum to 100, so y <= 255.
    y as u8
}
