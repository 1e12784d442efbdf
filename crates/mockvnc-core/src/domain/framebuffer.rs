//! The served image.
//!
//! A [`Framebuffer`] is loaded once at startup and then shared read-only by
//! every session of the server that owns it.  Each cell is four bytes in
//! B, G, R, 0 order, rows stored top to bottom.

use thiserror::Error;

/// Errors raised while building a [`Framebuffer`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramebufferError {
    /// RFB carries dimensions as u16.
    #[error("image dimensions {width}x{height} exceed the RFB limit of 65535")]
    DimensionsTooLarge { width: u32, height: u32 },

    /// The pixel buffer length does not match the dimensions.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

/// Immutable BGR0 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl Framebuffer {
    /// Bytes per stored cell.
    pub const BYTES_PER_CELL: usize = 4;

    /// Wraps an existing BGR0 buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FramebufferError::BufferSizeMismatch`] if `data` is not
    /// exactly `width × height × 4` bytes.
    pub fn from_bgr0(width: u16, height: u16, data: Vec<u8>) -> Result<Self, FramebufferError> {
        let expected = Self::buffer_len(width, height);
        if data.len() != expected {
            return Err(FramebufferError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Converts an RGBA8 buffer (as produced by image decoders) to BGR0.
    /// Alpha is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FramebufferError`] if the dimensions exceed u16 or the
    /// buffer length does not match.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Self, FramebufferError> {
        let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => return Err(FramebufferError::DimensionsTooLarge { width, height }),
        };
        let expected = Self::buffer_len(w, h);
        if rgba.len() != expected {
            return Err(FramebufferError::BufferSizeMismatch {
                expected,
                actual: rgba.len(),
            });
        }

        let mut data = Vec::with_capacity(expected);
        for px in rgba.chunks_exact(4) {
            data.extend_from_slice(&[px[2], px[1], px[0], 0]);
        }
        Ok(Self {
            width: w,
            height: h,
            data,
        })
    }

    /// A single-colour image.
    pub fn solid(width: u16, height: u16, (r, g, b): (u8, u8, u8)) -> Self {
        let cells = usize::from(width) * usize::from(height);
        let mut data = Vec::with_capacity(cells * Self::BYTES_PER_CELL);
        for _ in 0..cells {
            data.extend_from_slice(&[b, g, r, 0]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Raw BGR0 bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Iterates over rows from top to bottom; each row is `width × 4` bytes.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let row_len = usize::from(self.width) * Self::BYTES_PER_CELL;
        (0..usize::from(self.height)).map(move |y| &self.data[y * row_len..(y + 1) * row_len])
    }

    /// Colour at `(x, y)` as `(r, g, b)`, or `None` outside the image.
    pub fn rgb_at(&self, x: u16, y: u16) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let off = self.offset(x, y);
        Some((self.data[off + 2], self.data[off + 1], self.data[off]))
    }

    /// Overwrites the cell at `(x, y)`; coordinates outside the image are ignored.
    pub(crate) fn set_rgb(&mut self, x: u16, y: u16, (r, g, b): (u8, u8, u8)) {
        if x >= self.width || y >= self.height {
            return;
        }
        let off = self.offset(x, y);
        self.data[off..off + Self::BYTES_PER_CELL].copy_from_slice(&[b, g, r, 0]);
    }

    fn offset(&self, x: u16, y: u16) -> usize {
        (usize::from(y) * usize::from(self.width) + usize::from(x)) * Self::BYTES_PER_CELL
    }

    fn buffer_len(width: u16, height: u16) -> usize {
        usize::from(width) * usize::from(height) * Self::BYTES_PER_CELL
    }
}
