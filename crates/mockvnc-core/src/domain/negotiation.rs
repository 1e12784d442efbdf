//! Per-session pixel format negotiation.
//!
//! A session starts in [`PixelFormat::rgb888`] and replaces the whole format
//! whenever the client sends a supported `SetPixelFormat`.  Unsupported
//! requests leave the active format in place.  The state remembers the last
//! rejected signature so a client that repeats the same bad request is only
//! reported once.

use crate::protocol::messages::PixelFormat;
use crate::protocol::pixel::PixelEncoder;

/// Outcome of [`PixelFormatState::offer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatDecision {
    /// The format is now active.
    Accepted { signature: String },
    /// The format was ignored.  `first_occurrence` is false when the same
    /// signature was the most recent rejection.
    Rejected {
        signature: String,
        first_occurrence: bool,
    },
}

/// Active pixel format, its encoder, and the rejection memo.
#[derive(Debug, Clone)]
pub struct PixelFormatState {
    current: PixelFormat,
    encoder: PixelEncoder,
    last_rejected: Option<String>,
}

impl PixelFormatState {
    pub fn new(initial: PixelFormat) -> Self {
        Self {
            current: initial,
            encoder: PixelEncoder::for_format(&initial),
            last_rejected: None,
        }
    }

    pub fn current(&self) -> &PixelFormat {
        &self.current
    }

    pub fn encoder(&self) -> &PixelEncoder {
        &self.encoder
    }

    /// Applies a client-requested format.
    ///
    /// Accepts iff true-colour with 8, 24, or 32 bits per pixel.
    pub fn offer(&mut self, candidate: PixelFormat) -> FormatDecision {
        let signature = candidate.signature();
        if candidate.is_supported() {
            self.current = candidate;
            self.encoder = PixelEncoder::for_format(&candidate);
            self.last_rejected = None;
            FormatDecision::Accepted { signature }
        } else {
            let first_occurrence = self.last_rejected.as_deref() != Some(signature.as_str());
            if first_occurrence {
                self.last_rejected = Some(signature.clone());
            }
            FormatDecision::Rejected {
                signature,
                first_occurrence,
            }
        }
    }
}

impl Default for PixelFormatState {
    fn default() -> Self {
        Self::new(PixelFormat::rgb888())
    }
}
