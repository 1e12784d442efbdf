//! Protocol module containing RFB message types, the binary codec, and the
//! pixel encoder.

pub mod codec;
pub mod messages;
pub mod pixel;

pub use codec::ProtocolError;
pub use messages::*;
pub use pixel::PixelEncoder;
