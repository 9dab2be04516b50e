/// Radio message framing and the channel controller.
pub mod codec;
pub mod constants;
pub mod radio;

pub use codec::Frame;
pub use radio::Radio;

use crate::error::Result;

/// Byte transport carrying framed radio messages, typically the bulk
/// endpoints of a USB base station.
pub trait Transport {
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes. A timed-out read is
    /// [`AntError::TransportTimeout`](crate::error::AntError::TransportTimeout),
    /// distinct from an empty buffer.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;
}
