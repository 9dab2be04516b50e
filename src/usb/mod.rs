mod context;
pub mod transport;

pub use transport::{EP_IN, EP_OUT, UsbTransport};
