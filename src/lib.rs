/// Radio framing, channel controller, and the transport trait.
pub mod ant;
/// Supported USB base station variants.
pub mod bases;
pub mod error;
/// Tracker session layer: opcodes, payload upload, data banks.
pub mod tracker;
/// Blocking libusb transport.
pub mod usb;

pub use ant::{Frame, Radio, Transport};
pub use bases::{AntBase, DynastreamBase, FitbitBase};
pub use error::{AntError, Result};
pub use tracker::{Tracker, TrackerInfo};
pub use usb::UsbTransport;
