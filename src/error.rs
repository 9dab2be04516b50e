use std::io;

use thiserror::Error;

/// Errors surfaced by the radio stack, from USB transport up to the tracker
/// session layer.
#[derive(Error, Debug)]
pub enum AntError {
    /// USB open or I/O failure that is not a timeout.
    #[error("USB transport error: {0}")]
    Transport(#[from] io::Error),
    /// A bulk read exceeded its deadline.
    #[error("USB read timed out")]
    TransportTimeout,
    /// Unexpected command or channel-event code from the radio.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// TX_FAILED event, or acknowledged-send retries exhausted.
    #[error("transmit failed: {0}")]
    TransmissionFailed(String),
    /// RX_FAILED event mid-burst, or a required reply never arrived.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    /// Tracker-level failure: packet-id mismatch, opcode retries exhausted,
    /// burst overrun.
    #[error("tracker session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, AntError>;
