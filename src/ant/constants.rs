use std::time::Duration;

/// Frame sync byte.
pub const SYNC: u8 = 0xA4;
/// Alternate sync byte emitted by some base variants; accepted while resyncing.
pub const SYNC_ALT: u8 = 0xA5;

/// sync(1) + length(1) + command(1) + checksum(1)
pub const FRAME_OVERHEAD: usize = 4;
/// Maximum value of the length byte.
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Chosen USB bulk read size (in bytes).
pub const READ_BYTES: usize = 4096;

//
// Message ids (command byte on the wire)
//
pub const MSG_CHANNEL_RESPONSE_EVENT: u8 = 0x40;
pub const MSG_ASSIGN_CHANNEL: u8 = 0x42;
pub const MSG_SET_CHANNEL_PERIOD: u8 = 0x43;
pub const MSG_SET_SEARCH_TIMEOUT: u8 = 0x44;
pub const MSG_SET_CHANNEL_FREQUENCY: u8 = 0x45;
pub const MSG_SET_NETWORK_KEY: u8 = 0x46;
pub const MSG_SET_TRANSMIT_POWER: u8 = 0x47;
pub const MSG_RESET_SYSTEM: u8 = 0x4A;
pub const MSG_OPEN_CHANNEL: u8 = 0x4B;
pub const MSG_CLOSE_CHANNEL: u8 = 0x4C;
pub const MSG_BROADCAST_DATA: u8 = 0x4E;
pub const MSG_ACKNOWLEDGED_DATA: u8 = 0x4F;
pub const MSG_BURST_DATA: u8 = 0x50;
pub const MSG_SET_CHANNEL_ID: u8 = 0x51;
pub const MSG_STARTUP: u8 = 0x6F;

/// Startup-message cause byte after a commanded reset.
pub const STARTUP_COMMAND_RESET: u8 = 0x20;

/// Marker bit on a burst `seq_channel` header: final fragment of the transfer.
pub const BURST_LAST: u8 = 0x80;

//
// Channel event codes (third payload byte of MSG_CHANNEL_RESPONSE_EVENT)
//
pub const RESPONSE_NO_ERROR: u8 = 0x00;
pub const EVENT_TX: u8 = 0x03;
pub const EVENT_TRANSFER_RX_FAILED: u8 = 0x04;
pub const EVENT_TRANSFER_TX_COMPLETED: u8 = 0x05;
pub const EVENT_TRANSFER_TX_FAILED: u8 = 0x06;
pub const EVENT_TRANSFER_TX_START: u8 = 0x0A;

//
// Retry budgets
//
/// Consecutive read timeouts tolerated before the decoder surrenders.
pub const DECODE_TIMEOUT_BUDGET: u32 = 3;
/// Decode attempts while polling for the startup message after a reset.
pub const RESET_POLL_ATTEMPTS: u32 = 8;
/// Outer retries of an acknowledged send.
pub const ACK_SEND_ATTEMPTS: u32 = 8;
/// Outer retries of a burst send.
pub const BURST_SEND_ATTEMPTS: u32 = 2;
/// Event reads while reconciling a transmit.
pub const TX_EVENT_READS: u32 = 16;
/// Receives while waiting for an acknowledged reply.
pub const REPLY_ATTEMPTS: u32 = 30;
/// Frames accepted in a single burst before aborting.
pub const BURST_MAX_FRAMES: u32 = 128;

//
// Timing
//
/// The radio takes at most 0.5 s to restart; a full second eliminates a race
/// seen on real hardware.
pub const RESET_SETTLE: Duration = Duration::from_secs(1);

/// Diagnostic name for a channel event code.
pub fn event_name(event: u8) -> &'static str {
    match event {
        0 => "RESPONSE_NO_ERROR",
        1 => "EVENT_RX_SEARCH_TIMEOUT",
        2 => "EVENT_RX_FAIL",
        3 => "EVENT_TX",
        4 => "EVENT_TRANSFER_RX_FAILED",
        5 => "EVENT_TRANSFER_TX_COMPLETED",
        6 => "EVENT_TRANSFER_TX_FAILED",
        7 => "EVENT_CHANNEL_CLOSED",
        8 => "EVENT_RX_FAIL_GO_TO_SEARCH",
        9 => "EVENT_CHANNEL_COLLISION",
        10 => "EVENT_TRANSFER_TX_START",
        21 => "CHANNEL_IN_WRONG_STATE",
        22 => "CHANNEL_NOT_OPENED",
        24 => "CHANNEL_ID_NOT_SET",
        25 => "CLOSE_ALL_CHANNELS",
        31 => "TRANSFER_IN_PROGRESS",
        32 => "TRANSFER_SEQUENCE_NUMBER_ERROR",
        33 => "TRANSFER_IN_ERROR",
        40 => "INVALID_MESSAGE",
        41 => "INVALID_NETWORK_NUMBER",
        48 => "INVALID_LIST_ID",
        49 => "INVALID_SCAN_TX_CHANNEL",
        51 => "INVALID_PARAMETER_PROVIDED",
        53 => "EVENT_QUE_OVERFLOW",
        64 => "NVM_FULL_ERROR",
        65 => "NVM_WRITE_ERROR",
        66 => "ASSIGN_CHANNEL_ID",
        75 => "OPEN_CHANNEL",
        81 => "SET_CHANNEL_ID",
        _ => "UNKNOWN",
    }
}
