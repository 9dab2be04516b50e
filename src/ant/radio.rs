use std::thread;
use std::time::Duration;

use log::{debug, warn};

use super::Transport;
use super::codec::{self, Frame};
use super::constants::*;
use crate::error::{AntError, Result};

/// Radio channel controller: issues configuration commands, awaits their
/// channel-response events, and runs acknowledged and burst transfers with
/// retry and timeout policy.
///
/// Commands are strictly serialized; every operation sends one message and
/// drains its responses before returning.
pub struct Radio<T: Transport> {
    pub(crate) transport: T,
    channel: u8,
    /// Undecoded tail carried between reads.
    rx: Vec<u8>,
}

impl<T: Transport> Radio<T> {
    pub fn new(transport: T, channel: u8) -> Self {
        Radio {
            transport,
            channel,
            rx: Vec::with_capacity(READ_BYTES),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn send_message(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        debug!("--> {command:#04x} {payload:02x?}");
        self.transport.write(&codec::encode(command, payload))
    }

    /// Decode the next frame, reading the transport as needed.
    ///
    /// Returns `Ok(None)` ("empty") after three consecutive read timeouts,
    /// once a final salvage pass over the buffered bytes has come up dry.
    /// Callers decide whether an empty receive is retryable.
    pub fn receive_frame(&mut self) -> Result<Option<Frame>> {
        let mut timeouts = 0;
        loop {
            if let Some(frame) = codec::next_frame(&mut self.rx) {
                debug!("<-- {:#04x} {:02x?}", frame.command, frame.payload);
                return Ok(Some(frame));
            }
            match self.transport.read(READ_BYTES) {
                Ok(bytes) => {
                    self.rx.extend_from_slice(&bytes);
                    timeouts = 0;
                }
                Err(AntError::TransportTimeout) => {
                    timeouts += 1;
                    if timeouts >= DECODE_TIMEOUT_BUDGET {
                        if let Some(frame) = codec::recover_frame(&mut self.rx) {
                            debug!("<-- {:#04x} {:02x?} (salvaged)", frame.command, frame.payload);
                            return Ok(Some(frame));
                        }
                        debug!("read timed out {timeouts} times, giving up on frame");
                        self.rx.clear();
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Send one configuration command and require a NO_ERROR channel response.
    fn command(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        self.send_message(command, payload)?;
        self.check_ok_response(command)
    }

    fn check_ok_response(&mut self, command: u8) -> Result<()> {
        let Some(frame) = self.receive_frame()? else {
            return Err(AntError::ReceiveFailed(format!(
                "no channel response to command {command:#04x}"
            )));
        };
        if frame.command != MSG_CHANNEL_RESPONSE_EVENT {
            return Err(AntError::Protocol(format!(
                "expected channel response to {command:#04x}, got {:#04x}",
                frame.command
            )));
        }
        match frame.payload.get(2) {
            Some(&RESPONSE_NO_ERROR) => Ok(()),
            Some(&event) => Err(AntError::Protocol(format!(
                "command {command:#04x} rejected: {} ({event:#04x})",
                event_name(event)
            ))),
            None => Err(AntError::Protocol("truncated channel response".into())),
        }
    }

    /// Reset the radio and wait for it to announce the restart.
    pub fn reset(&mut self) -> Result<()> {
        self.send_message(MSG_RESET_SYSTEM, &[0x00])?;
        thread::sleep(RESET_SETTLE);
        for _ in 0..RESET_POLL_ATTEMPTS {
            if let Some(frame) = self.receive_frame()? {
                if frame.command == MSG_STARTUP
                    && frame.payload.first() == Some(&STARTUP_COMMAND_RESET)
                {
                    return Ok(());
                }
                debug!(
                    "ignoring {:#04x} while waiting for startup message",
                    frame.command
                );
            }
        }
        Err(AntError::Protocol("no startup message after reset".into()))
    }

    pub fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<()> {
        let mut payload = [0u8; 9];
        payload[0] = network;
        payload[1..].copy_from_slice(key);
        self.command(MSG_SET_NETWORK_KEY, &payload)
    }

    pub fn assign_channel(&mut self) -> Result<()> {
        self.command(MSG_ASSIGN_CHANNEL, &[self.channel, 0x00, 0x00])
    }

    pub fn set_channel_period(&mut self, period: u16) -> Result<()> {
        let [lo, hi] = period.to_le_bytes();
        self.command(MSG_SET_CHANNEL_PERIOD, &[self.channel, lo, hi])
    }

    pub fn set_channel_frequency(&mut self, frequency: u8) -> Result<()> {
        self.command(MSG_SET_CHANNEL_FREQUENCY, &[self.channel, frequency])
    }

    pub fn set_transmit_power(&mut self, power: u8) -> Result<()> {
        self.command(MSG_SET_TRANSMIT_POWER, &[0x00, power])
    }

    pub fn set_search_timeout(&mut self, timeout: u8) -> Result<()> {
        self.command(MSG_SET_SEARCH_TIMEOUT, &[self.channel, timeout])
    }

    pub fn set_channel_id(&mut self, id: [u8; 4]) -> Result<()> {
        self.command(
            MSG_SET_CHANNEL_ID,
            &[self.channel, id[0], id[1], id[2], id[3]],
        )
    }

    pub fn open_channel(&mut self) -> Result<()> {
        self.command(MSG_OPEN_CHANNEL, &[self.channel])
    }

    pub fn close_channel(&mut self) -> Result<()> {
        self.command(MSG_CLOSE_CHANNEL, &[self.channel])
    }

    /// Reliable unicast of exactly 8 data bytes, re-emitted until the radio
    /// reports the transfer completed.
    pub fn send_acknowledged(&mut self, data: &[u8; 8]) -> Result<()> {
        let mut payload = [0u8; 9];
        payload[0] = self.channel;
        payload[1..].copy_from_slice(data);
        for attempt in 1..=ACK_SEND_ATTEMPTS {
            self.send_message(MSG_ACKNOWLEDGED_DATA, &payload)?;
            if self.await_transmit()? {
                return Ok(());
            }
            warn!("acknowledged send attempt {attempt} did not complete");
        }
        Err(AntError::TransmissionFailed(
            "acknowledged send retries exhausted".into(),
        ))
    }

    /// Emit a caller-built burst stream (seq/channel headers already baked
    /// into each 9-byte chunk) and reconcile the transmit outcome.
    pub fn send_burst(&mut self, stream: &[u8], chunk_delay: Option<Duration>) -> Result<()> {
        for attempt in 1..=BURST_SEND_ATTEMPTS {
            for chunk in stream.chunks(9) {
                self.send_message(MSG_BURST_DATA, chunk)?;
                if let Some(delay) = chunk_delay {
                    thread::sleep(delay);
                }
            }
            if self.await_transmit()? {
                return Ok(());
            }
            warn!("burst send attempt {attempt} did not complete");
        }
        Err(AntError::TransmissionFailed(
            "burst send retries exhausted".into(),
        ))
    }

    /// Drain channel events until the pending transfer resolves. `Ok(true)`
    /// on TX_COMPLETED, `Ok(false)` on TX_FAILED or an exhausted read budget.
    fn await_transmit(&mut self) -> Result<bool> {
        for _ in 0..TX_EVENT_READS {
            let Some(frame) = self.receive_frame()? else {
                continue;
            };
            if frame.command != MSG_CHANNEL_RESPONSE_EVENT {
                debug!("ignoring {:#04x} while reconciling transmit", frame.command);
                continue;
            }
            let Some(&event) = frame.payload.get(2) else {
                continue;
            };
            match event {
                EVENT_TRANSFER_TX_START | EVENT_TX => {}
                EVENT_TRANSFER_TX_COMPLETED => return Ok(true),
                EVENT_TRANSFER_TX_FAILED => return Ok(false),
                other => debug!(
                    "ignoring event {} ({other:#04x}) while reconciling transmit",
                    event_name(other)
                ),
            }
        }
        Ok(false)
    }

    /// Wait for the peer's acknowledged-data reply; the leading channel byte
    /// is stripped.
    pub fn receive_acknowledged_reply(&mut self) -> Result<Vec<u8>> {
        for _ in 0..REPLY_ATTEMPTS {
            let Some(frame) = self.receive_frame()? else {
                continue;
            };
            if frame.command == MSG_ACKNOWLEDGED_DATA && !frame.payload.is_empty() {
                return Ok(frame.payload[1..].to_vec());
            }
        }
        Err(AntError::ReceiveFailed("no acknowledged reply".into()))
    }

    /// Accumulate burst fragments until the final-fragment marker (or an
    /// acknowledged-data frame, which also terminates a burst).
    pub fn receive_burst(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for _ in 0..BURST_MAX_FRAMES {
            let Some(frame) = self.receive_frame()? else {
                return Err(AntError::ReceiveFailed("burst receive timed out".into()));
            };
            match frame.command {
                MSG_BURST_DATA => {
                    let Some((&header, fragment)) = frame.payload.split_first() else {
                        return Err(AntError::Protocol("empty burst fragment".into()));
                    };
                    data.extend_from_slice(fragment);
                    if header & BURST_LAST != 0 {
                        return Ok(data);
                    }
                }
                MSG_ACKNOWLEDGED_DATA => {
                    if let Some((_, fragment)) = frame.payload.split_first() {
                        data.extend_from_slice(fragment);
                    }
                    return Ok(data);
                }
                MSG_CHANNEL_RESPONSE_EVENT => {
                    if frame.payload.get(2) == Some(&EVENT_TRANSFER_RX_FAILED) {
                        return Err(AntError::ReceiveFailed("transfer failed mid-burst".into()));
                    }
                }
                other => debug!("ignoring {other:#04x} during burst"),
            }
        }
        Err(AntError::ReceiveFailed(format!(
            "burst exceeded {BURST_MAX_FRAMES} frames"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ant::testing::MockTransport;

    fn radio(transport: MockTransport) -> Radio<MockTransport> {
        Radio::new(transport, 0)
    }

    #[test]
    fn set_channel_frequency_happy_path() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x40, &[0x00, 0x45, 0x00]);
        let mut radio = radio(mock);

        radio.set_channel_frequency(0x02).unwrap();

        assert_eq!(
            radio.transport.written,
            vec![vec![0xA4, 0x02, 0x45, 0x00, 0x02, 0xE1]]
        );
    }

    #[test]
    fn rejected_command_is_a_protocol_error() {
        let mut mock = MockTransport::new();
        // CHANNEL_IN_WRONG_STATE
        mock.queue_frame(0x40, &[0x00, 0x4B, 0x15]);
        let mut radio = radio(mock);

        match radio.open_channel() {
            Err(AntError::Protocol(msg)) => assert!(msg.contains("CHANNEL_IN_WRONG_STATE")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn missing_response_is_receive_failed() {
        let mut radio = radio(MockTransport::new());
        assert!(matches!(
            radio.assign_channel(),
            Err(AntError::ReceiveFailed(_))
        ));
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let mut mock = MockTransport::new();
        let frame = codec::encode(0x40, &[0x00, 0x45, 0x00]);
        mock.queue_bytes(&frame[..3]);
        mock.queue_bytes(&frame[3..]);
        let mut radio = radio(mock);

        let decoded = radio.receive_frame().unwrap().unwrap();
        assert_eq!(decoded.command, 0x40);
        assert_eq!(decoded.payload, [0x00, 0x45, 0x00]);
    }

    #[test]
    fn receive_survives_two_timeouts() {
        let mut mock = MockTransport::new();
        mock.queue_timeout();
        mock.queue_timeout();
        mock.queue_frame(0x4E, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut radio = radio(mock);

        let frame = radio.receive_frame().unwrap().unwrap();
        assert_eq!(frame.command, 0x4E);
    }

    #[test]
    fn receive_surrenders_after_timeout_budget() {
        let mut radio = radio(MockTransport::new());
        assert!(radio.receive_frame().unwrap().is_none());
    }

    #[test]
    fn surrender_salvages_buffered_frame() {
        let mut mock = MockTransport::new();
        // Stuck candidate: length byte promises data that never arrives.
        let mut bytes = vec![0xA4, 0x20];
        bytes.extend_from_slice(&codec::encode(0x4A, &[0x00]));
        mock.queue_bytes(&bytes);
        let mut radio = radio(mock);

        let frame = radio.receive_frame().unwrap().unwrap();
        assert_eq!(frame.command, 0x4A);
        assert!(radio.rx.is_empty());
    }

    #[test]
    fn acknowledged_send_waits_out_tx_start() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x40, &[0x00, 0x4F, 0x0A]);
        mock.queue_frame(0x40, &[0x00, 0x4F, 0x05]);
        let mut radio = radio(mock);

        radio
            .send_acknowledged(&[0x78, 0x00, 0, 0, 0, 0, 0, 0])
            .unwrap();

        assert_eq!(radio.transport.written.len(), 1);
        assert_eq!(
            radio.transport.written[0][..4],
            [0xA4, 0x09, 0x4F, 0x00]
        );
    }

    #[test]
    fn acknowledged_send_retries_after_tx_failed() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x40, &[0x00, 0x4F, 0x06]);
        mock.queue_frame(0x40, &[0x00, 0x4F, 0x05]);
        let mut radio = radio(mock);

        radio
            .send_acknowledged(&[0x78, 0x01, 0, 0, 0, 0, 0, 0])
            .unwrap();

        // Same data re-emitted on the second attempt.
        assert_eq!(radio.transport.written.len(), 2);
        assert_eq!(radio.transport.written[0], radio.transport.written[1]);
    }

    #[test]
    fn acknowledged_send_exhausts_retries() {
        let mut mock = MockTransport::new();
        for _ in 0..ACK_SEND_ATTEMPTS {
            mock.queue_frame(0x40, &[0x00, 0x4F, 0x06]);
        }
        let mut radio = radio(mock);

        assert!(matches!(
            radio.send_acknowledged(&[0u8; 8]),
            Err(AntError::TransmissionFailed(_))
        ));
        assert_eq!(radio.transport.written.len(), ACK_SEND_ATTEMPTS as usize);
    }

    #[test]
    fn acknowledged_reply_skips_other_traffic() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x4E, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_frame(0x4F, &[0x00, 0x39, 0x41, 0, 0, 0, 0, 0, 0]);
        let mut radio = radio(mock);

        let reply = radio.receive_acknowledged_reply().unwrap();
        assert_eq!(reply, [0x39, 0x41, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn burst_receive_assembles_fragments() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x50, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_frame(0x50, &[0x20, 9, 10, 11, 12, 13, 14, 15, 16]);
        mock.queue_frame(0x50, &[0xC0, 17, 18, 0, 0, 0, 0, 0, 0]);
        let mut radio = radio(mock);

        let data = radio.receive_burst().unwrap();
        assert_eq!(data.len(), 24);
        assert_eq!(&data[..18], (1..=18).collect::<Vec<u8>>().as_slice());
    }

    #[test]
    fn burst_receive_accepts_acknowledged_terminator() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x50, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_frame(0x4F, &[0x00, 9, 10, 11, 12, 13, 14, 15, 16]);
        let mut radio = radio(mock);

        let data = radio.receive_burst().unwrap();
        assert_eq!(data, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn burst_receive_aborts_on_rx_failed() {
        let mut mock = MockTransport::new();
        mock.queue_frame(0x50, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
        mock.queue_frame(0x40, &[0x00, 0x50, 0x04]);
        let mut radio = radio(mock);

        assert!(matches!(
            radio.receive_burst(),
            Err(AntError::ReceiveFailed(_))
        ));
    }
}
