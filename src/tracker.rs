use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::ant::constants::MSG_BROADCAST_DATA;
use crate::ant::{Radio, Transport};
use crate::error::{AntError, Result};

/// Tracker packet ids are `0x38 + seq`, seq cycling 0..=7.
const PACKET_ID_BASE: u8 = 0x38;

/// Reply classifications (second byte of an opcode reply).
const REPLY_BANK_FOLLOWS: u8 = 0x42;
const REPLY_PAYLOAD_REQUESTED: u8 = 0x61;
const REPLY_DONE: u8 = 0x41;

/// Second byte of every assembled tracker burst.
const TRACKER_BURST_MARKER: u8 = 0x81;

/// Paging command bytes: `0x70` opens a bank read, `0x60` continues it.
const BANK_FIRST_CMD: u8 = 0x70;
const BANK_NEXT_CMD: u8 = 0x60;

const OPCODE_ATTEMPTS: u32 = 4;
const BEACON_ATTEMPTS: u32 = 75;
const BANK_MAX_PAGES: u32 = 2000;

/// Inter-chunk delay for payload bursts.
/// TODO: derive from the channel period instead of a fixed guess.
const PAYLOAD_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Search channel every tracker listens on before it is rekeyed.
const RENDEZVOUS_CHANNEL: [u8; 4] = [0xFF, 0xFF, 0x01, 0x01];
const CHANNEL_PERIOD: u16 = 0x1000;
const CHANNEL_FREQUENCY: u8 = 0x02;
const TRANSMIT_POWER: u8 = 0x03;
const SEARCH_TIMEOUT: u8 = 0xFF;

/// Metadata reported by the tracker's info opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerInfo {
    pub serial: [u8; 5],
    pub firmware_version: u8,
    pub bsl_major: u8,
    pub bsl_minor: u8,
    pub app_major: u8,
    pub app_minor: u8,
    pub in_bsl_mode: bool,
    pub on_charger: bool,
}

impl TrackerInfo {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(AntError::Session(format!(
                "info packet too short: {} bytes",
                data.len()
            )));
        }
        Ok(TrackerInfo {
            serial: data[..5].try_into().unwrap(),
            firmware_version: data[5],
            bsl_major: data[6],
            bsl_minor: data[7],
            app_major: data[8],
            app_minor: data[9],
            in_bsl_mode: data[10] != 0,
            on_charger: data[11] != 0,
        })
    }
}

impl fmt::Display for TrackerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let serial: String = self.serial.iter().map(|b| format!("{b:02x}")).collect();
        writeln!(f, "Tracker Serial: {serial}")?;
        writeln!(f, "Firmware Version: {}", self.firmware_version)?;
        writeln!(f, "BSL Version: {}.{}", self.bsl_major, self.bsl_minor)?;
        writeln!(f, "APP Version: {}.{}", self.app_major, self.app_minor)?;
        writeln!(f, "In Mode BSL? {}", self.in_bsl_mode)?;
        write!(f, "On Charger? {}", self.on_charger)
    }
}

/// One sync session with a tracker.
///
/// Holds the controller exclusively for its lifetime; opcode/reply pairs are
/// strictly serialized and every tracker packet carries a fresh id from the
/// session's sequence counter.
pub struct Tracker<'r, T: Transport> {
    radio: &'r mut Radio<T>,
    /// Cycles 0..=7; the on-wire packet id is `0x38 + packet_seq`.
    packet_seq: u8,
    /// Last emitted packet id, cross-checked against replies.
    current_packet_id: u8,
    /// Paging cursor for data-bank reads.
    current_bank_id: u8,
    info: Option<TrackerInfo>,
}

impl<'r, T: Transport> Tracker<'r, T> {
    pub fn new(radio: &'r mut Radio<T>) -> Self {
        // The tracker refuses to talk unless the first packet id after a
        // reset is 0x39, so one counter value is consumed up front.
        Tracker {
            radio,
            packet_seq: 1,
            current_packet_id: PACKET_ID_BASE,
            current_bank_id: 0,
            info: None,
        }
    }

    fn gen_packet_id(&mut self) -> u8 {
        self.current_packet_id = PACKET_ID_BASE + self.packet_seq;
        self.packet_seq = (self.packet_seq + 1) % 8;
        self.current_packet_id
    }

    /// Cached metadata from the last [`get_info`](Self::get_info) call.
    pub fn info(&self) -> Option<&TrackerInfo> {
        self.info.as_ref()
    }

    /// Bring the tracker up for transfers: rendezvous on the search channel,
    /// reset it, hop to a freshly chosen private channel id, and ping.
    pub fn init_for_transfer(&mut self) -> Result<()> {
        self.init_channel(RENDEZVOUS_CHANNEL)?;
        self.wait_for_beacon()?;
        self.reset_tracker()?;

        // Tell the tracker which channel id to hop to for the transfer.
        let mut rng = rand::thread_rng();
        let cid: [u8; 2] = [rng.gen_range(0..=254), rng.gen_range(0..=254)];
        info!("rekeying tracker to channel id {:02x}{:02x}", cid[0], cid[1]);
        self.radio
            .send_acknowledged(&[0x78, 0x02, cid[0], cid[1], 0x00, 0x00, 0x00, 0x00])?;
        self.radio.close_channel()?;
        self.init_channel([cid[0], cid[1], 0x01, 0x01])?;
        self.wait_for_beacon()?;
        self.ping()
    }

    fn init_channel(&mut self, channel_id: [u8; 4]) -> Result<()> {
        self.radio.reset()?;
        self.radio.set_network_key(0, &[0u8; 8])?;
        self.radio.assign_channel()?;
        self.radio.set_channel_period(CHANNEL_PERIOD)?;
        self.radio.set_channel_frequency(CHANNEL_FREQUENCY)?;
        self.radio.set_transmit_power(TRANSMIT_POWER)?;
        self.radio.set_search_timeout(SEARCH_TIMEOUT)?;
        self.radio.set_channel_id(channel_id)?;
        self.radio.open_channel()
    }

    /// Wait for the tracker's periodic broadcast on the open channel.
    pub fn wait_for_beacon(&mut self) -> Result<()> {
        debug!("waiting for tracker beacon");
        for _ in 0..BEACON_ATTEMPTS {
            if let Some(frame) = self.radio.receive_frame()? {
                if frame.command == MSG_BROADCAST_DATA {
                    return Ok(());
                }
            }
        }
        Err(AntError::Session("failed to see tracker beacon".into()))
    }

    pub fn reset_tracker(&mut self) -> Result<()> {
        self.radio
            .send_acknowledged(&[0x78, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
    }

    pub fn ping(&mut self) -> Result<()> {
        self.radio
            .send_acknowledged(&[0x78, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
    }

    /// Put the tracker back to sleep at the end of a sync.
    pub fn command_sleep(&mut self) -> Result<()> {
        self.radio
            .send_acknowledged(&[0x7F, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3C])
    }

    fn send_tracker_packet(&mut self, packet: [u8; 7]) -> Result<()> {
        let mut data = [0u8; 8];
        data[0] = self.gen_packet_id();
        data[1..].copy_from_slice(&packet);
        self.radio.send_acknowledged(&data)
    }

    /// Run one application opcode and return its result bytes.
    ///
    /// The reply's second byte classifies the outcome: the tracker either
    /// streams a data bank back, demands a payload upload first, or is simply
    /// done. Packet-id mismatches and unknown classifications retry with a
    /// fresh id.
    pub fn run_opcode(&mut self, opcode: [u8; 7], payload: Option<&[u8]>) -> Result<Vec<u8>> {
        for _ in 0..OPCODE_ATTEMPTS {
            if let Err(err) = self.send_tracker_packet(opcode) {
                warn!("opcode send failed: {err}");
                continue;
            }
            let reply = match self.radio.receive_acknowledged_reply() {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("no opcode reply: {err}");
                    continue;
                }
            };
            if reply.first() != Some(&self.current_packet_id) {
                warn!(
                    "tracker packet ids don't match: {:02x?} != {:#04x}",
                    reply.first(),
                    self.current_packet_id
                );
                continue;
            }
            match reply.get(1) {
                Some(&REPLY_BANK_FOLLOWS) => return self.get_data_bank(),
                Some(&REPLY_PAYLOAD_REQUESTED) => {
                    let Some(payload) = payload else {
                        return Err(AntError::Session(format!(
                            "opcode {opcode:02x?} demands a payload, none supplied"
                        )));
                    };
                    self.send_tracker_payload(payload)?;
                    let mut finished = self.radio.receive_acknowledged_reply()?;
                    if finished.is_empty() {
                        return Err(AntError::Session("truncated upload reply".into()));
                    }
                    finished.remove(0);
                    return Ok(finished);
                }
                Some(&REPLY_DONE) => {
                    let mut done = reply;
                    done.remove(0);
                    return Ok(done);
                }
                other => warn!("unexpected opcode reply classification {other:02x?}"),
            }
        }
        Err(AntError::Session(format!(
            "failed to run opcode {opcode:02x?}"
        )))
    }

    /// Upload a payload as one burst: a prefix chunk carrying the length and
    /// XOR of the payload, then 8-byte data chunks behind cycling headers.
    fn send_tracker_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > u8::MAX as usize {
            return Err(AntError::Session(format!(
                "payload too large for one upload: {} bytes",
                payload.len()
            )));
        }
        let checksum = payload.iter().fold(0u8, |acc, b| acc ^ b);
        let channel = self.radio.channel();
        let chunks: Vec<&[u8]> = payload.chunks(8).collect();

        let mut stream = Vec::with_capacity(9 * (1 + chunks.len()));
        stream.extend_from_slice(&[
            0x00,
            self.gen_packet_id(),
            0x80,
            payload.len() as u8,
            0x00,
            0x00,
            0x00,
            0x00,
            checksum,
        ]);
        for (i, chunk) in chunks.iter().enumerate() {
            let mut header = [0x20, 0x40, 0x60][i % 3];
            if i + 1 == chunks.len() {
                header |= 0x80;
            }
            stream.push(header | channel);
            stream.extend_from_slice(chunk);
            stream.resize(stream.len() + (8 - chunk.len()), 0x00);
        }

        self.radio.send_burst(&stream, Some(PAYLOAD_CHUNK_DELAY))
    }

    /// Receive one tracker burst and unwrap its size-prefixed envelope.
    fn get_tracker_burst(&mut self) -> Result<Vec<u8>> {
        let bank = self.radio.receive_burst()?;
        if bank.get(1) != Some(&TRACKER_BURST_MARKER) {
            return Err(AntError::Protocol(format!(
                "not a tracker burst: {:02x?}",
                &bank[..bank.len().min(2)]
            )));
        }
        let size = match bank.get(2..4) {
            Some(s) => u16::from_le_bytes([s[0], s[1]]) as usize,
            None => return Err(AntError::Protocol("tracker burst truncated".into())),
        };
        if size == 0 {
            return Ok(Vec::new());
        }
        match bank.get(8..8 + size) {
            Some(data) => Ok(data.to_vec()),
            None => Err(AntError::Protocol(format!(
                "tracker burst short: {} of {size} bytes",
                bank.len().saturating_sub(8)
            ))),
        }
    }

    fn check_data_bank(&mut self, index: u8, cmd: u8) -> Result<Vec<u8>> {
        self.send_tracker_packet([cmd, 0x00, 0x02, index, 0x00, 0x00, 0x00])?;
        self.get_tracker_burst()
    }

    /// Page through a data bank until the tracker hands back an empty page.
    fn get_data_bank(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut cmd = BANK_FIRST_CMD;
        for _ in 0..BANK_MAX_PAGES {
            let bank = self.check_data_bank(self.current_bank_id, cmd)?;
            cmd = BANK_NEXT_CMD;
            if bank.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&bank);
            self.current_bank_id = self.current_bank_id.wrapping_add(1);
        }
        Err(AntError::Session("data bank paging never terminated".into()))
    }

    /// Fetch and cache the tracker's identity block.
    pub fn get_info(&mut self) -> Result<TrackerInfo> {
        let data = self.run_opcode([0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], None)?;
        let info = TrackerInfo::parse(&data)?;
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Read the records stored in data bank `index`.
    pub fn read_data_bank(&mut self, index: u8) -> Result<Vec<u8>> {
        self.run_opcode([0x22, index, 0x00, 0x00, 0x00, 0x00, 0x00], None)
    }

    /// Erase data bank `index`, stamping the tracker with the given unix time.
    pub fn erase_data_bank(&mut self, index: u8, timestamp: u32) -> Result<Vec<u8>> {
        let ts = timestamp.to_be_bytes();
        self.run_opcode([0x25, index, ts[0], ts[1], ts[2], ts[3], 0x00], None)
    }
}
