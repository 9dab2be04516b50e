/// Byte-level framing for the radio link: length-prefixed, XOR-checksummed
/// packets with a sync-byte search for stream recovery.
use log::warn;
use memchr::memchr2;

use super::constants::{FRAME_OVERHEAD, MAX_PAYLOAD_LEN, SYNC, SYNC_ALT};

/// One complete radio message, checksum already verified and stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Frame a command and payload for the wire:
/// `[sync, len, command, payload.., checksum]` where the checksum XORs every
/// preceding byte to zero out the whole frame.
pub fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "frame payload is {} bytes, wire limit is {MAX_PAYLOAD_LEN}",
        payload.len()
    );

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.push(SYNC);
    frame.push(payload.len() as u8);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(xor(&frame));
    frame
}

/// Extract the next valid frame from `buf`, resynchronizing past garbage.
///
/// Consumes everything up to and including the returned frame. Returns `None`
/// when more bytes are needed; the caller reads the transport and retries. On
/// return `buf` is empty or starts at a sync byte, and never holds a complete
/// valid frame at its head.
pub fn next_frame(buf: &mut Vec<u8>) -> Option<Frame> {
    loop {
        match memchr2(SYNC, SYNC_ALT, buf) {
            Some(0) => {}
            Some(pos) => {
                warn!("discarding {pos} bytes before sync");
                buf.drain(..pos);
            }
            None => {
                if !buf.is_empty() {
                    warn!("discarding {} bytes, no sync in buffer", buf.len());
                    buf.clear();
                }
                return None;
            }
        }

        if buf.len() < FRAME_OVERHEAD {
            return None;
        }

        let len = buf[1] as usize;
        if len > MAX_PAYLOAD_LEN {
            warn!("implausible length byte {len:#04x}, resyncing");
            buf.drain(..1);
            continue;
        }

        let total = len + FRAME_OVERHEAD;
        if buf.len() < total {
            return None;
        }

        if xor(&buf[..total]) != 0 {
            warn!("checksum mismatch on candidate frame, resyncing");
            buf.drain(..1);
            continue;
        }

        let command = buf[2];
        let payload = buf[3..total - 1].to_vec();
        buf.drain(..total);
        return Some(Frame { command, payload });
    }
}

/// Best-effort salvage once the read budget is gone: a stuck candidate at the
/// head (a length byte promising data that never arrived) no longer gets the
/// benefit of the doubt. Drop a byte at a time and rescan for any complete
/// frame buried in the buffer.
pub fn recover_frame(buf: &mut Vec<u8>) -> Option<Frame> {
    while !buf.is_empty() {
        if let Some(frame) = next_frame(buf) {
            return Some(frame);
        }
        if buf.is_empty() {
            break;
        }
        buf.drain(..1);
    }
    None
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_reset() {
        assert_eq!(encode(0x4A, &[0x00]), [0xA4, 0x01, 0x4A, 0x00, 0xEF]);
    }

    #[test]
    fn encode_network_key() {
        let frame = encode(0x46, &[0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(frame.len(), 13);
        assert_eq!(frame[0], 0xA4);
        assert_eq!(frame[1], 0x09);
        assert_eq!(frame[2], 0x46);
        assert_eq!(frame[12], xor(&frame[..12]));
    }

    #[test]
    #[should_panic(expected = "wire limit")]
    fn encode_rejects_oversized_payload() {
        encode(0x4F, &[0u8; 33]);
    }

    #[test]
    fn encoded_frames_xor_to_zero() {
        for payload in [&[][..], &[0x01][..], &[1, 2, 3, 4, 5, 6, 7, 8][..]] {
            assert_eq!(xor(&encode(0x4F, payload)), 0);
        }
    }

    #[test]
    fn round_trip() {
        let mut buf = encode(0x50, &[0x20, 1, 2, 3, 4, 5, 6, 7, 8]);
        let frame = next_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x50);
        assert_eq!(frame.payload, [0x20, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_prefix_garbage() {
        let mut buf = vec![0x12, 0x34, 0xA4, 0x01, 0x4A, 0x00, 0xEF];
        let frame = next_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x4A);
        assert_eq!(frame.payload, [0x00]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_corrupt_frame() {
        let mut buf = vec![0xA4, 0x01, 0x4A, 0x00, 0xEE];
        buf.extend_from_slice(&[0xA4, 0x01, 0x4A, 0x00, 0xEF]);
        let frame = next_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x4A);
        assert_eq!(frame.payload, [0x00]);
        assert!(buf.is_empty());
    }

    #[test]
    fn flipped_byte_is_never_yielded() {
        let good = encode(0x40, &[0x00, 0x45, 0x00]);
        let tail = Frame {
            command: 0x4A,
            payload: vec![0x00],
        };
        for i in 0..good.len() {
            let mut buf = good.clone();
            buf[i] ^= 0x08;
            // Enough trailing traffic to resolve any plausible-but-corrupt
            // candidate the flip may have produced.
            for _ in 0..8 {
                buf.extend_from_slice(&encode(tail.command, &tail.payload));
            }
            let mut yielded = Vec::new();
            while let Some(frame) = next_frame(&mut buf) {
                yielded.push(frame);
            }
            assert!(!yielded.is_empty());
            assert!(yielded.iter().all(|f| *f == tail));
        }
    }

    #[test]
    fn partial_frame_requests_more_data() {
        let full = encode(0x40, &[0x00, 0x45, 0x00]);
        let mut buf = full[..5].to_vec();
        assert_eq!(next_frame(&mut buf), None);
        assert_eq!(buf, &full[..5]);

        buf.extend_from_slice(&full[5..]);
        let frame = next_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x40);
        assert!(buf.is_empty());
    }

    #[test]
    fn implausible_length_byte_resyncs() {
        // 0xA4 followed by an out-of-range length, then a valid frame.
        let mut buf = vec![0xA4, 0xFF, 0x00];
        buf.extend_from_slice(&encode(0x4A, &[0x00]));
        let frame = next_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x4A);
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_prefix_then_frame_resyncs() {
        let prefixes: [&[u8]; 4] = [
            &[],
            &[0x00, 0x01, 0x02],
            &[0xA5, 0x37],
            &[0xA4, 0x02, 0x40],
        ];
        for prefix in prefixes {
            let mut buf = prefix.to_vec();
            buf.extend_from_slice(&encode(0x6F, &[0x20]));
            let frame = next_frame(&mut buf).unwrap();
            assert_eq!(frame.command, 0x6F);
            assert_eq!(frame.payload, [0x20]);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn recover_salvages_frame_behind_stuck_candidate() {
        // Length byte promises 32 payload bytes that never arrive; a complete
        // frame is buried behind it.
        let mut buf = vec![0xA4, 0x20, 0x4F];
        buf.extend_from_slice(&encode(0x4A, &[0x00]));
        assert_eq!(next_frame(&mut buf), None);
        let frame = recover_frame(&mut buf).unwrap();
        assert_eq!(frame.command, 0x4A);
    }

    #[test]
    fn alternate_sync_byte_is_accepted() {
        let mut frame = encode(0x40, &[0x00, 0x4B, 0x00]);
        frame[0] = SYNC_ALT;
        let len = frame.len();
        frame[len - 1] ^= SYNC ^ SYNC_ALT;
        let mut buf = frame;
        let decoded = next_frame(&mut buf).unwrap();
        assert_eq!(decoded.command, 0x40);
        assert!(buf.is_empty());
    }
}
