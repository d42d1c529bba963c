//! Frame codec for the shared serial bus.
//!
//! Wire shape: `24 24 <len> <group> <payload...> <crc> 23 23`. `len` counts
//! every byte from itself through the footer inclusive, so
//! `total_frame_length = 3 + len`. `crc` is `sum(header, len, group, payload)
//! mod 256`, computed over everything before the checksum byte itself.

pub const HEADER: [u8; 2] = [0x24, 0x24];
pub const FOOTER: [u8; 2] = [0x23, 0x23];
pub const MIN_FRAME_SIZE: usize = 7;

pub const GROUP_STATUS: u8 = 0x03;
pub const GROUP_COMMAND: u8 = 0x04;

/// A frame pulled off the wire. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub raw: Vec<u8>,
    pub declared_length: u8,
    pub group: u8,
    pub payload: Vec<u8>,
    pub crc_ok: bool,
}

impl DecodedFrame {
    pub fn first_payload_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Builds a complete frame. `length_override` exists because arm frames are
/// fixed at `0x06` regardless of actual payload size.
pub fn encode(payload: &[u8], length_override: Option<u8>) -> Vec<u8> {
    let length = length_override.unwrap_or_else(|| (payload.len() + 3) as u8);
    let mut frame = Vec::with_capacity(HEADER.len() + 1 + payload.len() + 1 + FOOTER.len());
    frame.extend_from_slice(&HEADER);
    frame.push(length);
    frame.extend_from_slice(payload);
    let crc = checksum(&frame);
    frame.push(crc);
    frame.extend_from_slice(&FOOTER);
    frame
}

fn find_header(buffer: &[u8]) -> Option<usize> {
    buffer.windows(HEADER.len()).position(|w| w == HEADER)
}

/// Searches for the footer starting at `from`, returning the index of its
/// first byte. Mirrors the resync recovery path: a declared length that
/// doesn't land on a footer is untrusted, and we instead trust wherever the
/// footer actually shows up.
fn find_footer_from(buffer: &[u8], from: usize) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(FOOTER.len())
        .position(|w| w == FOOTER)
        .map(|idx| from + idx)
}

/// Greedy extractor with resync: pulls every complete frame currently sitting
/// in `buffer`, consuming the bytes it decodes (including any garbage it
/// skips while hunting for a header or footer) and leaving behind only a
/// partial trailing frame, if any.
pub fn extract_frames(buffer: &mut Vec<u8>) -> Vec<DecodedFrame> {
    let mut frames = Vec::new();

    loop {
        if buffer.len() < MIN_FRAME_SIZE {
            break;
        }

        let header_index = match find_header(buffer) {
            Some(idx) => idx,
            None => {
                buffer.clear();
                break;
            }
        };
        if header_index > 0 {
            buffer.drain(..header_index);
        }
        if buffer.len() < MIN_FRAME_SIZE {
            break;
        }

        let mut declared_length = buffer[2];
        let mut total_length = 3 + declared_length as usize;
        if total_length < MIN_FRAME_SIZE {
            // Declared length can't possibly hold header+group+crc+footer.
            buffer.remove(0);
            continue;
        }
        if buffer.len() < total_length {
            break;
        }

        let mut frame_bytes = buffer[..total_length].to_vec();
        if frame_bytes[frame_bytes.len() - FOOTER.len()..] != FOOTER {
            let Some(footer_start) = find_footer_from(buffer, 3) else {
                break;
            };
            total_length = footer_start + FOOTER.len();
            if buffer.len() < total_length {
                break;
            }
            frame_bytes = buffer[..total_length].to_vec();
            declared_length = (total_length - 3) as u8;
        }

        let crc_index = frame_bytes.len() - FOOTER.len() - 1;
        if crc_index <= 3 {
            buffer.remove(0);
            continue;
        }

        let crc_byte = frame_bytes[crc_index];
        let crc_ok = checksum(&frame_bytes[..crc_index]) == crc_byte;
        let inner = &frame_bytes[3..crc_index];
        let group = inner.first().copied().unwrap_or(0);
        let payload = inner.get(1..).map(|s| s.to_vec()).unwrap_or_default();

        frames.push(DecodedFrame {
            raw: frame_bytes,
            declared_length,
            group,
            payload,
            crc_ok,
        });
        buffer.drain(..total_length);
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn encode_decode_round_trip() {
        let payload = [GROUP_COMMAND, 0x01];
        let frame = encode(&payload, None);
        let mut buf = frame.clone();
        let decoded = extract_frames(&mut buf);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].crc_ok);
        assert_eq!(decoded[0].group, GROUP_COMMAND);
        assert_eq!(decoded[0].payload, [0x01]);
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_with_length_override_matches_arm_wire_format() {
        let payload = [GROUP_COMMAND, 0x00, 0xF0, 0x01, 0x0E];
        let frame = encode(&payload, Some(0x06));
        assert_eq!(frame[2], 0x06);
    }

    #[test]
    fn scenario_5_resync_after_garbage_prefix() {
        // length byte 0x06 covers group + 2 payload bytes + crc + footer,
        // so this frame round-trips cleanly once the garbage prefix is
        // discarded; only the resync behavior is under test here.
        let mut buffer = vec![0xAA, 0xBB, 0x24, 0x24, 0x06, 0x03, 0x00, 0x64, 0xB5, 0x23, 0x23];
        let frames = extract_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert!(frame.crc_ok);
        assert_eq!(frame.group, GROUP_STATUS);
        assert_eq!(frame.payload, [0x00, 0x64]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn corrupt_crc_is_still_decoded_but_flagged() {
        let mut frame = encode(&[GROUP_STATUS, 0x01], None);
        let crc_index = frame.len() - FOOTER.len() - 1;
        frame[crc_index] ^= 0xFF;
        let mut buf = frame;
        let decoded = extract_frames(&mut buf);
        assert_eq!(decoded.len(), 1);
        assert!(!decoded[0].crc_ok);
    }

    #[test]
    fn declared_length_below_minimum_drops_one_byte_and_retries() {
        let mut buffer = vec![0x24, 0x24, 0x01, 0x24, 0x24, 0x06, 0x03, 0x00, 0x64, 0xB5, 0x23, 0x23];
        let frames = extract_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].crc_ok);
    }

    #[test]
    fn corrupt_declared_length_recovers_via_footer_search() {
        let good = encode(&[GROUP_STATUS, 0x00, 0x64], None);
        let mut corrupted = good.clone();
        // Understates the true length, so the naive slice at the declared
        // total misses the real footer and the search-forward path kicks in.
        // The stored crc was computed against the true length byte, so the
        // recovered frame necessarily comes back crc_ok=false.
        corrupted[2] = 0x04;
        let mut buf = corrupted;
        let frames = extract_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].crc_ok);
        assert_eq!(frames[0].payload, [0x00, 0x64]);
    }

    #[test]
    fn partial_trailing_frame_is_left_in_buffer() {
        let frame = encode(&[GROUP_STATUS, 0x01], None);
        let mut buf = frame[..frame.len() - 2].to_vec();
        let frames = extract_frames(&mut buf);
        assert!(frames.is_empty());
        assert_eq!(buf.len(), frame.len() - 2);
    }

    #[test]
    fn all_garbage_buffer_never_loops_forever_and_drains() {
        let mut buf = vec![0xAA; 64];
        let frames = extract_frames(&mut buf);
        assert!(frames.is_empty());
        assert!(buf.is_empty());
    }

    #[test_case(0; "zero length payload")]
    #[test_case(1; "single byte payload")]
    #[test_case(16; "larger payload")]
    fn round_trip_holds_for_varied_payload_sizes(extra_bytes: usize) {
        let mut payload = vec![GROUP_COMMAND];
        payload.extend(std::iter::repeat(0x42).take(extra_bytes));
        let mut buf = encode(&payload, None);
        let frames = extract_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].crc_ok);
        assert_eq!(frames[0].payload, payload[1..]);
    }

    #[test]
    fn multiple_frames_in_one_buffer_all_extracted_in_order() {
        let mut buf = encode(&[GROUP_COMMAND, 0x01], None);
        buf.extend(encode(&[GROUP_COMMAND, 0x02], None));
        let frames = extract_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, [0x01]);
        assert_eq!(frames[1].payload, [0x02]);
    }
}
