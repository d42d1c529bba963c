//! Typed command/status vocabulary and frame builders shared by the actor
//! and arm links. Keeps wire-format knowledge in one place so the links
//! themselves only deal in typed values.

use crate::codec::{self, DecodedFrame, GROUP_COMMAND, GROUP_STATUS};

pub const ACK_BYTE: u8 = 0xFF;
const ARM_FRAME_LENGTH: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorCommand {
    MoveForward = 0x01,
    MoveBackward = 0x02,
    Stop = 0x03,
    Turn90 = 0x04,
    ReadStatus = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorStatus {
    pub is_moving: bool,
    pub distance_cm: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArmCommand {
    ReadStatus = 0x51,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmStatus {
    pub is_busy: bool,
}

pub fn build_actor_command(command: ActorCommand) -> Vec<u8> {
    codec::encode(&[GROUP_COMMAND, command as u8], None)
}

pub fn build_actor_status_request() -> Vec<u8> {
    codec::encode(&[GROUP_STATUS, ActorCommand::ReadStatus as u8], None)
}

pub fn parse_actor_status(frame: &DecodedFrame) -> Option<ActorStatus> {
    if !frame.crc_ok || frame.group != GROUP_STATUS {
        return None;
    }
    let is_moving = *frame.payload.first()? != 0;
    let distance_cm = frame.payload.get(1).copied();
    Some(ActorStatus { is_moving, distance_cm })
}

/// Clamps and rounds to the wire's `[0, 0xFFFF]` coordinate range, per the
/// calibration-deferred identity pixel→mm mapping.
fn clamp_to_u16(value: f32) -> u16 {
    value.round().clamp(0.0, u16::MAX as f32) as u16
}

pub fn build_arm_pick_command(x_mm: f32, y_mm: f32) -> Vec<u8> {
    let x = clamp_to_u16(x_mm);
    let y = clamp_to_u16(y_mm);
    let payload = [
        GROUP_COMMAND,
        (x >> 8) as u8,
        (x & 0xFF) as u8,
        (y >> 8) as u8,
        (y & 0xFF) as u8,
    ];
    codec::encode(&payload, Some(ARM_FRAME_LENGTH))
}

pub fn build_arm_status_request() -> Vec<u8> {
    codec::encode(&[GROUP_STATUS, ArmCommand::ReadStatus as u8], Some(ARM_FRAME_LENGTH))
}

pub fn parse_arm_status(frame: &DecodedFrame) -> Option<ArmStatus> {
    if !frame.crc_ok || frame.group != GROUP_STATUS {
        return None;
    }
    let is_busy = *frame.payload.first()? != 0;
    Some(ArmStatus { is_busy })
}

pub fn is_ack(frame: &DecodedFrame) -> bool {
    frame.crc_ok && frame.group == GROUP_COMMAND && frame.first_payload_byte() == Some(ACK_BYTE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn decode_one(bytes: Vec<u8>) -> DecodedFrame {
        let mut buf = bytes;
        let mut frames = codec::extract_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        frames.remove(0)
    }

    #[test]
    fn actor_command_wire_bytes_match_spec() {
        let frame = build_actor_command(ActorCommand::Stop);
        assert_eq!(frame, vec![0x24, 0x24, 0x05, 0x04, 0x03, checksum_of(&frame), 0x23, 0x23]);
    }

    fn checksum_of(frame: &[u8]) -> u8 {
        codec::checksum(&frame[..frame.len() - 3])
    }

    #[test_case(true, Some(42) ; "moving with distance")]
    #[test_case(false, None ; "stopped with no distance byte")]
    fn actor_status_round_trips(is_moving: bool, distance_cm: Option<u8>) {
        let mut payload = vec![GROUP_STATUS, if is_moving { 1 } else { 0 }];
        if let Some(d) = distance_cm {
            payload.push(d);
        }
        let bytes = codec::encode(&payload, None);
        let frame = decode_one(bytes);
        let status = parse_actor_status(&frame).unwrap();
        assert_eq!(status, ActorStatus { is_moving, distance_cm });
    }

    #[test]
    fn arm_pick_frame_has_fixed_length_byte() {
        let frame = build_arm_pick_command(240.0, 270.0);
        assert_eq!(frame[2], ARM_FRAME_LENGTH);
        assert_eq!(frame[3], GROUP_COMMAND);
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]), 240);
        assert_eq!(u16::from_be_bytes([frame[6], frame[7]]), 270);
    }

    #[test]
    fn arm_pick_coordinates_clamp_to_u16_range() {
        let frame = build_arm_pick_command(-10.0, 1_000_000.0);
        assert_eq!(u16::from_be_bytes([frame[4], frame[5]]), 0);
        assert_eq!(u16::from_be_bytes([frame[6], frame[7]]), u16::MAX);
    }

    #[test]
    fn ack_detection_requires_command_group_and_ack_byte() {
        let bytes = codec::encode(&[GROUP_COMMAND, ACK_BYTE], None);
        let frame = decode_one(bytes);
        assert!(is_ack(&frame));
    }

    #[test]
    fn ack_detection_rejects_invalid_crc() {
        let mut bytes = codec::encode(&[GROUP_COMMAND, ACK_BYTE], None);
        let crc_index = bytes.len() - 3;
        bytes[crc_index] ^= 0xFF;
        let frame = decode_one(bytes);
        assert!(!is_ack(&frame));
    }

    #[test]
    fn arm_status_parses_busy_flag() {
        let bytes = codec::encode(&[GROUP_STATUS, 0x01], Some(ARM_FRAME_LENGTH));
        let frame = decode_one(bytes);
        assert_eq!(parse_arm_status(&frame), Some(ArmStatus { is_busy: true }));
    }
}
