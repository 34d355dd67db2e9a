//! 64-byte command frame layout.
//!
//! ```text
//! 0      report id (0x04)
//! 1..3   checksum, u16 LE, wrapping sum of bytes [3, 63)
//! 3      command id
//! 4      payload length
//! 5..8   position, u24 LE
//! 8..64  payload, zero padded
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::command::CommandId;
use super::constants::{
    CHECKSUM_END, CHECKSUM_START, CORRELATION_LEN, FRAME_SIZE, HEADER_SIZE, MAX_PAYLOAD,
    MAX_POSITION, REPORT_ID,
};
use crate::error::ProtocolError;

/// 16-bit wrapping sum over the checksummed region of a frame.
pub fn checksum(frame: &[u8; FRAME_SIZE]) -> u16 {
    frame[CHECKSUM_START..CHECKSUM_END]
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// An encoded request, ready to be written to the OUT endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    command: CommandId,
    bytes: [u8; FRAME_SIZE],
}

impl CommandFrame {
    pub fn encode(command: CommandId, payload: &[u8], position: u32) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge { len: payload.len() });
        }
        if position > MAX_POSITION {
            return Err(ProtocolError::PositionOutOfRange { position });
        }

        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = REPORT_ID;
        bytes[3] = command.as_u8();
        bytes[4] = payload.len() as u8;
        LittleEndian::write_u24(&mut bytes[5..HEADER_SIZE], position);
        bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);

        let sum = checksum(&bytes);
        LittleEndian::write_u16(&mut bytes[1..3], sum);

        Ok(Self { command, bytes })
    }

    pub fn command(&self) -> CommandId {
        self.command
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }

    pub fn checksum(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[1..3])
    }

    pub fn position(&self) -> u32 {
        LittleEndian::read_u24(&self.bytes[5..HEADER_SIZE])
    }

    pub fn payload(&self) -> &[u8] {
        let len = self.bytes[4] as usize;
        &self.bytes[HEADER_SIZE..HEADER_SIZE + len]
    }

    /// Bytes a response must echo to be accepted as the answer to this frame.
    pub fn correlation_token(&self) -> [u8; CORRELATION_LEN] {
        let mut token = [0u8; CORRELATION_LEN];
        token.copy_from_slice(&self.bytes[..CORRELATION_LEN]);
        token
    }
}

/// Decoded header fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub report_id: u8,
    pub checksum: u16,
    pub command: CommandId,
    pub payload_len: usize,
    pub position: u32,
}

impl FrameHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort { len: data.len() });
        }
        let command =
            CommandId::from_u8(data[3]).ok_or(ProtocolError::UnknownCommand { id: data[3] })?;
        Ok(Self {
            report_id: data[0],
            checksum: LittleEndian::read_u16(&data[1..3]),
            command,
            payload_len: data[4] as usize,
            position: LittleEndian::read_u24(&data[5..HEADER_SIZE]),
        })
    }
}
