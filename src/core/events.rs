//! Purpose: Decode the message envelope and payloads offered to the writer.
//! Exports: `FragmentHeader`, `MessageHeader`, `FixMessage`, reset decoders,
//! `msg_seq_num`, plus the matching encoders used to publish these events.
//! Invariants: Envelope and blocks are fixed-layout little-endian; the FIX
//! body is raw ASCII and only tag 34 is ever extracted from it.
use crate::core::error::Error;
use crate::core::layout::{read_i64, read_u16, read_u32, write_i64, write_u16, write_u32};

/// Set on the first fragment of a logical message.
pub const BEGIN_FLAG: u8 = 0x80;

/// Length of the transport's data-frame header, part of the term-roll
/// position arithmetic.
pub const DATA_FRAME_HEADER_LENGTH: usize = 32;

pub const WIRE_SCHEMA_ID: u16 = 2;
pub const WIRE_SCHEMA_VERSION: u16 = 1;
pub const FIX_MESSAGE_TEMPLATE_ID: u16 = 1;
pub const RESET_SESSION_IDS_TEMPLATE_ID: u16 = 2;
pub const RESET_SEQUENCE_NUMBER_TEMPLATE_ID: u16 = 3;

pub const MESSAGE_HEADER_LENGTH: usize = 8;
pub const FIX_MESSAGE_BLOCK_LENGTH: usize = 16;
pub const RESET_SEQUENCE_NUMBER_BLOCK_LENGTH: usize = 8;

pub const STATUS_OK: u8 = 0;

const SOH: u8 = 0x01;

/// Transport metadata accompanying each fragment. Produced by the
/// archival-log poller, consumed here; never encoded by this crate.
#[derive(Clone, Copy, Debug)]
pub struct FragmentHeader {
    pub stream_id: i32,
    pub transport_session_id: i32,
    pub flags: u8,
    pub end_position: i64,
    pub term_buffer_length: i32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl MessageHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < MESSAGE_HEADER_LENGTH {
            return Err(Error::corrupt("message header too small"));
        }
        let header = Self {
            block_length: read_u16(buf, 0),
            template_id: read_u16(buf, 2),
            schema_id: read_u16(buf, 4),
            version: read_u16(buf, 6),
        };
        if header.schema_id != WIRE_SCHEMA_ID {
            return Err(Error::corrupt(format!(
                "unknown wire schema {}, expected {}",
                header.schema_id, WIRE_SCHEMA_ID
            )));
        }
        Ok(header)
    }

    fn encode_into(buf: &mut Vec<u8>, template_id: u16, block_length: u16) {
        let mut header = [0u8; MESSAGE_HEADER_LENGTH];
        write_u16(&mut header, 0, block_length);
        write_u16(&mut header, 2, template_id);
        write_u16(&mut header, 4, WIRE_SCHEMA_ID);
        write_u16(&mut header, 6, WIRE_SCHEMA_VERSION);
        buf.extend_from_slice(&header);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixMessage<'a> {
    pub session: i64,
    pub status: u8,
    pub body: &'a [u8],
}

impl<'a> FixMessage<'a> {
    /// `offset` points at the block, immediately after the envelope.
    pub fn decode(buf: &'a [u8], offset: usize, block_length: u16) -> Result<Self, Error> {
        let block_length = block_length as usize;
        if block_length < FIX_MESSAGE_BLOCK_LENGTH {
            return Err(Error::corrupt("fix message block too short"));
        }
        if buf.len() < offset + block_length {
            return Err(Error::corrupt("fix message truncated"));
        }
        let session = read_i64(buf, offset);
        let status = buf[offset + 8];
        let body_length = read_u32(buf, offset + 12) as usize;
        let body_start = offset + block_length;
        if buf.len() < body_start + body_length {
            return Err(Error::corrupt("fix body truncated"));
        }
        Ok(Self {
            session,
            status,
            body: &buf[body_start..body_start + body_length],
        })
    }
}

pub fn decode_reset_session(buf: &[u8], offset: usize, block_length: u16) -> Result<i64, Error> {
    if (block_length as usize) < RESET_SEQUENCE_NUMBER_BLOCK_LENGTH
        || buf.len() < offset + RESET_SEQUENCE_NUMBER_BLOCK_LENGTH
    {
        return Err(Error::corrupt("reset event truncated"));
    }
    Ok(read_i64(buf, offset))
}

/// Extract the FIX MsgSeqNum (tag 34) from a raw SOH-delimited body.
pub fn msg_seq_num(body: &[u8]) -> Result<u32, Error> {
    let mut at_tag_start = true;
    let mut index = 0;
    while index < body.len() {
        if at_tag_start && body[index..].starts_with(b"34=") {
            return parse_seq_num(&body[index + 3..]);
        }
        at_tag_start = body[index] == SOH;
        index += 1;
    }
    Err(Error::corrupt("fix body has no MsgSeqNum"))
}

fn parse_seq_num(digits: &[u8]) -> Result<u32, Error> {
    let mut value: u32 = 0;
    let mut seen = false;
    for &byte in digits {
        if byte == SOH {
            break;
        }
        if !byte.is_ascii_digit() {
            return Err(Error::corrupt("MsgSeqNum is not numeric"));
        }
        value = value
            .checked_mul(10)
            .and_then(|value| value.checked_add((byte - b'0') as u32))
            .ok_or_else(|| Error::corrupt("MsgSeqNum overflows"))?;
        seen = true;
    }
    if !seen {
        return Err(Error::corrupt("MsgSeqNum is empty"));
    }
    Ok(value)
}

/// Encode a FixMessage event as the gateway publishes it.
pub fn encode_fix_message(session: i64, status: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LENGTH + FIX_MESSAGE_BLOCK_LENGTH + body.len());
    MessageHeader::encode_into(&mut buf, FIX_MESSAGE_TEMPLATE_ID, FIX_MESSAGE_BLOCK_LENGTH as u16);
    let mut block = [0u8; FIX_MESSAGE_BLOCK_LENGTH];
    write_i64(&mut block, 0, session);
    block[8] = status;
    write_u32(&mut block, 12, body.len() as u32);
    buf.extend_from_slice(&block);
    buf.extend_from_slice(body);
    buf
}

pub fn encode_reset_sequence_number(session: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LENGTH + RESET_SEQUENCE_NUMBER_BLOCK_LENGTH);
    MessageHeader::encode_into(
        &mut buf,
        RESET_SEQUENCE_NUMBER_TEMPLATE_ID,
        RESET_SEQUENCE_NUMBER_BLOCK_LENGTH as u16,
    );
    let mut block = [0u8; RESET_SEQUENCE_NUMBER_BLOCK_LENGTH];
    write_i64(&mut block, 0, session);
    buf.extend_from_slice(&block);
    buf
}

pub fn encode_reset_session_ids() -> Vec<u8> {
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LENGTH);
    MessageHeader::encode_into(&mut buf, RESET_SESSION_IDS_TEMPLATE_ID, 0);
    buf
}
