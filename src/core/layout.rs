//! Purpose: Fix the on-disk layout shared by the writer, reader, and CLI.
//! Exports: sector/record constants, `SchemaHeader`, region-split helpers.
//! Role: Single source of truth for offsets; all fields are little-endian.
//! Invariants: Both regions start on a sector boundary and begin with a
//! schema header; records never straddle a sector's checksum trailer.
use std::sync::atomic::{fence, Ordering};

use crate::core::error::Error;

pub const SECTOR_SIZE: usize = 4096;
pub const CHECKSUM_SIZE: usize = 4;
pub const SECTOR_DATA_LENGTH: usize = SECTOR_SIZE - CHECKSUM_SIZE;
pub const FIRST_CHECKSUM_LOCATION: usize = SECTOR_DATA_LENGTH;

pub const HEADER_SIZE: usize = 8;
pub const RECORD_SIZE: usize = 16;
pub const SEQUENCE_NUMBER_OFFSET: usize = 8;
pub const POSITION_RECORD_SIZE: usize = 24;

pub const STORAGE_SCHEMA_ID: u16 = 1;
pub const STORAGE_SCHEMA_VERSION: u16 = 1;
pub const RECORD_TEMPLATE_ID: u16 = 1;
pub const POSITION_TEMPLATE_ID: u16 = 2;

/// One sector per region is the floor, so two sectors is the smallest
/// index file that can hold both tables.
pub const MIN_FILE_CAPACITY: usize = 2 * SECTOR_SIZE;

/// Schema header written at the start of each framed region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SchemaHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl SchemaHeader {
    pub fn record_region() -> Self {
        Self {
            block_length: RECORD_SIZE as u16,
            template_id: RECORD_TEMPLATE_ID,
            schema_id: STORAGE_SCHEMA_ID,
            version: STORAGE_SCHEMA_VERSION,
        }
    }

    pub fn position_region() -> Self {
        Self {
            block_length: POSITION_RECORD_SIZE as u16,
            template_id: POSITION_TEMPLATE_ID,
            schema_id: STORAGE_SCHEMA_ID,
            version: STORAGE_SCHEMA_VERSION,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        write_u16(&mut buf, 0, self.block_length);
        write_u16(&mut buf, 2, self.template_id);
        write_u16(&mut buf, 4, self.schema_id);
        write_u16(&mut buf, 6, self.version);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::corrupt("schema header too small"));
        }
        Ok(Self {
            block_length: read_u16(buf, 0),
            template_id: read_u16(buf, 2),
            schema_id: read_u16(buf, 4),
            version: read_u16(buf, 6),
        })
    }

    pub fn validate(&self, expected: &SchemaHeader) -> Result<(), Error> {
        if self != expected {
            return Err(Error::SchemaMismatch {
                found: self.describe(),
                expected: expected.describe(),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "schema {}/{} v{} block {}",
            self.schema_id, self.template_id, self.version, self.block_length
        )
    }
}

pub fn validate_file_capacity(capacity: usize) -> Result<(), Error> {
    if capacity % SECTOR_SIZE != 0 {
        return Err(Error::usage(format!(
            "file capacity {capacity} is not a multiple of the {SECTOR_SIZE} byte sector size"
        )));
    }
    if capacity < MIN_FILE_CAPACITY {
        return Err(Error::usage(format!(
            "file capacity {capacity} is below the {MIN_FILE_CAPACITY} byte minimum"
        )));
    }
    Ok(())
}

/// Start of the position table. The position region takes the last tenth
/// of the file rounded down to whole sectors, with a one sector floor.
pub fn position_table_offset(capacity: usize) -> usize {
    let sectors = capacity / SECTOR_SIZE;
    let position_sectors = (sectors / 10).max(1);
    (sectors - position_sectors) * SECTOR_SIZE
}

/// A file is initialized once either region header or the first sector
/// checksum has been written; a freshly created file is all zeroes.
pub fn file_initialized(buf: &[u8]) -> bool {
    buf.len() > FIRST_CHECKSUM_LOCATION + CHECKSUM_SIZE
        && (read_u16(buf, 0) != 0 || read_u32(buf, FIRST_CHECKSUM_LOCATION) != 0)
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut out = [0u8; 2];
    out.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(out)
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

pub(crate) fn read_i32(buf: &[u8], offset: usize) -> i32 {
    read_u32(buf, offset) as i32
}

pub(crate) fn read_i64(buf: &[u8], offset: usize) -> i64 {
    read_u64(buf, offset) as i64
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    write_u32(buf, offset, value as u32);
}

pub(crate) fn write_i64(buf: &mut [u8], offset: usize, value: i64) {
    write_u64(buf, offset, value as u64);
}

/// Release-ordered store: everything written before this call is visible
/// to a reader that observes the stored value through `read_u32_acquire`.
pub(crate) fn put_u32_ordered(buf: &mut [u8], offset: usize, value: u32) {
    fence(Ordering::Release);
    write_u32(buf, offset, value);
}

pub(crate) fn put_i64_ordered(buf: &mut [u8], offset: usize, value: i64) {
    fence(Ordering::Release);
    write_i64(buf, offset, value);
}

pub(crate) fn read_u32_acquire(buf: &[u8], offset: usize) -> u32 {
    let value = read_u32(buf, offset);
    fence(Ordering::Acquire);
    value
}
