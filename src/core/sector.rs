//! Purpose: Carve a framed region into checksummed sectors and place records.
//! Exports: `SectorFramer` with `claim`, `update_checksums`, `validate_checksums`.
//! Role: Shared framing discipline for the record and position tables.
//! Invariants: A claim never straddles a sector's checksum trailer; the
//! trailer is a CRC-32 over the sector's first 4092 bytes, little-endian.
//! Invariants: The framer owns geometry only; storage is always passed in.
use crate::core::error::{Error, ErrorSink};
use crate::core::layout::{
    read_u32, write_u32, CHECKSUM_SIZE, SECTOR_DATA_LENGTH, SECTOR_SIZE,
};

#[derive(Clone, Copy, Debug)]
pub struct SectorFramer {
    start: usize,
    end: usize,
}

impl SectorFramer {
    /// `start` and `end` are absolute offsets into the shared buffer and
    /// must both lie on sector boundaries.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start % SECTOR_SIZE == 0);
        debug_assert!(end % SECTOR_SIZE == 0);
        debug_assert!(start < end);
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Next absolute offset at or after `offset` where `length` bytes fit
    /// without crossing a checksum trailer, or `None` when the region is
    /// exhausted. Bytes skipped at the end of a sector stay zero.
    pub fn claim(&self, offset: usize, length: usize) -> Option<usize> {
        debug_assert!(length <= SECTOR_DATA_LENGTH);
        if offset < self.start {
            return None;
        }
        let relative = offset - self.start;
        let sector = relative - relative % SECTOR_SIZE;
        let mut claimed = relative;
        if claimed + length > sector + SECTOR_DATA_LENGTH {
            claimed = sector + SECTOR_SIZE;
        }
        let absolute = self.start + claimed;
        if absolute + length > self.end {
            return None;
        }
        Some(absolute)
    }

    /// Recompute and store every sector's checksum trailer. Rewriting all
    /// sectors unconditionally keeps the contract simple; the flush path
    /// runs at most once per flush timeout.
    pub fn update_checksums(&self, storage: &mut [u8]) {
        let mut sector = self.start;
        while sector < self.end {
            let checksum = crc32fast::hash(&storage[sector..sector + SECTOR_DATA_LENGTH]);
            write_u32(storage, sector + SECTOR_DATA_LENGTH, checksum);
            sector += SECTOR_SIZE;
        }
    }

    /// Verify every sector against its stored trailer. Mismatches are
    /// reported through the sink with the sector's absolute offset and
    /// returned so the caller can decide what to do with the content.
    pub fn validate_checksums(&self, storage: &[u8], sink: &dyn ErrorSink) -> Vec<usize> {
        let mut failed = Vec::new();
        let mut sector = self.start;
        while sector < self.end {
            let stored = read_u32(storage, sector + SECTOR_DATA_LENGTH);
            let computed = crc32fast::hash(&storage[sector..sector + SECTOR_DATA_LENGTH]);
            if stored != computed {
                sink.on_error(Error::ChecksumFailed {
                    offset: sector as u64,
                    stored,
                    computed,
                });
                failed.push(sector);
            }
            sector += SECTOR_SIZE;
        }
        failed
    }
}

/// Zero a whole sector, trailer included. Used when load-time validation
/// declares the sector's content lost.
pub fn blank_sector(storage: &mut [u8], sector: usize) {
    storage[sector..sector + SECTOR_DATA_LENGTH + CHECKSUM_SIZE].fill(0);
}
