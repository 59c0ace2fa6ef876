//! Purpose: Read-only access to a quiescent index file.
//! Exports: `SequenceNumberIndexReader`, `Records` iterator.
//! Role: Startup-time recovery view for the gateway and the dump tooling.
//! Invariants: Never mutates the file; corrupt sectors are reported and
//! treated as blank so intact sectors stay readable.
use std::fs;
use std::path::Path;

use crate::core::error::{Error, ErrorSink};
use crate::core::layout::{
    self, read_u32_acquire, read_u64, SchemaHeader, HEADER_SIZE, RECORD_SIZE,
    SEQUENCE_NUMBER_OFFSET,
};
use crate::core::positions;
use crate::core::sector::{blank_sector, SectorFramer};

#[derive(Debug)]
pub struct SequenceNumberIndexReader {
    buffer: Vec<u8>,
    positions_offset: usize,
    framer: SectorFramer,
}

impl SequenceNumberIndexReader {
    /// Load a stable on-disk file. Checksum failures are reported through
    /// the sink and the affected sectors read as empty; a schema mismatch
    /// is reported and yields an empty view.
    pub fn open(path: impl AsRef<Path>, sink: &dyn ErrorSink) -> Result<Self, Error> {
        let path = path.as_ref();
        let buffer = fs::read(path).map_err(|err| Error::io(path, err))?;
        layout::validate_file_capacity(buffer.len())?;

        let positions_offset = layout::position_table_offset(buffer.len());
        let framer = SectorFramer::new(0, positions_offset);
        let mut reader = Self {
            buffer,
            positions_offset,
            framer,
        };

        if !layout::file_initialized(&reader.buffer) {
            reader.buffer.fill(0);
            return Ok(reader);
        }

        if let Err(err) = SchemaHeader::decode(&reader.buffer)
            .and_then(|found| found.validate(&SchemaHeader::record_region()))
        {
            sink.on_error(err);
            reader.buffer.fill(0);
            return Ok(reader);
        }

        let position_framer = SectorFramer::new(positions_offset, reader.buffer.len());
        let mut lost = reader.framer.validate_checksums(&reader.buffer, sink);
        lost.extend(position_framer.validate_checksums(&reader.buffer, sink));
        for sector in lost {
            blank_sector(&mut reader.buffer, sector);
        }
        Ok(reader)
    }

    pub fn lookup(&self, session_id: u64) -> Option<u32> {
        scan_lookup(&self.buffer, &self.framer, session_id)
    }

    pub fn iter(&self) -> Records<'_> {
        Records {
            buffer: &self.buffer,
            framer: self.framer,
            offset: HEADER_SIZE,
        }
    }

    pub fn read_last_position(&self, consumer: &mut dyn FnMut(i32, i64, i64)) {
        positions::read_last_position(
            &self.buffer,
            self.positions_offset,
            self.buffer.len(),
            consumer,
        );
    }
}

/// Lazy walk over the live session records, skipping empty slots.
pub struct Records<'a> {
    buffer: &'a [u8],
    framer: SectorFramer,
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = (u64, u32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let at = self.framer.claim(self.offset, RECORD_SIZE)?;
            self.offset = at + RECORD_SIZE;
            let session_id = read_u64(self.buffer, at);
            if session_id != 0 {
                let sequence_number = read_u32_acquire(self.buffer, at + SEQUENCE_NUMBER_OFFSET);
                return Some((session_id, sequence_number));
            }
        }
    }
}

/// Linear scan of the whole record region; the first match wins. Shared
/// by the reader and the writer's live-buffer lookups.
pub(crate) fn scan_lookup(
    storage: &[u8],
    framer: &SectorFramer,
    session_id: u64,
) -> Option<u32> {
    if session_id == 0 {
        return None;
    }
    let mut offset = HEADER_SIZE;
    while let Some(at) = framer.claim(offset, RECORD_SIZE) {
        if read_u64(storage, at) == session_id {
            return Some(read_u32_acquire(storage, at + SEQUENCE_NUMBER_OFFSET));
        }
        offset = at + RECORD_SIZE;
    }
    None
}
