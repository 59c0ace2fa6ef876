//! Purpose: Track the last archival-log position indexed per transport session.
//! Exports: `PositionWriter`, `read_last_position`.
//! Role: Second framed table of the index file, updated after every fragment.
//! Invariants: A record whose position field is zero is an empty slot; live
//! positions are strictly positive once any fragment has been indexed.
use std::collections::HashMap;

use crate::core::error::{Error, ErrorSink, Table};
use crate::core::layout::{
    put_i64_ordered, read_i32, read_i64, write_i32, write_i64, HEADER_SIZE, POSITION_RECORD_SIZE,
};
use crate::core::sector::SectorFramer;

const RECORDING_ID_OFFSET: usize = 8;
const POSITION_OFFSET: usize = 16;

pub struct PositionWriter {
    framer: SectorFramer,
    offsets: HashMap<i32, usize>,
}

impl PositionWriter {
    pub fn new(region_start: usize, region_end: usize) -> Self {
        Self {
            framer: SectorFramer::new(region_start, region_end),
            offsets: HashMap::new(),
        }
    }

    /// Record that the stream for `transport_session_id` has been consumed
    /// up to `position`. Claims a slot on first sight of the session.
    pub fn indexed_up_to(
        &mut self,
        storage: &mut [u8],
        transport_session_id: i32,
        recording_id: i64,
        position: i64,
        sink: &dyn ErrorSink,
    ) {
        if let Some(&at) = self.offsets.get(&transport_session_id) {
            put_i64_ordered(storage, at + POSITION_OFFSET, position);
            return;
        }

        let mut offset = self.framer.start() + HEADER_SIZE;
        loop {
            let Some(at) = self.framer.claim(offset, POSITION_RECORD_SIZE) else {
                sink.on_error(Error::IndexFull {
                    table: Table::Positions,
                    session: transport_session_id as i64,
                });
                return;
            };

            let slot_position = read_i64(storage, at + POSITION_OFFSET);
            if slot_position == 0 {
                write_i32(storage, at, transport_session_id);
                write_i64(storage, at + RECORDING_ID_OFFSET, recording_id);
                put_i64_ordered(storage, at + POSITION_OFFSET, position);
                self.offsets.insert(transport_session_id, at);
                return;
            }
            if read_i32(storage, at) == transport_session_id {
                self.offsets.insert(transport_session_id, at);
                put_i64_ordered(storage, at + POSITION_OFFSET, position);
                return;
            }
            offset = at + POSITION_RECORD_SIZE;
        }
    }

    pub fn update_checksums(&self, storage: &mut [u8]) {
        self.framer.update_checksums(storage);
    }

    pub fn validate_checksums(&self, storage: &[u8], sink: &dyn ErrorSink) -> Vec<usize> {
        self.framer.validate_checksums(storage, sink)
    }

    pub fn clear_cache(&mut self) {
        self.offsets.clear();
    }
}

/// Replay every live position record. Run once at startup, so a plain
/// linear walk is fine.
pub fn read_last_position(
    storage: &[u8],
    region_start: usize,
    region_end: usize,
    consumer: &mut dyn FnMut(i32, i64, i64),
) {
    let framer = SectorFramer::new(region_start, region_end);
    let mut offset = region_start + HEADER_SIZE;
    while let Some(at) = framer.claim(offset, POSITION_RECORD_SIZE) {
        let position = read_i64(storage, at + POSITION_OFFSET);
        if position != 0 {
            consumer(
                read_i32(storage, at),
                read_i64(storage, at + RECORDING_ID_OFFSET),
                position,
            );
        }
        offset = at + POSITION_RECORD_SIZE;
    }
}
