//! Purpose: Single-writer engine maintaining the on-disk sequence number index.
//! Exports: `SequenceNumberIndexWriter`, `IndexOptions`, `Clock`, `MonotonicClock`,
//! `RecordingIdLookup`.
//! Role: Consumes decoded message fragments, mutates the in-memory buffer, and
//! periodically flips it with the on-disk file through the passing place.
//! Invariants: All mutation happens on one thread; errors on the ingest path go
//! to the sink, never up the call stack.
//! Invariants: Two of the three file paths exist at every instant; the canonical
//! index file is only ever replaced by rename.
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fs2::FileExt;

use crate::core::error::{Error, ErrorSink, Table};
use crate::core::events::{
    self, FixMessage, FragmentHeader, MessageHeader, BEGIN_FLAG, DATA_FRAME_HEADER_LENGTH,
    FIX_MESSAGE_TEMPLATE_ID, MESSAGE_HEADER_LENGTH, RESET_SEQUENCE_NUMBER_TEMPLATE_ID,
    RESET_SESSION_IDS_TEMPLATE_ID, STATUS_OK,
};
use crate::core::layout::{
    self, put_u32_ordered, read_u32, read_u64, write_u64, SchemaHeader, HEADER_SIZE, RECORD_SIZE,
    SEQUENCE_NUMBER_OFFSET,
};
use crate::core::mapped::{acquire_write_lock, fsync_parent_dir, MappedFile};
use crate::core::positions::{self, PositionWriter};
use crate::core::reader;
use crate::core::sector::{blank_sector, SectorFramer};

/// Monotonic millisecond source used only for flush-timeout scheduling.
pub trait Clock {
    fn millis(&self) -> u64;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Resolves a transport session id to the archival-log recording that
/// carries it. May block briefly on the first call per id.
pub trait RecordingIdLookup {
    fn recording_id(&self, transport_session_id: i32) -> i64;
}

#[derive(Clone, Debug)]
pub struct IndexOptions {
    path: PathBuf,
    file_capacity: usize,
    stream_id: i32,
    flush_timeout_ms: u64,
}

impl IndexOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_capacity: 8 * 1024 * 1024,
            stream_id: 1,
            flush_timeout_ms: 10_000,
        }
    }

    pub fn with_file_capacity(mut self, file_capacity: usize) -> Self {
        self.file_capacity = file_capacity;
        self
    }

    pub fn with_stream_id(mut self, stream_id: i32) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_flush_timeout_ms(mut self, flush_timeout_ms: u64) -> Self {
        self.flush_timeout_ms = flush_timeout_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_capacity(&self) -> usize {
        self.file_capacity
    }
}

pub fn writable_path(index_path: &Path) -> PathBuf {
    suffixed(index_path, ".write")
}

pub fn passing_path(index_path: &Path) -> PathBuf {
    suffixed(index_path, ".passing")
}

pub fn lock_path(index_path: &Path) -> PathBuf {
    suffixed(index_path, ".lock")
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub struct SequenceNumberIndexWriter {
    buffer: Vec<u8>,
    file_capacity: usize,
    stream_id: i32,
    positions_offset: usize,
    framer: SectorFramer,
    record_offsets: HashMap<u64, usize>,
    positions: PositionWriter,
    index_path: PathBuf,
    writable_path: PathBuf,
    passing_path: PathBuf,
    index_file: MappedFile,
    writable_file: MappedFile,
    lock: File,
    sink: Box<dyn ErrorSink>,
    clock: Box<dyn Clock>,
    recordings: Box<dyn RecordingIdLookup>,
    flush_timeout_ms: u64,
    last_flush_ms: u64,
    has_saved_record_since_flush: bool,
    next_roll_position: Option<i64>,
    open: bool,
}

impl SequenceNumberIndexWriter {
    pub fn new(
        options: IndexOptions,
        sink: Box<dyn ErrorSink>,
        clock: Box<dyn Clock>,
        recordings: Box<dyn RecordingIdLookup>,
    ) -> Result<Self, Error> {
        let file_capacity = options.file_capacity;
        layout::validate_file_capacity(file_capacity)?;

        let index_path = options.path.clone();
        let writable_path = writable_path(&index_path);
        let passing_path = passing_path(&index_path);
        let lock = acquire_write_lock(lock_path(&index_path))?;

        let index_file = MappedFile::map(&index_path, file_capacity)?;
        let writable_file = MappedFile::map(&writable_path, file_capacity)?;

        let positions_offset = layout::position_table_offset(file_capacity);
        let mut writer = Self {
            buffer: vec![0u8; file_capacity],
            file_capacity,
            stream_id: options.stream_id,
            positions_offset,
            framer: SectorFramer::new(0, positions_offset),
            record_offsets: HashMap::new(),
            positions: PositionWriter::new(positions_offset, file_capacity),
            index_path,
            writable_path,
            passing_path,
            index_file,
            writable_file,
            lock,
            sink,
            clock,
            recordings,
            flush_timeout_ms: options.flush_timeout_ms,
            last_flush_ms: 0,
            has_saved_record_since_flush: false,
            next_roll_position: None,
            open: true,
        };
        writer.initialise_buffer()?;
        Ok(writer)
    }

    /// Offer one decoded fragment from the archival-log poller.
    pub fn on_fragment(
        &mut self,
        src: &[u8],
        src_offset: usize,
        length: usize,
        header: &FragmentHeader,
    ) {
        if header.stream_id != self.stream_id {
            return;
        }
        // Only the first fragment of a logical message carries the header
        // of interest; continuations are skipped wholesale.
        if header.flags & BEGIN_FLAG != BEGIN_FLAG {
            return;
        }

        let message = match MessageHeader::decode(&src[src_offset..]) {
            Ok(message) => message,
            Err(err) => {
                self.sink.on_error(err);
                return;
            }
        };
        let block_offset = src_offset + MESSAGE_HEADER_LENGTH;

        match message.template_id {
            FIX_MESSAGE_TEMPLATE_ID => {
                let fix = match FixMessage::decode(src, block_offset, message.block_length) {
                    Ok(fix) => fix,
                    Err(err) => {
                        self.sink.on_error(err);
                        return;
                    }
                };
                if fix.status != STATUS_OK {
                    return;
                }
                let msg_seq_num = match events::msg_seq_num(fix.body) {
                    Ok(msg_seq_num) => msg_seq_num,
                    Err(err) => {
                        self.sink.on_error(err);
                        return;
                    }
                };
                self.save_record(msg_seq_num, fix.session as u64);
            }
            RESET_SESSION_IDS_TEMPLATE_ID => {
                self.reset_sequence_numbers();
            }
            RESET_SEQUENCE_NUMBER_TEMPLATE_ID => {
                match events::decode_reset_session(src, block_offset, message.block_length) {
                    Ok(session) => self.save_record(0, session as u64),
                    Err(err) => {
                        self.sink.on_error(err);
                        return;
                    }
                }
            }
            _ => {}
        }

        self.check_term_roll(src_offset, length, header);

        let recording_id = self.recordings.recording_id(header.transport_session_id);
        self.positions.indexed_up_to(
            &mut self.buffer,
            header.transport_session_id,
            recording_id,
            header.end_position,
            &*self.sink,
        );
    }

    /// Cooperative tick from the duty-cycle scheduler. Returns 1 when a
    /// time-triggered flush ran, 0 when idle.
    pub fn do_work(&mut self) -> usize {
        if self.has_saved_record_since_flush
            && self.last_flush_ms + self.flush_timeout_ms < self.clock.millis()
        {
            self.update_file();
            return 1;
        }
        0
    }

    /// Zero the whole record table and reinstate its schema header. The
    /// position table is untouched.
    pub fn reset_sequence_numbers(&mut self) {
        self.buffer[..self.positions_offset].fill(0);
        self.write_record_region_header();
        self.record_offsets.clear();
        self.has_saved_record_since_flush = true;
    }

    /// Read-only view of the live buffer; same-thread use only.
    pub fn lookup(&self, session_id: u64) -> Option<u32> {
        reader::scan_lookup(&self.buffer, &self.framer, session_id)
    }

    pub fn read_last_position(&self, consumer: &mut dyn FnMut(i32, i64, i64)) {
        positions::read_last_position(
            &self.buffer,
            self.positions_offset,
            self.file_capacity,
            consumer,
        );
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn passing_place(&self) -> &Path {
        &self.passing_path
    }

    /// Final flush of unsaved records, then release both mappings.
    /// Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        if self.has_saved_record_since_flush {
            self.update_file();
        }
        self.index_file.close();
        self.writable_file.close();
        let _ = self.lock.unlock();
        self.open = false;
    }

    fn save_record(&mut self, new_sequence_number: u32, session_id: u64) {
        if session_id == 0 {
            self.sink
                .on_error(Error::usage("session id 0 is reserved for empty slots"));
            return;
        }

        if let Some(&at) = self.record_offsets.get(&session_id) {
            put_u32_ordered(&mut self.buffer, at + SEQUENCE_NUMBER_OFFSET, new_sequence_number);
            self.has_saved_record_since_flush = true;
            return;
        }

        let mut offset = HEADER_SIZE;
        loop {
            let Some(at) = self.framer.claim(offset, RECORD_SIZE) else {
                self.sink.on_error(Error::IndexFull {
                    table: Table::Records,
                    session: session_id as i64,
                });
                return;
            };

            let slot_session = read_u64(&self.buffer, at);
            let slot_sequence = read_u32(&self.buffer, at + SEQUENCE_NUMBER_OFFSET);
            // A slot is free only when both fields are zero; a freshly
            // reset session keeps its slot through its non-zero id.
            if slot_session == 0 && slot_sequence == 0 {
                write_u64(&mut self.buffer, at, session_id);
                put_u32_ordered(
                    &mut self.buffer,
                    at + SEQUENCE_NUMBER_OFFSET,
                    new_sequence_number,
                );
                self.record_offsets.insert(session_id, at);
                self.has_saved_record_since_flush = true;
                return;
            }
            if slot_session == session_id {
                put_u32_ordered(
                    &mut self.buffer,
                    at + SEQUENCE_NUMBER_OFFSET,
                    new_sequence_number,
                );
                self.record_offsets.insert(session_id, at);
                self.has_saved_record_since_flush = true;
                return;
            }
            offset = at + RECORD_SIZE;
        }
    }

    fn check_term_roll(&mut self, term_offset: usize, length: usize, header: &FragmentHeader) {
        let term_buffer_length = header.term_buffer_length as i64;
        match self.next_roll_position {
            None => {
                let start_position =
                    header.end_position - (length + DATA_FRAME_HEADER_LENGTH) as i64;
                self.next_roll_position =
                    Some(start_position + term_buffer_length - term_offset as i64);
            }
            Some(roll) if header.end_position > roll => {
                self.next_roll_position = Some(roll + term_buffer_length);
                self.update_file();
            }
            Some(_) => {}
        }
    }

    fn update_file(&mut self) {
        self.framer.update_checksums(&mut self.buffer);
        self.positions.update_checksums(&mut self.buffer);
        if !self.save_file() {
            return;
        }
        // A failed flip leaves the previous index canonical and the flush
        // pending; the next tick retries.
        if !self.flip_files() {
            return;
        }
        self.has_saved_record_since_flush = false;
        self.last_flush_ms = self.clock.millis();
    }

    fn save_file(&mut self) -> bool {
        let result = self
            .writable_file
            .write_all(&self.buffer)
            .and_then(|_| self.writable_file.force());
        match result {
            Ok(()) => true,
            Err(err) => {
                self.sink.on_error(err);
                false
            }
        }
    }

    fn flip_files(&mut self) -> bool {
        #[cfg(windows)]
        {
            // Open mappings pin their paths on Windows; drop them around
            // the renames and remap afterwards. The roles swap through the
            // paths themselves.
            self.writable_file.unmap();
            self.index_file.unmap();
        }

        let flipped = self.rename_file(&self.index_path.clone(), &self.passing_path.clone())
            && self.rename_file(&self.writable_path.clone(), &self.index_path.clone())
            && self.rename_file(&self.passing_path.clone(), &self.writable_path.clone());

        if flipped {
            if let Err(err) = fsync_parent_dir(&self.index_path) {
                self.sink.on_error(err);
            }
        }

        #[cfg(windows)]
        {
            if let Err(err) = self.writable_file.remap() {
                self.sink.on_error(err);
            }
            if let Err(err) = self.index_file.remap() {
                self.sink.on_error(err);
            }
        }
        #[cfg(not(windows))]
        {
            if flipped {
                std::mem::swap(&mut self.index_file, &mut self.writable_file);
                self.index_file.set_path(&self.index_path);
                self.writable_file.set_path(&self.writable_path);
            }
        }

        flipped
    }

    fn rename_file(&mut self, src: &Path, dst: &Path) -> bool {
        match fs::rename(src, dst) {
            Ok(()) => true,
            Err(err) => {
                self.sink.on_error(Error::RenameFailed {
                    from: src.to_path_buf(),
                    to: dst.to_path_buf(),
                    source: err,
                });
                false
            }
        }
    }

    fn initialise_buffer(&mut self) -> Result<(), Error> {
        let mut recovered = false;
        loop {
            if layout::file_initialized(self.index_file.buffer()) {
                self.load_file();
                return Ok(());
            }
            if !recovered && self.passing_path.exists() {
                // A crash between the first and second flip renames left
                // the only good snapshot at the passing place.
                match fs::rename(&self.passing_path, &self.index_path) {
                    Ok(()) => {
                        fsync_parent_dir(&self.index_path)?;
                        self.index_file.remap()?;
                        recovered = true;
                        continue;
                    }
                    Err(err) => {
                        self.sink.on_error(Error::RenameFailed {
                            from: self.passing_path.clone(),
                            to: self.index_path.clone(),
                            source: err,
                        });
                    }
                }
            }
            self.initialise_blank_buffer();
            return Ok(());
        }
    }

    fn load_file(&mut self) {
        let disk = self.index_file.buffer();
        match SchemaHeader::decode(disk)
            .and_then(|found| found.validate(&SchemaHeader::record_region()))
        {
            Ok(()) => {}
            Err(err) => {
                self.sink.on_error(err);
                self.initialise_blank_buffer();
                return;
            }
        }

        self.buffer.copy_from_slice(disk);
        let mut lost = self.framer.validate_checksums(&self.buffer, &*self.sink);
        lost.extend(self.positions.validate_checksums(&self.buffer, &*self.sink));
        for sector in lost {
            blank_sector(&mut self.buffer, sector);
        }
        // The region headers are constant; reinstate them in case their
        // sector was blanked above.
        self.write_record_region_header();
        self.write_position_region_header();
    }

    fn initialise_blank_buffer(&mut self) {
        self.buffer.fill(0);
        self.write_record_region_header();
        self.write_position_region_header();
        self.record_offsets.clear();
        self.positions.clear_cache();
    }

    fn write_record_region_header(&mut self) {
        self.buffer[..HEADER_SIZE].copy_from_slice(&SchemaHeader::record_region().encode());
    }

    fn write_position_region_header(&mut self) {
        let at = self.positions_offset;
        self.buffer[at..at + HEADER_SIZE]
            .copy_from_slice(&SchemaHeader::position_region().encode());
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, IndexOptions, RecordingIdLookup, SequenceNumberIndexWriter};
    use crate::core::error::{Error, ErrorKind, ErrorSink};
    use crate::core::events::{
        encode_fix_message, encode_reset_sequence_number, encode_reset_session_ids,
        FragmentHeader, BEGIN_FLAG, STATUS_OK,
    };
    use crate::core::layout::SECTOR_SIZE;
    use crate::core::reader::SequenceNumberIndexReader;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use std::rc::Rc;

    const STREAM_ID: i32 = 7;
    const TERM_LENGTH: i32 = 64 * 1024;

    #[derive(Clone, Default)]
    struct CollectingSink {
        kinds: Rc<RefCell<Vec<ErrorKind>>>,
    }

    impl ErrorSink for CollectingSink {
        fn on_error(&self, error: Error) {
            self.kinds.borrow_mut().push(error.kind());
        }
    }

    #[derive(Clone)]
    struct ManualClock {
        now: Rc<Cell<u64>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(0)),
            }
        }

        fn advance_to(&self, millis: u64) {
            self.now.set(millis);
        }
    }

    impl Clock for ManualClock {
        fn millis(&self) -> u64 {
            self.now.get()
        }
    }

    struct ScaledLookup;

    impl RecordingIdLookup for ScaledLookup {
        fn recording_id(&self, transport_session_id: i32) -> i64 {
            transport_session_id as i64 * 100
        }
    }

    struct Fixture {
        writer: SequenceNumberIndexWriter,
        sink: CollectingSink,
        clock: ManualClock,
        path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture(capacity: usize) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sequence-index");
        let sink = CollectingSink::default();
        let clock = ManualClock::new();
        let writer = SequenceNumberIndexWriter::new(
            IndexOptions::new(&path)
                .with_file_capacity(capacity)
                .with_stream_id(STREAM_ID)
                .with_flush_timeout_ms(100),
            Box::new(sink.clone()),
            Box::new(clock.clone()),
            Box::new(ScaledLookup),
        )
        .expect("writer");
        Fixture {
            writer,
            sink,
            clock,
            path,
            _dir: dir,
        }
    }

    fn header(end_position: i64) -> FragmentHeader {
        FragmentHeader {
            stream_id: STREAM_ID,
            transport_session_id: 3,
            flags: BEGIN_FLAG,
            end_position,
            term_buffer_length: TERM_LENGTH,
        }
    }

    fn offer_fix(fx: &mut Fixture, session: i64, seq: u32, end_position: i64) {
        let body = format!("8=FIX.4.4\x0135=D\x0134={seq}\x01");
        let frame = encode_fix_message(session, STATUS_OK, body.as_bytes());
        let len = frame.len();
        fx.writer.on_fragment(&frame, 0, len, &header(end_position));
    }

    #[test]
    fn saved_record_is_visible_to_lookup() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 42, 1, 1024);
        offer_fix(&mut fx, 42, 2, 2048);
        assert_eq!(fx.writer.lookup(42), Some(2));
        assert_eq!(fx.writer.lookup(43), None);
        assert!(fx.sink.kinds.borrow().is_empty());
    }

    #[test]
    fn fragments_for_other_streams_are_ignored() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        let frame = encode_fix_message(42, STATUS_OK, b"34=5\x01");
        let len = frame.len();
        let mut other = header(1024);
        other.stream_id = STREAM_ID + 1;
        fx.writer.on_fragment(&frame, 0, len, &other);
        assert_eq!(fx.writer.lookup(42), None);

        let mut continuation = header(1024);
        continuation.flags = 0;
        fx.writer.on_fragment(&frame, 0, len, &continuation);
        assert_eq!(fx.writer.lookup(42), None);
    }

    #[test]
    fn failed_message_status_is_skipped() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        let frame = encode_fix_message(42, 1, b"34=5\x01");
        let len = frame.len();
        fx.writer.on_fragment(&frame, 0, len, &header(1024));
        assert_eq!(fx.writer.lookup(42), None);
        assert!(fx.sink.kinds.borrow().is_empty());
    }

    #[test]
    fn per_session_reset_writes_zero_not_absent() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 100, 17, 1024);

        let frame = encode_reset_sequence_number(100);
        let len = frame.len();
        fx.writer.on_fragment(&frame, 0, len, &header(2048));
        assert_eq!(fx.writer.lookup(100), Some(0));

        // The reset session keeps its slot; a new session claims the next.
        offer_fix(&mut fx, 101, 5, 3072);
        assert_eq!(fx.writer.lookup(100), Some(0));
        assert_eq!(fx.writer.lookup(101), Some(5));
    }

    #[test]
    fn reset_session_ids_clears_every_record() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 7, 5, 1024);
        offer_fix(&mut fx, 8, 9, 2048);

        let frame = encode_reset_session_ids();
        let len = frame.len();
        fx.writer.on_fragment(&frame, 0, len, &header(3072));
        assert_eq!(fx.writer.lookup(7), None);
        assert_eq!(fx.writer.lookup(8), None);

        // Applying the reset twice leaves the same empty table.
        fx.writer.reset_sequence_numbers();
        assert_eq!(fx.writer.lookup(7), None);
    }

    #[test]
    fn do_work_flushes_only_after_the_timeout() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 42, 1, 1024);

        fx.clock.advance_to(100);
        assert_eq!(fx.writer.do_work(), 0);

        fx.clock.advance_to(101);
        assert_eq!(fx.writer.do_work(), 1);
        // Nothing new saved, so the next tick is idle.
        fx.clock.advance_to(500);
        assert_eq!(fx.writer.do_work(), 0);
    }

    #[test]
    fn close_flushes_and_is_idempotent() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 42, 9, 1024);
        assert!(fx.writer.is_open());
        fx.writer.close();
        assert!(!fx.writer.is_open());
        fx.writer.close();

        let sink = CollectingSink::default();
        let reader = SequenceNumberIndexReader::open(&fx.path, &sink).expect("reader");
        assert_eq!(reader.lookup(42), Some(9));
        assert!(sink.kinds.borrow().is_empty());
    }

    #[test]
    fn failed_flip_keeps_the_flush_pending() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 42, 1, 1024);

        // A directory squatting on the passing place fails the first flip
        // rename; the old index must stay canonical.
        std::fs::create_dir(fx.writer.passing_place()).expect("blocker");
        fx.clock.advance_to(101);
        assert_eq!(fx.writer.do_work(), 1);
        assert_eq!(fx.sink.kinds.borrow().as_slice(), &[ErrorKind::RenameFailed]);

        // The flush stays pending, so the very next tick retries.
        assert_eq!(fx.writer.do_work(), 1);
        assert_eq!(
            fx.sink.kinds.borrow().as_slice(),
            &[ErrorKind::RenameFailed, ErrorKind::RenameFailed]
        );

        let passing = fx.writer.passing_place().to_path_buf();
        std::fs::remove_dir(passing).expect("unblock");
        assert_eq!(fx.writer.do_work(), 1);
        assert_eq!(fx.sink.kinds.borrow().len(), 2);

        // Flushed for real this time; nothing left to retry.
        fx.clock.advance_to(500);
        assert_eq!(fx.writer.do_work(), 0);

        fx.writer.close();
        let sink = CollectingSink::default();
        let reader = SequenceNumberIndexReader::open(&fx.path, &sink).expect("reader");
        assert_eq!(reader.lookup(42), Some(1));
        assert!(sink.kinds.borrow().is_empty());
    }

    #[test]
    fn term_roll_triggers_a_flush() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 42, 1, 1024);

        // Past the pending roll boundary the writer flushes on its own.
        offer_fix(&mut fx, 42, 2, TERM_LENGTH as i64 + 2048);

        let sink = CollectingSink::default();
        let reader = SequenceNumberIndexReader::open(&fx.path, &sink).expect("reader");
        assert_eq!(reader.lookup(42), Some(2));
    }

    #[test]
    fn reopen_after_close_restores_records_and_positions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sequence-index");
        let sink = CollectingSink::default();
        let clock = ManualClock::new();

        let mut writer = SequenceNumberIndexWriter::new(
            IndexOptions::new(&path)
                .with_file_capacity(4 * SECTOR_SIZE)
                .with_stream_id(STREAM_ID),
            Box::new(sink.clone()),
            Box::new(clock.clone()),
            Box::new(ScaledLookup),
        )
        .expect("writer");
        let body = b"34=11\x01";
        let frame = encode_fix_message(55, STATUS_OK, body);
        let len = frame.len();
        writer.on_fragment(&frame, 0, len, &header(9000));
        writer.close();
        drop(writer);

        let reopened = SequenceNumberIndexWriter::new(
            IndexOptions::new(&path)
                .with_file_capacity(4 * SECTOR_SIZE)
                .with_stream_id(STREAM_ID),
            Box::new(sink.clone()),
            Box::new(clock.clone()),
            Box::new(ScaledLookup),
        )
        .expect("reopen");
        assert_eq!(reopened.lookup(55), Some(11));

        let mut replayed = Vec::new();
        reopened.read_last_position(&mut |session, recording, position| {
            replayed.push((session, recording, position));
        });
        assert_eq!(replayed, vec![(3, 300, 9000)]);
        assert!(sink.kinds.borrow().is_empty());
    }

    #[test]
    fn session_id_zero_is_reported_and_dropped() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        offer_fix(&mut fx, 0, 3, 1024);
        assert_eq!(fx.sink.kinds.borrow().as_slice(), &[ErrorKind::Usage]);
        assert_eq!(fx.writer.lookup(0), None);
    }

    #[test]
    fn second_writer_on_same_index_is_refused() {
        let fx = fixture(4 * SECTOR_SIZE);
        let result = SequenceNumberIndexWriter::new(
            IndexOptions::new(&fx.path).with_file_capacity(4 * SECTOR_SIZE),
            Box::new(CollectingSink::default()),
            Box::new(ManualClock::new()),
            Box::new(ScaledLookup),
        );
        assert!(result.is_err());
    }

    #[test]
    fn capacity_mismatch_on_reopen_is_a_construction_failure() {
        let mut fx = fixture(4 * SECTOR_SIZE);
        fx.writer.close();
        let path = fx.path.clone();
        drop(fx);

        let result = SequenceNumberIndexWriter::new(
            IndexOptions::new(&path).with_file_capacity(8 * SECTOR_SIZE),
            Box::new(CollectingSink::default()),
            Box::new(ManualClock::new()),
            Box::new(ScaledLookup),
        );
        let err = result.err().expect("size mismatch");
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }
}
