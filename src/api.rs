//! Purpose: Stable public surface consumed by the host gateway and CLI.
//! Exports: writer/reader types, options, error model, wire-event codecs.
//! Invariants: Additive-only; internal core modules stay private.
pub use crate::core::error::{to_exit_code, Error, ErrorKind, ErrorSink, Table};
pub use crate::core::events::{
    encode_fix_message, encode_reset_sequence_number, encode_reset_session_ids, msg_seq_num,
    FixMessage, FragmentHeader, MessageHeader, BEGIN_FLAG, DATA_FRAME_HEADER_LENGTH,
    FIX_MESSAGE_TEMPLATE_ID, RESET_SEQUENCE_NUMBER_TEMPLATE_ID, RESET_SESSION_IDS_TEMPLATE_ID,
    STATUS_OK,
};
pub use crate::core::layout::{
    MIN_FILE_CAPACITY, RECORD_SIZE, SECTOR_SIZE,
};
pub use crate::core::reader::{Records, SequenceNumberIndexReader};
pub use crate::core::writer::{
    lock_path, passing_path, writable_path, Clock, IndexOptions, MonotonicClock,
    RecordingIdLookup, SequenceNumberIndexWriter,
};
