use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error classification used at sinks and for exit-code mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    ChecksumFailed,
    IndexFull,
    RenameFailed,
    SchemaMismatch,
    SizeMismatch,
    Usage,
    Corrupt,
    Io,
}

/// Which of the two framed tables a dropped update was aimed at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Table {
    Records,
    Positions,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Records => f.write_str("sequence number"),
            Table::Positions => f.write_str("indexed position"),
        }
    }
}

/// Failures raised by the index. Each variant carries exactly the context
/// its failure site produces; recoverable ones flow through the
/// [`ErrorSink`], construction failures are returned to the caller.
#[derive(Debug)]
pub enum Error {
    /// A sector's payload no longer matches its stored trailer.
    ChecksumFailed {
        offset: u64,
        stored: u32,
        computed: u32,
    },
    /// No free slot left for this session; the update was dropped.
    IndexFull { table: Table, session: i64 },
    /// A rename in the flip or recovery sequence failed.
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// The file header belongs to an incompatible schema.
    SchemaMismatch { found: String, expected: String },
    /// Disk file and in-memory buffer capacities differ.
    SizeMismatch {
        path: PathBuf,
        disk: u64,
        memory: u64,
    },
    /// Caller misuse, such as a bad capacity or a second writer.
    Usage { reason: String },
    /// Malformed bytes in a stored header or a decoded event.
    Corrupt { reason: String },
    /// An underlying filesystem operation failed.
    Io { path: PathBuf, source: io::Error },
}

impl Error {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Error::Corrupt {
            reason: reason.into(),
        }
    }

    pub fn usage(reason: impl Into<String>) -> Self {
        Error::Usage {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ChecksumFailed { .. } => ErrorKind::ChecksumFailed,
            Error::IndexFull { .. } => ErrorKind::IndexFull,
            Error::RenameFailed { .. } => ErrorKind::RenameFailed,
            Error::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::Usage { .. } => ErrorKind::Usage,
            Error::Corrupt { .. } => ErrorKind::Corrupt,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    /// Sector offset, for checksum failures.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::ChecksumFailed { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Session id of a dropped update.
    pub fn session(&self) -> Option<i64> {
        match self {
            Error::IndexFull { session, .. } => Some(*session),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChecksumFailed {
                offset,
                stored,
                computed,
            } => write!(
                f,
                "checksum mismatch at sector offset {offset}: stored {stored:#010x}, computed {computed:#010x}"
            ),
            Error::IndexFull { table, session } => write!(
                f,
                "{table} table out of space, dropped update for session {session}"
            ),
            Error::RenameFailed { from, to, source } => write!(
                f,
                "unable to rename {} to {}: {source}",
                from.display(),
                to.display()
            ),
            Error::SchemaMismatch { found, expected } => write!(
                f,
                "incompatible file schema: found {found}, expected {expected}"
            ),
            Error::SizeMismatch { path, disk, memory } => write!(
                f,
                "{}: disk file is {disk} bytes, expected {memory}",
                path.display()
            ),
            Error::Usage { reason } | Error::Corrupt { reason } => f.write_str(reason),
            Error::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::RenameFailed { source, .. } | Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Sink for errors raised on the ingest path. Implementations must not
/// panic; the writer keeps running after every reported error.
pub trait ErrorSink {
    fn on_error(&self, error: Error);
}

/// Process exit code for the CLI, following the BSD sysexits conventions.
pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Usage => 64,
        ErrorKind::ChecksumFailed | ErrorKind::SchemaMismatch | ErrorKind::Corrupt => 65,
        ErrorKind::IndexFull => 70,
        ErrorKind::RenameFailed | ErrorKind::Io => 74,
        ErrorKind::SizeMismatch => 78,
    }
}

#[cfg(test)]
mod tests {
    use super::{to_exit_code, Error, ErrorKind, Table};
    use std::error::Error as StdError;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_follow_sysexits_classes() {
        assert_eq!(to_exit_code(ErrorKind::Usage), 64);
        assert_eq!(to_exit_code(ErrorKind::ChecksumFailed), 65);
        assert_eq!(to_exit_code(ErrorKind::SchemaMismatch), 65);
        assert_eq!(to_exit_code(ErrorKind::Corrupt), 65);
        assert_eq!(to_exit_code(ErrorKind::IndexFull), 70);
        assert_eq!(to_exit_code(ErrorKind::RenameFailed), 74);
        assert_eq!(to_exit_code(ErrorKind::Io), 74);
        assert_eq!(to_exit_code(ErrorKind::SizeMismatch), 78);
    }

    #[test]
    fn checksum_failure_reports_sector_and_both_sums() {
        let err = Error::ChecksumFailed {
            offset: 4096,
            stored: 0xDEAD_BEEF,
            computed: 0x0BAD_F00D,
        };
        assert_eq!(err.kind(), ErrorKind::ChecksumFailed);
        assert_eq!(err.offset(), Some(4096));
        let rendered = err.to_string();
        assert!(rendered.contains("4096"));
        assert!(rendered.contains("0xdeadbeef"));
        assert!(rendered.contains("0x0badf00d"));
    }

    #[test]
    fn dropped_update_names_table_and_session() {
        let err = Error::IndexFull {
            table: Table::Records,
            session: 42,
        };
        assert_eq!(err.kind(), ErrorKind::IndexFull);
        assert_eq!(err.session(), Some(42));
        let rendered = err.to_string();
        assert!(rendered.contains("sequence number table"));
        assert!(rendered.contains("42"));

        let err = Error::IndexFull {
            table: Table::Positions,
            session: -9,
        };
        assert!(err.to_string().contains("indexed position table"));
    }

    #[test]
    fn rename_failure_names_both_paths_and_keeps_the_cause() {
        let err = Error::RenameFailed {
            from: PathBuf::from("index"),
            to: PathBuf::from("index.passing"),
            source: io::Error::from_raw_os_error(libc::EACCES),
        };
        assert_eq!(err.kind(), ErrorKind::RenameFailed);
        let rendered = err.to_string();
        assert!(rendered.contains("index"));
        assert!(rendered.contains("index.passing"));
        assert!(err.source().is_some());
    }

    #[test]
    fn only_io_backed_variants_expose_a_source() {
        assert!(Error::usage("capacity too small").source().is_none());
        assert!(Error::corrupt("bad header").source().is_none());
        let err = Error::io("index", io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.source().is_some());
    }
}
