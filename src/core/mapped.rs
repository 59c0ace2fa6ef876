// Mapped file lifecycle for the index/writable pair, plus the sidecar
// write lock and the parent-directory fsync used by the flip.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use memmap2::MmapMut;

use crate::core::error::Error;

#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    map: Option<MmapMut>,
    capacity: usize,
}

impl MappedFile {
    /// Create-or-open `path` at exactly `capacity` bytes and map it. An
    /// existing file of a different size is a construction failure.
    pub fn map(path: impl AsRef<Path>, capacity: usize) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(&path, err))?;

        let disk_len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::io(&path, err))?;
        if disk_len == 0 {
            file.set_len(capacity as u64)
                .map_err(|err| Error::io(&path, err))?;
        } else if disk_len != capacity as u64 {
            return Err(Error::SizeMismatch {
                path,
                disk: disk_len,
                memory: capacity as u64,
            });
        }

        let map = unsafe { MmapMut::map_mut(&file).map_err(|err| Error::io(&path, err))? };

        Ok(Self {
            path,
            file,
            map: Some(map),
            capacity,
        })
    }

    /// After a flip the in-process handles swap roles; the recorded path
    /// must follow so later error reports name the right file.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn buffer(&self) -> &[u8] {
        // Only unmapped mid-flip on Windows, where nothing reads it.
        match &self.map {
            Some(map) => &map[..],
            None => &[],
        }
    }

    pub fn write_all(&mut self, src: &[u8]) -> Result<(), Error> {
        let Some(map) = self.map.as_mut() else {
            return Err(not_mapped(&self.path));
        };
        if map.len() != src.len() {
            return Err(Error::SizeMismatch {
                path: self.path.clone(),
                disk: map.len() as u64,
                memory: src.len() as u64,
            });
        }
        map[..].copy_from_slice(src);
        Ok(())
    }

    /// Flush the mapping to stable storage.
    pub fn force(&self) -> Result<(), Error> {
        let Some(map) = self.map.as_ref() else {
            return Err(not_mapped(&self.path));
        };
        map.flush().map_err(|err| Error::io(&self.path, err))
    }

    /// Reopen and remap whatever file currently lives at the recorded
    /// path. Used after a passing-place recovery rename, and on Windows
    /// after the flip renames.
    pub fn remap(&mut self) -> Result<(), Error> {
        self.map = None;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| Error::io(&self.path, err))?;
        let map = unsafe { MmapMut::map_mut(&file).map_err(|err| Error::io(&self.path, err))? };
        if map.len() != self.capacity {
            return Err(Error::SizeMismatch {
                path: self.path.clone(),
                disk: map.len() as u64,
                memory: self.capacity as u64,
            });
        }
        self.file = file;
        self.map = Some(map);
        Ok(())
    }

    #[cfg(windows)]
    pub fn unmap(&mut self) {
        self.map = None;
    }

    pub fn close(&mut self) {
        self.map = None;
    }
}

fn not_mapped(path: &Path) -> Error {
    Error::io(
        path,
        io::Error::new(io::ErrorKind::Other, "file is not mapped"),
    )
}

/// Take the exclusive writer lock on the sidecar `.lock` file. Held for
/// the writer's lifetime; released when the handle drops.
pub fn acquire_write_lock(path: impl AsRef<Path>) -> Result<File, Error> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::io(path, err))?;
    file.try_lock_exclusive().map_err(|err| {
        if lock_is_held(&err) {
            Error::usage(format!("{} is locked by another writer", path.display()))
        } else {
            Error::io(path, err)
        }
    })?;
    Ok(file)
}

fn lock_is_held(err: &io::Error) -> bool {
    let errno = err.raw_os_error().unwrap_or_default();
    errno == EACCES
        || errno == EPERM
        || matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::PermissionDenied
        )
}

/// Fsync the parent directory so a completed rename survives power loss.
pub fn fsync_parent_dir(path: &Path) -> Result<(), Error> {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = File::open(parent).map_err(|err| Error::io(parent, err))?;
        dir.sync_all().map_err(|err| Error::io(parent, err))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{acquire_write_lock, fsync_parent_dir, lock_is_held, MappedFile};
    use crate::core::error::ErrorKind;
    use crate::core::layout::SECTOR_SIZE;

    #[test]
    fn creates_file_at_requested_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index");
        let mapped = MappedFile::map(&path, 2 * SECTOR_SIZE).expect("map");
        assert_eq!(mapped.buffer().len(), 2 * SECTOR_SIZE);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            (2 * SECTOR_SIZE) as u64
        );
    }

    #[test]
    fn size_mismatch_is_a_construction_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index");
        std::fs::write(&path, vec![0u8; SECTOR_SIZE]).expect("seed file");

        let err = MappedFile::map(&path, 2 * SECTOR_SIZE).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        let rendered = err.to_string();
        assert!(rendered.contains(&SECTOR_SIZE.to_string()));
        assert!(rendered.contains(&(2 * SECTOR_SIZE).to_string()));
    }

    #[test]
    fn written_bytes_survive_force_and_remap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index");
        let mut mapped = MappedFile::map(&path, 2 * SECTOR_SIZE).expect("map");

        let mut content = vec![0u8; 2 * SECTOR_SIZE];
        content[17] = 0x5A;
        mapped.write_all(&content).expect("write");
        mapped.force().expect("force");
        mapped.remap().expect("remap");
        assert_eq!(mapped.buffer()[17], 0x5A);
    }

    #[test]
    fn second_writer_lock_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.lock");
        let _held = acquire_write_lock(&path).expect("first lock");
        let err = acquire_write_lock(&path).expect_err("second lock");
        assert!(matches!(err.kind(), ErrorKind::Usage | ErrorKind::Io));
    }

    #[test]
    fn lock_contention_errnos_are_recognized() {
        for errno in [libc::EAGAIN, libc::EWOULDBLOCK, libc::EACCES, libc::EPERM] {
            assert!(lock_is_held(&std::io::Error::from_raw_os_error(errno)));
        }
        assert!(!lock_is_held(&std::io::Error::from_raw_os_error(libc::EBADF)));
    }

    #[test]
    fn parent_dir_fsync_succeeds_on_real_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index");
        std::fs::write(&path, b"x").expect("seed");
        fsync_parent_dir(&path).expect("fsync");
    }
}
