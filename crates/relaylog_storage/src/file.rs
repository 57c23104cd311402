//! Journal file backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal kept in a single append-mode file.
///
/// Writes always land at the end of the file. `flush()` hands buffered
/// bytes to the OS; `sync()` forces them to stable storage.
///
/// # Example
///
/// ```no_run
/// use relaylog_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("relay.journal")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    // Reads seek, so they need exclusive access even through `&self`.
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens the journal at `path`, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_owned(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            _ => {}
        }
        Self::open(path)
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut bytes = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut bytes)?;
        }
        Ok(bytes)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let start = self.len;
        self.file.get_mut().write_all(data)?;
        self.len += data.len() as u64;
        Ok(start)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().flush()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.file.get_mut().sync_data()?)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.len {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("journal is {} bytes, cannot truncate to {new_size}", self.len),
            )));
        }

        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.len = new_size;
        Ok(())
    }
}
