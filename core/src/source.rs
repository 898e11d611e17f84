// Underlying byte storage for a transaction
// Random-access reads and writes against a real file or an in-memory array

use crate::error::{TxError, TxResult};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Advisory lock request passed through to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    Unlock,
    SharedNonBlocking,
    ExclusiveNonBlocking,
    UnlockNonBlocking,
}

impl LockMode {
    pub fn is_nonblocking(self) -> bool {
        matches!(
            self,
            LockMode::SharedNonBlocking | LockMode::ExclusiveNonBlocking | LockMode::UnlockNonBlocking
        )
    }
}

/// Random-access storage that pending blocks are eventually committed to.
///
/// Reads must return exactly `len` bytes or fail; a short read is an error.
pub trait ByteSource {
    /// Current length of the stored data in bytes
    fn length(&mut self) -> TxResult<u64>;

    /// Read `len` bytes starting at `pos`
    fn read_at(&mut self, pos: u64, len: usize) -> TxResult<Vec<u8>>;

    /// Write `data` at `pos`, extending the storage if needed
    fn write_at(&mut self, pos: u64, data: &[u8]) -> TxResult<()>;

    /// Flush written data to stable storage
    fn sync(&mut self) -> TxResult<()> {
        Ok(())
    }

    /// Advisory lock; `Ok(false)` when a non-blocking request would block
    fn lock(&mut self, _mode: LockMode) -> TxResult<bool> {
        Err(TxError::NotSupported("Locking is not available for this source".to_string()))
    }
}

/// File-backed byte source, always opened read-write
pub struct FileSource {
    file: File,
    path: PathBuf,
}

impl FileSource {
    /// Open an existing file for reading and writing
    pub fn open(path: impl AsRef<Path>) -> TxResult<Self> {
        Self::open_with(path, false)
    }

    /// Open a file for reading and writing, creating it empty when missing
    pub fn open_or_create(path: impl AsRef<Path>) -> TxResult<Self> {
        Self::open_with(path, true)
    }

    fn open_with(path: impl AsRef<Path>, create: bool) -> TxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        debug!("Opened {} (create={})", path.display(), create);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn length(&mut self) -> TxResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&mut self, pos: u64, len: usize) -> TxResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> TxResult<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> TxResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn lock(&mut self, mode: LockMode) -> TxResult<bool> {
        use nix::errno::Errno;
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let arg = match mode {
            LockMode::Shared => FlockArg::LockShared,
            LockMode::Exclusive => FlockArg::LockExclusive,
            LockMode::Unlock => FlockArg::Unlock,
            LockMode::SharedNonBlocking => FlockArg::LockSharedNonblock,
            LockMode::ExclusiveNonBlocking => FlockArg::LockExclusiveNonblock,
            LockMode::UnlockNonBlocking => FlockArg::UnlockNonblock,
        };

        match flock(self.file.as_raw_fd(), arg) {
            Ok(()) => Ok(true),
            Err(Errno::EAGAIN) if mode.is_nonblocking() => Ok(false),
            Err(errno) => Err(TxError::IoError(io::Error::from(errno))),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn lock(&mut self, _mode: LockMode) -> TxResult<bool> {
        Err(TxError::NotSupported("flock is only available on Linux".to_string()))
    }
}

/// In-memory byte source
///
/// Optionally fails every write after a fixed number of successful ones,
/// which is how commit failures are simulated.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
    writes_left: Option<usize>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            writes_left: None,
        }
    }

    /// Allow `writes` successful writes, then fail all further ones
    pub fn failing_after(mut self, writes: usize) -> Self {
        self.writes_left = Some(writes);
        self
    }

    /// Clear any injected write failure
    pub fn heal(&mut self) {
        self.writes_left = None;
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn length(&mut self) -> TxResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&mut self, pos: u64, len: usize) -> TxResult<Vec<u8>> {
        let start = pos as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(TxError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Short read: {}..{} beyond length {}", start, end, self.data.len()),
            )));
        }
        Ok(self.data[start..end].to_vec())
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> TxResult<()> {
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(TxError::IoError(io::Error::new(
                    io::ErrorKind::Other,
                    "Injected write failure",
                )));
            }
            *left -= 1;
        }

        let start = pos as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn lock(&mut self, _mode: LockMode) -> TxResult<bool> {
        Ok(true)
    }
}
