// Stream facade
// File-handle style operations over a transaction, plus std::io adapters

use crate::config::{JournalConfig, TxConfig};
use crate::error::{TxError, TxResult};
use crate::source::{ByteSource, FileSource, LockMode};
use crate::transaction::{Transaction, Whence};
use std::io;
use std::path::{Path, PathBuf};

/// Operations a caller performs on a transactional handle
pub trait TxStream {
    fn seek(&mut self, offset: i64, whence: Whence) -> TxResult<u64>;

    fn tell(&self) -> u64;

    /// `None` at end of stream
    fn read(&mut self, len: usize) -> TxResult<Option<Vec<u8>>>;

    fn write(&mut self, data: &[u8]) -> TxResult<usize>;

    /// `None` at end of stream
    fn readline(&mut self) -> TxResult<Option<Vec<u8>>>;

    fn flock(&mut self, mode: LockMode) -> TxResult<bool>;

    fn commit(&mut self) -> TxResult<()>;

    fn rollback(&mut self) -> TxResult<()>;

    fn close(&mut self) -> TxResult<()>;
}

impl<S: ByteSource> TxStream for Transaction<S> {
    fn seek(&mut self, offset: i64, whence: Whence) -> TxResult<u64> {
        Transaction::seek(self, offset, whence)
    }

    fn tell(&self) -> u64 {
        Transaction::tell(self)
    }

    fn read(&mut self, len: usize) -> TxResult<Option<Vec<u8>>> {
        Transaction::read(self, len)
    }

    fn write(&mut self, data: &[u8]) -> TxResult<usize> {
        Transaction::write(self, data)
    }

    fn readline(&mut self) -> TxResult<Option<Vec<u8>>> {
        Transaction::readline(self)
    }

    fn flock(&mut self, mode: LockMode) -> TxResult<bool> {
        Transaction::flock(self, mode)
    }

    fn commit(&mut self) -> TxResult<()> {
        Transaction::commit(self)
    }

    fn rollback(&mut self) -> TxResult<()> {
        Transaction::rollback(self);
        Ok(())
    }

    fn close(&mut self) -> TxResult<()> {
        Transaction::close(self)
    }
}

/// Parsed open request.
///
/// Leading mode decorations (`<`, `>`, `>>`, `+<`, `+>` ...) are stripped;
/// the file is always opened read-write. Any decoration containing `>`
/// asks for the file to be created empty when it does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub path: PathBuf,
    pub create: bool,
}

impl OpenRequest {
    pub fn parse(target: &str) -> TxResult<Self> {
        let trimmed = target.trim_start();
        let split = trimmed
            .find(|c: char| !matches!(c, '<' | '>' | '+' | ' ' | '\t'))
            .unwrap_or(trimmed.len());
        let (decoration, rest) = trimmed.split_at(split);

        let path = rest.trim_end();
        if path.is_empty() {
            return Err(TxError::InvalidInput(format!("no path in open request {:?}", target)));
        }

        Ok(Self {
            path: PathBuf::from(path),
            create: decoration.contains('>'),
        })
    }
}

/// Transactional handle on a file
pub struct TxFile {
    tx: Transaction<FileSource>,
    closed: bool,
}

impl TxFile {
    /// Open `target` (a path, optionally carrying mode decorations)
    pub fn open(target: &str, config: TxConfig) -> TxResult<Self> {
        let request = OpenRequest::parse(target)?;
        let source = if request.create {
            FileSource::open_or_create(&request.path)?
        } else {
            FileSource::open(&request.path)?
        };

        Ok(Self {
            tx: Transaction::with_config(source, config)?,
            closed: false,
        })
    }

    /// Open with a journal and sentinel stored next to the file
    pub fn open_journaled(target: &str, config: TxConfig) -> TxResult<Self> {
        let request = OpenRequest::parse(target)?;
        let config = config.with_journal(JournalConfig::beside(&request.path));
        Self::open(target, config)
    }

    pub fn path(&self) -> &Path {
        self.tx.source().path()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transaction(&self) -> &Transaction<FileSource> {
        &self.tx
    }

    fn active(&mut self) -> TxResult<&mut Transaction<FileSource>> {
        if self.closed {
            return Err(TxError::Closed);
        }
        Ok(&mut self.tx)
    }
}

impl TxStream for TxFile {
    fn seek(&mut self, offset: i64, whence: Whence) -> TxResult<u64> {
        self.active()?.seek(offset, whence)
    }

    fn tell(&self) -> u64 {
        self.tx.tell()
    }

    fn read(&mut self, len: usize) -> TxResult<Option<Vec<u8>>> {
        self.active()?.read(len)
    }

    fn write(&mut self, data: &[u8]) -> TxResult<usize> {
        self.active()?.write(data)
    }

    fn readline(&mut self) -> TxResult<Option<Vec<u8>>> {
        self.active()?.readline()
    }

    fn flock(&mut self, mode: LockMode) -> TxResult<bool> {
        self.active()?.flock(mode)
    }

    fn commit(&mut self) -> TxResult<()> {
        self.active()?.commit()
    }

    fn rollback(&mut self) -> TxResult<()> {
        self.active()?.rollback();
        Ok(())
    }

    fn close(&mut self) -> TxResult<()> {
        self.active()?.close()?;
        self.closed = true;
        Ok(())
    }
}

impl io::Read for TxFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match TxStream::read(self, buf.len())? {
            Some(data) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            None => Ok(0),
        }
    }
}

impl io::Write for TxFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(TxStream::write(self, buf)?)
    }

    /// Pending writes only reach the file on `commit`
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for TxFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => n as i128,
            io::SeekFrom::Current(n) => self.tx.tell() as i128 + n as i128,
            io::SeekFrom::End(n) => self.tx.logical_len() as i128 + n as i128,
        };
        let offset = i64::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("seek position {} out of range", target))
        })?;
        Ok(TxStream::seek(self, offset, Whence::Set)?)
    }
}
