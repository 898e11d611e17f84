// Transactional byte stream
// Cursor, pending blocks and the committed length over a single byte source

use crate::block::{Block, BlockBuffer};
use crate::config::TxConfig;
use crate::error::{TxError, TxResult};
use crate::journal::{JournalStatus, RecoveryJournal};
use crate::source::{ByteSource, LockMode};
use log::{debug, error, info, warn};

/// Reference point for `seek`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position
    Set,
    /// Relative to the cursor
    Cur,
    /// Distance back from the logical end
    End,
}

/// Options for a single commit
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Flush without writing a new journal; used when replaying an existing one
    pub skip_journal: bool,
}

/// Counters kept for the lifetime of a transaction handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Commits that flushed at least one block
    pub commits: u64,
    pub rollbacks: u64,
    pub blocks_flushed: u64,
    pub bytes_flushed: u64,
    /// Interrupted commits replayed at open
    pub recoveries: u64,
}

/// Seekable byte stream whose writes stay in memory until `commit`.
///
/// Every read returns the post-write view: pending blocks overlaid on the
/// bytes of the underlying source.
pub struct Transaction<S: ByteSource> {
    source: S,
    buffer: BlockBuffer,
    tell: u64,
    /// Length of the data actually committed to `source`
    orgmax: u64,
    journal: Option<RecoveryJournal>,
    config: TxConfig,
    stats: TransactionStats,
}

impl<S: ByteSource> Transaction<S> {
    /// Transaction over `source` with default configuration and no journal
    pub fn new(source: S) -> TxResult<Self> {
        Self::with_config(source, TxConfig::default())
    }

    /// Transaction over `source`.
    ///
    /// When a journal is configured and its sentinel exists, the journaled
    /// commit is replayed before this returns; a failed replay fails the open.
    pub fn with_config(mut source: S, config: TxConfig) -> TxResult<Self> {
        config.validate()?;

        let orgmax = source.length()?;
        let journal = config
            .journal
            .as_ref()
            .map(|j| RecoveryJournal::new(j).with_sync(config.sync_on_commit));

        let mut tx = Self {
            source,
            buffer: BlockBuffer::new(orgmax),
            tell: 0,
            orgmax,
            journal,
            config,
            stats: TransactionStats::default(),
        };
        tx.recover()?;
        Ok(tx)
    }

    fn recover(&mut self) -> TxResult<()> {
        let Some(journal) = self.journal.as_ref() else {
            return Ok(());
        };

        match journal.status() {
            JournalStatus::Idle => return Ok(()),
            JournalStatus::StaleJournal => {
                journal.discard_stale()?;
                return Ok(());
            }
            JournalStatus::PendingReplay => {}
        }

        let journal_path = journal.journal_path().display().to_string();
        info!("Interrupted commit detected, replaying {}", journal_path);

        let blocks = journal.load().map_err(|e| {
            error!("Cannot load journal {}: {}", journal_path, e);
            TxError::RecoveryFailure(format!("cannot load journal {}: {}", journal_path, e))
        })?;

        let block_count = blocks.len();
        let replayed = if blocks.is_empty() {
            // nothing to flush, but the markers still have to go
            journal.end_commit()
        } else {
            self.buffer = BlockBuffer::from_blocks(blocks, self.orgmax);
            self.commit_with(CommitOptions { skip_journal: true })
        };
        replayed.map_err(|e| {
            error!("Replay of {} failed: {}", journal_path, e);
            TxError::RecoveryFailure(format!("replay of {} failed: {}", journal_path, e))
        })?;

        self.stats.recoveries += 1;
        info!("Replayed {} block(s) from {}", block_count, journal_path);
        Ok(())
    }

    /// Move the cursor and return the computed position.
    ///
    /// `Set` and `Cur` fail with `SeekOutOfRange` past the logical end and
    /// leave the cursor untouched. `End` computes `max - offset` clamped at
    /// zero but only moves the cursor when `end_seek_moves_cursor` is set.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> TxResult<u64> {
        let max = self.buffer.max();
        let target = match whence {
            Whence::Set => offset as i128,
            Whence::Cur => self.tell as i128 + offset as i128,
            Whence::End => (max as i128 - offset as i128).max(0),
        };

        if target < 0 {
            return Err(TxError::InvalidInput(format!("negative seek position {}", target)));
        }
        if target > max as i128 {
            return Err(TxError::SeekOutOfRange {
                pos: u64::try_from(target).unwrap_or(u64::MAX),
                max,
            });
        }

        let pos = target as u64;
        if whence != Whence::End || self.config.end_seek_moves_cursor {
            self.tell = pos;
        }
        Ok(pos)
    }

    pub fn tell(&self) -> u64 {
        self.tell
    }

    /// Read up to `len` bytes at the cursor; `None` at end of stream
    pub fn read(&mut self, len: usize) -> TxResult<Option<Vec<u8>>> {
        if self.tell >= self.buffer.max() {
            return Ok(None);
        }

        let data = self.buffer.read(&mut self.source, self.orgmax, self.tell, len as u64)?;
        self.tell += data.len() as u64;
        Ok(Some(data))
    }

    /// Read through the configured line terminator
    pub fn readline(&mut self) -> TxResult<Option<Vec<u8>>> {
        let terminator = self.config.line_terminator.clone().into_bytes();
        self.readline_with(&terminator)
    }

    /// Read through the first `terminator`, or to end of stream.
    ///
    /// The returned line includes the terminator and the cursor advances by
    /// exactly its length.
    pub fn readline_with(&mut self, terminator: &[u8]) -> TxResult<Option<Vec<u8>>> {
        if terminator.is_empty() {
            return Err(TxError::InvalidInput("empty line terminator".to_string()));
        }
        if self.tell >= self.buffer.max() {
            return Ok(None);
        }

        let chunk = self.config.readline_chunk as u64;
        let mut line = Vec::new();
        let mut pos = self.tell;
        let mut scanned = 0usize;

        loop {
            let data = self.buffer.read(&mut self.source, self.orgmax, pos, chunk)?;
            if data.is_empty() {
                break;
            }
            pos += data.len() as u64;
            line.extend_from_slice(&data);

            // terminator may straddle the previous chunk boundary
            let from = scanned.saturating_sub(terminator.len() - 1);
            if let Some(idx) = find(&line[from..], terminator) {
                line.truncate(from + idx + terminator.len());
                break;
            }
            scanned = line.len();
        }

        self.tell += line.len() as u64;
        Ok(Some(line))
    }

    /// Buffer `data` at the cursor and advance past it
    pub fn write(&mut self, data: &[u8]) -> TxResult<usize> {
        self.buffer.write(self.tell, data);
        self.tell += data.len() as u64;
        Ok(data.len())
    }

    /// Discard every pending write
    pub fn rollback(&mut self) {
        let discarded = self.buffer.blocks().len();
        self.buffer.clear(self.orgmax);
        if self.tell > self.orgmax {
            self.tell = self.orgmax;
        }
        self.stats.rollbacks += 1;
        debug!("Rolled back {} pending block(s)", discarded);
    }

    pub fn commit(&mut self) -> TxResult<()> {
        self.commit_with(CommitOptions::default())
    }

    /// Flush pending blocks to the source.
    ///
    /// On failure nothing about the transaction changes; the journal and
    /// sentinel stay on disk so the next open can finish the commit.
    pub fn commit_with(&mut self, options: CommitOptions) -> TxResult<()> {
        if self.buffer.is_empty() {
            debug!("Commit with no pending blocks");
            return Ok(());
        }

        if !options.skip_journal {
            if let Some(journal) = &self.journal {
                journal.begin_commit(self.buffer.blocks())?;
            }
        }

        if let Err(e) = self.flush_blocks() {
            error!("Commit aborted while writing blocks: {}", e);
            return Err(e);
        }

        if let Some(journal) = &self.journal {
            journal.end_commit()?;
        }

        self.stats.commits += 1;
        self.stats.blocks_flushed += self.buffer.blocks().len() as u64;
        self.stats.bytes_flushed += self.buffer.pending_bytes();
        debug!(
            "Committed {} block(s), length {} -> {}",
            self.buffer.blocks().len(),
            self.orgmax,
            self.buffer.max()
        );

        self.orgmax = self.buffer.max();
        self.buffer.clear(self.orgmax);
        Ok(())
    }

    fn flush_blocks(&mut self) -> TxResult<()> {
        for block in self.buffer.blocks() {
            self.source.write_at(block.pos, &block.data)?;
        }
        if self.config.sync_on_commit {
            self.source.sync()?;
        }
        Ok(())
    }

    /// Advisory lock on the underlying source
    pub fn flock(&mut self, mode: LockMode) -> TxResult<bool> {
        self.source.lock(mode)
    }

    /// Resolve pending writes before the handle goes away
    pub fn close(&mut self) -> TxResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        if self.config.commit_on_close {
            self.commit()
        } else {
            warn!(
                "Closing with {} uncommitted block(s); discarding them",
                self.buffer.blocks().len()
            );
            self.rollback();
            Ok(())
        }
    }

    /// Logical length including pending writes
    pub fn logical_len(&self) -> u64 {
        self.buffer.max()
    }

    /// Length of the data committed to the source
    pub fn committed_len(&self) -> u64 {
        self.orgmax
    }

    pub fn is_dirty(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn pending_blocks(&self) -> &[Block] {
        self.buffer.blocks()
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    pub fn journal(&self) -> Option<&RecoveryJournal> {
        self.journal.as_ref()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
