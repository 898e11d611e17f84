// Crash-recovery journal
// Records the pending block set and a sentinel before a commit touches the data file

use crate::block::Block;
use crate::codec::{decode_blocks, encode_blocks};
use crate::config::JournalConfig;
use crate::error::TxResult;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// What the marker files on disk say about the last commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalStatus {
    /// No sentinel and no journal
    Idle,
    /// Sentinel present: a commit was started and must be replayed
    PendingReplay,
    /// Journal without a sentinel: a commit finished but its journal was not removed
    StaleJournal,
}

/// Journal and sentinel file pair guarding commits.
///
/// Commit protocol:
/// 1. `begin_commit` writes the journal, then creates the sentinel
/// 2. the caller writes every block to the data file
/// 3. `end_commit` removes the sentinel, then the journal
///
/// A crash after step 1 leaves the sentinel behind and the next open replays
/// the journal. A crash inside step 3 can only leave a stale journal, which
/// is never replayed.
#[derive(Debug, Clone)]
pub struct RecoveryJournal {
    journal_path: PathBuf,
    sentinel_path: PathBuf,
    sync: bool,
}

impl RecoveryJournal {
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            journal_path: config.journal_path.clone(),
            sentinel_path: config.sentinel_path.clone(),
            sync: true,
        }
    }

    /// Whether journal and sentinel writes are fsynced
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn sentinel_path(&self) -> &Path {
        &self.sentinel_path
    }

    pub fn status(&self) -> JournalStatus {
        if self.sentinel_path.exists() {
            JournalStatus::PendingReplay
        } else if self.journal_path.exists() {
            JournalStatus::StaleJournal
        } else {
            JournalStatus::Idle
        }
    }

    pub fn needs_recovery(&self) -> bool {
        self.status() == JournalStatus::PendingReplay
    }

    /// Record the intent to commit `blocks`
    pub fn begin_commit(&self, blocks: &[Block]) -> TxResult<()> {
        let encoded = encode_blocks(blocks)?;

        let mut journal = File::create(&self.journal_path)?;
        journal.write_all(&encoded)?;
        if self.sync {
            journal.sync_all()?;
        }

        let sentinel = File::create(&self.sentinel_path)?;
        if self.sync {
            sentinel.sync_all()?;
        }

        debug!(
            "Journaled {} block(s) ({} bytes) to {}",
            blocks.len(),
            encoded.len(),
            self.journal_path.display()
        );
        Ok(())
    }

    /// Read back the journaled block set
    pub fn load(&self) -> TxResult<Vec<Block>> {
        let bytes = fs::read(&self.journal_path)?;
        decode_blocks(&bytes)
    }

    /// Clear the intent record once every block reached the data file
    pub fn end_commit(&self) -> TxResult<()> {
        remove_if_present(&self.sentinel_path)?;
        remove_if_present(&self.journal_path)?;
        debug!("Cleared commit journal {}", self.journal_path.display());
        Ok(())
    }

    /// Remove a journal left behind without its sentinel.
    ///
    /// Returns true when a stale journal was found.
    pub fn discard_stale(&self) -> TxResult<bool> {
        if self.status() != JournalStatus::StaleJournal {
            return Ok(false);
        }
        warn!(
            "Removing stale journal {} (no sentinel, commit already applied)",
            self.journal_path.display()
        );
        remove_if_present(&self.journal_path)?;
        Ok(true)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
