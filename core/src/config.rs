// Transaction configuration
// Journal placement and stream behaviour, loadable from JSON

use crate::error::{TxError, TxResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Size of each read issued while scanning for a line terminator
pub const DEFAULT_READLINE_CHUNK: usize = 128;

/// Where the crash-recovery journal and its sentinel live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Serialized pending block set
    pub journal_path: PathBuf,
    /// Marker whose presence means a commit was in progress
    pub sentinel_path: PathBuf,
}

impl JournalConfig {
    pub fn new(journal_path: impl Into<PathBuf>, sentinel_path: impl Into<PathBuf>) -> Self {
        Self {
            journal_path: journal_path.into(),
            sentinel_path: sentinel_path.into(),
        }
    }

    /// `<file>.journal` and `<file>.sentinel` next to the data file
    pub fn beside(data_path: impl AsRef<Path>) -> Self {
        let data_path = data_path.as_ref();
        let with_suffix = |suffix: &str| {
            let mut name = data_path.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            journal_path: with_suffix(".journal"),
            sentinel_path: with_suffix(".sentinel"),
        }
    }
}

/// Behaviour of a transactional stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Crash-recovery journal; `None` makes commit a plain block flush
    pub journal: Option<JournalConfig>,
    /// Chunk size used by `readline`
    pub readline_chunk: usize,
    /// Terminator `readline` stops after
    pub line_terminator: String,
    /// fsync the journal before raising the sentinel and the data file after flushing
    pub sync_on_commit: bool,
    /// Let END-relative seeks move the cursor
    pub end_seek_moves_cursor: bool,
    /// Commit pending writes on close instead of discarding them
    pub commit_on_close: bool,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            journal: None,
            readline_chunk: DEFAULT_READLINE_CHUNK,
            line_terminator: "\n".to_string(),
            sync_on_commit: true,
            end_seek_moves_cursor: false,
            commit_on_close: false,
        }
    }
}

impl TxConfig {
    pub fn with_journal(mut self, journal: JournalConfig) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> TxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: TxConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TxResult<()> {
        if self.readline_chunk == 0 {
            return Err(TxError::Configuration("readline_chunk must be non-zero".to_string()));
        }
        if self.line_terminator.is_empty() {
            return Err(TxError::Configuration("line_terminator must not be empty".to_string()));
        }
        if let Some(journal) = &self.journal {
            if journal.journal_path == journal.sentinel_path {
                return Err(TxError::Configuration(format!(
                    "journal and sentinel share the path {}",
                    journal.journal_path.display()
                )));
            }
        }
        Ok(())
    }
}
