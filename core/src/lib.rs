pub mod block;
pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod source;
pub mod stream;
pub mod transaction;

pub use block::{Block, BlockBuffer};
pub use config::{JournalConfig, TxConfig};
pub use error::{TxError, TxResult};
pub use journal::{JournalStatus, RecoveryJournal};
pub use source::{ByteSource, FileSource, LockMode, MemorySource};
pub use stream::{OpenRequest, TxFile, TxStream};
pub use transaction::{CommitOptions, Transaction, TransactionStats, Whence};
