// Crash recovery through the journal and sentinel files
// Simulates interrupted commits and checks replay on the next open

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use txfile_core::codec::encode_blocks;
use txfile_core::{
    Block, FileSource, JournalConfig, JournalStatus, MemorySource, Transaction, TxConfig, TxError,
    TxFile, TxStream, Whence,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Fixture {
    _dir: TempDir,
    data: PathBuf,
    journal: JournalConfig,
}

impl Fixture {
    fn new(contents: &[u8]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("table.dat");
        fs::write(&data, contents).unwrap();
        let journal = JournalConfig::beside(&data);
        Self {
            _dir: dir,
            data,
            journal,
        }
    }

    fn config(&self) -> TxConfig {
        TxConfig::default().with_journal(self.journal.clone())
    }

    fn simulate_crash_with(&self, blocks: &[Block]) {
        fs::write(&self.journal.journal_path, encode_blocks(blocks).unwrap()).unwrap();
        fs::write(&self.journal.sentinel_path, b"").unwrap();
    }

    fn markers_absent(&self) -> bool {
        !self.journal.journal_path.exists() && !self.journal.sentinel_path.exists()
    }
}

#[test]
fn test_open_replays_interrupted_commit() {
    init_logging();
    let fixture = Fixture::new(b"0123456789");
    fixture.simulate_crash_with(&[Block::new(4, b"zz".to_vec())]);

    let mut tx = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config()).unwrap();

    assert_eq!(fs::read(&fixture.data).unwrap(), b"0123zz6789");
    assert!(fixture.markers_absent());
    assert!(!tx.is_dirty());
    assert_eq!(tx.stats().recoveries, 1);
    tx.seek(4, Whence::Set).unwrap();
    assert_eq!(tx.read(2).unwrap().unwrap(), b"zz");
}

#[test]
fn test_replay_extends_file() {
    let fixture = Fixture::new(b"0123");
    fixture.simulate_crash_with(&[Block::new(2, b"ab".to_vec()), Block::new(6, b"cd".to_vec())]);

    let tx = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config()).unwrap();

    assert_eq!(tx.committed_len(), 8);
    assert_eq!(fs::read(&fixture.data).unwrap(), b"01ab\0\0cd");
    assert!(fixture.markers_absent());
}

#[test]
fn test_commit_failure_is_completed_on_next_open() {
    let fixture = Fixture::new(b"");
    // source dies after writing the first block
    let source = MemorySource::new(b"0123456789".to_vec()).failing_after(1);
    let mut tx = Transaction::with_config(source, fixture.config()).unwrap();
    tx.write(b"AA").unwrap();
    tx.seek(6, Whence::Set).unwrap();
    tx.write(b"BB").unwrap();
    assert!(matches!(tx.commit(), Err(TxError::IoError(_))));

    // intent record survives the failed commit
    assert!(fixture.journal.sentinel_path.exists());
    assert!(fixture.journal.journal_path.exists());
    assert!(tx.is_dirty());

    let half_written = tx.source().contents().to_vec();
    assert_eq!(half_written, b"AA23456789");

    let replayed = Transaction::with_config(MemorySource::new(half_written), fixture.config()).unwrap();
    assert_eq!(replayed.source().contents(), b"AA2345BB89");
    assert!(fixture.markers_absent());
}

#[test]
fn test_failed_commit_leaves_state_for_retry() {
    let fixture = Fixture::new(b"");
    let source = MemorySource::new(b"0123456789".to_vec()).failing_after(0);
    let mut tx = Transaction::with_config(source, fixture.config()).unwrap();
    tx.write(b"xyz").unwrap();

    assert!(tx.commit().is_err());
    assert!(tx.commit().is_err());
    assert_eq!(tx.committed_len(), 10);
    assert_eq!(tx.pending_blocks(), &[Block::new(0, b"xyz".to_vec())]);
    assert_eq!(tx.stats().commits, 0);

    // the next open on a healthy source finishes the journaled commit
    let mut source = tx.into_source();
    source.heal();
    let tx = Transaction::with_config(source, fixture.config()).unwrap();
    assert_eq!(tx.source().contents(), b"xyz3456789");
    assert!(fixture.markers_absent());
}

#[test]
fn test_successful_commit_leaves_no_markers() {
    let fixture = Fixture::new(b"0123456789");
    let mut file = TxFile::open(&fixture.data.to_string_lossy(), fixture.config()).unwrap();

    TxStream::seek(&mut file, 8, Whence::Set).unwrap();
    TxStream::write(&mut file, b"!!!").unwrap();
    file.commit().unwrap();

    assert!(fixture.markers_absent());
    assert_eq!(fs::read(&fixture.data).unwrap(), b"01234567!!!");
}

#[test]
fn test_open_journaled_uses_sibling_files() {
    let fixture = Fixture::new(b"0123456789");
    fixture.simulate_crash_with(&[Block::new(0, b"J".to_vec())]);

    let file = TxFile::open_journaled(&fixture.data.to_string_lossy(), TxConfig::default()).unwrap();
    assert_eq!(file.transaction().stats().recoveries, 1);
    assert_eq!(fs::read(&fixture.data).unwrap(), b"J123456789");
    assert!(fixture.markers_absent());
}

#[test]
fn test_stale_journal_is_not_replayed() {
    let fixture = Fixture::new(b"0123456789");
    fs::write(
        &fixture.journal.journal_path,
        encode_blocks(&[Block::new(0, b"STALE".to_vec())]).unwrap(),
    )
    .unwrap();

    let tx = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config()).unwrap();

    assert_eq!(tx.stats().recoveries, 0);
    assert_eq!(fs::read(&fixture.data).unwrap(), b"0123456789");
    assert!(fixture.markers_absent());
}

#[test]
fn test_corrupt_journal_fails_open_and_keeps_markers() {
    let fixture = Fixture::new(b"0123456789");
    fs::write(&fixture.journal.journal_path, b"not a journal").unwrap();
    fs::write(&fixture.journal.sentinel_path, b"").unwrap();

    let result = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config());

    assert!(matches!(result, Err(TxError::RecoveryFailure(_))));
    assert_eq!(fs::read(&fixture.data).unwrap(), b"0123456789");
    assert!(fixture.journal.journal_path.exists());
    assert!(fixture.journal.sentinel_path.exists());
}

#[test]
fn test_empty_journal_clears_markers() {
    let fixture = Fixture::new(b"0123456789");
    fixture.simulate_crash_with(&[]);

    let tx = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config()).unwrap();

    assert!(fixture.markers_absent());
    assert_eq!(tx.stats().recoveries, 1);
    assert_eq!(fs::read(&fixture.data).unwrap(), b"0123456789");

    // a second open finds nothing left to recover
    let tx = Transaction::with_config(FileSource::open(&fixture.data).unwrap(), fixture.config()).unwrap();
    assert_eq!(tx.stats().recoveries, 0);
}

#[test]
fn test_journal_record_overflowing_offset_fails_open() {
    let fixture = Fixture::new(b"");
    fixture.simulate_crash_with(&[Block::new(u64::MAX - 1, b"abc".to_vec())]);

    let result = Transaction::with_config(MemorySource::new(b"0123".to_vec()), fixture.config());

    assert!(matches!(result, Err(TxError::RecoveryFailure(_))));
    assert!(fixture.journal.sentinel_path.exists());
}

#[test]
fn test_replay_write_failure_fails_open() {
    let fixture = Fixture::new(b"");
    fixture.simulate_crash_with(&[Block::new(1, b"q".to_vec())]);

    let source = MemorySource::new(b"0123".to_vec()).failing_after(0);
    let result = Transaction::with_config(source, fixture.config());

    assert!(matches!(result, Err(TxError::RecoveryFailure(_))));
    assert!(fixture.journal.sentinel_path.exists());
    assert_eq!(
        txfile_core::RecoveryJournal::new(&fixture.journal).status(),
        JournalStatus::PendingReplay
    );
}

#[test]
fn test_without_journal_no_markers_are_written() {
    let fixture = Fixture::new(b"0123456789");
    let mut tx = Transaction::new(FileSource::open(&fixture.data).unwrap()).unwrap();
    tx.write(b"ab").unwrap();
    tx.commit().unwrap();

    assert!(fixture.markers_absent());
    assert_eq!(fs::read(&fixture.data).unwrap(), b"ab23456789");
}
