// Randomized write sequences checked against a flat byte-vector model
// Covers containment, partial overlap, multi-block overwrites and appends

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use txfile_core::{Block, BlockBuffer, MemorySource, Transaction, Whence};

const SEEDS: [u64; 4] = [1, 7, 42, 0xdead_beef];

fn assert_sorted_disjoint(blocks: &[Block]) {
    for block in blocks {
        assert!(!block.data.is_empty(), "empty block at {}", block.pos);
    }
    for pair in blocks.windows(2) {
        assert!(
            pair[0].end() <= pair[1].pos,
            "block at {} (end {}) overlaps block at {}",
            pair[0].pos,
            pair[0].end(),
            pair[1].pos
        );
    }
}

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}

#[test]
fn test_block_buffer_matches_model() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let original: Vec<u8> = (0..64u8).collect();
        let mut source = MemorySource::new(original.clone());
        let mut buffer = BlockBuffer::new(original.len() as u64);
        let mut model = original.clone();

        for _ in 0..500 {
            let at = rng.gen_range(0..=model.len());
            let len = rng.gen_range(1..=24);
            let data = random_bytes(&mut rng, len);

            buffer.write(at as u64, &data);
            if at + len > model.len() {
                model.resize(at + len, 0);
            }
            model[at..at + len].copy_from_slice(&data);

            assert_sorted_disjoint(buffer.blocks());
            assert!(buffer.is_well_formed());
            assert_eq!(buffer.max(), model.len() as u64);

            let from = rng.gen_range(0..=model.len());
            let want = rng.gen_range(0..=80);
            let got = buffer.read(&mut source, original.len() as u64, from as u64, want).unwrap();
            let until = (from + want as usize).min(model.len());
            assert_eq!(got, &model[from..until], "seed {} read {}+{}", seed, from, want);
        }
    }
}

#[test]
fn test_transaction_commit_and_rollback_match_model() {
    for seed in SEEDS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut committed: Vec<u8> = b"The quick brown fox jumps over the lazy dog".to_vec();
        let mut model = committed.clone();
        let mut tx = Transaction::new(MemorySource::new(committed.clone())).unwrap();

        for step in 0..300 {
            match rng.gen_range(0..20) {
                0 => {
                    tx.commit().unwrap();
                    committed = model.clone();
                    assert_eq!(tx.source().contents(), committed.as_slice(), "seed {} step {}", seed, step);
                    assert_eq!(tx.committed_len(), committed.len() as u64);
                }
                1 => {
                    tx.rollback();
                    model = committed.clone();
                    assert!(tx.tell() <= committed.len() as u64);
                }
                _ => {
                    let at = rng.gen_range(0..=model.len());
                    let len = rng.gen_range(1..=16);
                    let data = random_bytes(&mut rng, len);

                    tx.seek(at as i64, Whence::Set).unwrap();
                    tx.write(&data).unwrap();
                    if at + len > model.len() {
                        model.resize(at + len, 0);
                    }
                    model[at..at + len].copy_from_slice(&data);
                    assert_eq!(tx.tell(), (at + len) as u64);
                }
            }

            assert_sorted_disjoint(tx.pending_blocks());
            assert_eq!(tx.logical_len(), model.len() as u64);

            tx.seek(0, Whence::Set).unwrap();
            let view = tx.read(model.len() + 10).unwrap().unwrap_or_default();
            assert_eq!(view, model, "seed {} step {}", seed, step);
        }

        tx.commit().unwrap();
        assert_eq!(tx.into_source().contents(), model.as_slice());
    }
}
