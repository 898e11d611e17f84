// Pending write buffer
// Sorted, non-overlapping byte ranges overlaid on the underlying source

use crate::error::TxResult;
use crate::source::ByteSource;
use log::trace;

/// A contiguous run of pending bytes destined for `[pos, pos + data.len())`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub pos: u64,
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(pos: u64, data: Vec<u8>) -> Self {
        Self { pos, data }
    }

    /// First position past the end of this block
    pub fn end(&self) -> u64 {
        self.pos + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Pending writes plus the logical end of file they produce.
///
/// Blocks are kept sorted by `pos` and never overlap, so block ends are
/// sorted too and both can be binary searched. Adjacent blocks are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBuffer {
    blocks: Vec<Block>,
    max: u64,
}

impl BlockBuffer {
    /// Empty buffer over a source of `max` bytes
    pub fn new(max: u64) -> Self {
        Self {
            blocks: Vec::new(),
            max,
        }
    }

    /// Rebuild a buffer from an already ordered block set, e.g. a replayed journal.
    ///
    /// The logical length becomes the larger of `base_len` and the last block end.
    pub fn from_blocks(blocks: Vec<Block>, base_len: u64) -> Self {
        let max = blocks.last().map_or(base_len, |b| b.end().max(base_len));
        let buffer = Self { blocks, max };
        debug_assert!(buffer.is_well_formed());
        buffer
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Logical length of the file with every pending block applied
    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of pending bytes
    pub fn pending_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.len() as u64).sum()
    }

    /// Drop every pending block and reset the logical length
    pub fn clear(&mut self, max: u64) {
        self.blocks.clear();
        self.max = max;
    }

    /// True when blocks are sorted, non-empty and non-overlapping
    pub fn is_well_formed(&self) -> bool {
        self.blocks.iter().all(|b| !b.is_empty())
            && self.blocks.windows(2).all(|w| w[0].end() <= w[1].pos)
            && self.blocks.last().map_or(true, |b| b.end() <= self.max)
    }

    /// Merge a write of `data` at `at` into the block set.
    ///
    /// A write that touches or overlaps existing blocks is coalesced with
    /// them into a single block; otherwise a new block is inserted.
    pub fn write(&mut self, at: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let end = at + data.len() as u64;
        self.max = self.max.max(end);

        // first block reaching `at`
        let i = self.blocks.partition_point(|b| b.end() < at);

        if i == self.blocks.len() || end < self.blocks[i].pos {
            trace!("Inserting block at {} ({} bytes)", at, data.len());
            self.blocks.insert(i, Block::new(at, data.to_vec()));
            return;
        }

        let next_pos = self.blocks.get(i + 1).map(|b| b.pos);
        let block = &mut self.blocks[i];

        // fits inside block i without reaching the following block
        if block.pos <= at && end <= block.end() && next_pos.map_or(true, |p| end < p) {
            let offset = (at - block.pos) as usize;
            block.data[offset..offset + data.len()].copy_from_slice(data);
            trace!("Spliced {} bytes into block at {}", data.len(), block.pos);
            return;
        }

        let start = block.pos.min(at);
        let mut merged = Vec::with_capacity(data.len());
        if block.pos < at {
            merged.extend_from_slice(&block.data[..(at - block.pos) as usize]);
        }
        merged.extend_from_slice(data);

        // absorb every block starting at or before the end of the write
        let mut j = i;
        while j < self.blocks.len() && self.blocks[j].pos <= end {
            j += 1;
        }
        let last = &self.blocks[j - 1];
        if last.end() > end {
            merged.extend_from_slice(&last.data[(end - last.pos) as usize..]);
        }

        trace!(
            "Merged write at {} into block at {} absorbing {} block(s)",
            at,
            start,
            j - i
        );
        self.blocks.splice(i..j, std::iter::once(Block::new(start, merged)));
    }

    /// Reconstruct `len` bytes from `from`, clipped to the logical length.
    ///
    /// Bytes covered by a block come from the block; gaps are read from
    /// `source`. Gap bytes at or past `committed_len` were never written to
    /// the source and read back as zeros.
    pub fn read<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        committed_len: u64,
        from: u64,
        len: u64,
    ) -> TxResult<Vec<u8>> {
        let end = from.saturating_add(len).min(self.max);
        if from >= end {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity((end - from) as usize);
        let mut cursor = from;

        let first = self.blocks.partition_point(|b| b.end() <= from);
        for block in &self.blocks[first..] {
            if block.pos >= end {
                break;
            }
            if block.pos > cursor {
                fill_gap(source, committed_len, cursor, block.pos, &mut out)?;
                cursor = block.pos;
            }
            let lo = (cursor - block.pos) as usize;
            let hi = (end.min(block.end()) - block.pos) as usize;
            out.extend_from_slice(&block.data[lo..hi]);
            cursor = block.pos + hi as u64;
        }

        if cursor < end {
            fill_gap(source, committed_len, cursor, end, &mut out)?;
        }

        Ok(out)
    }
}

fn fill_gap<S: ByteSource + ?Sized>(
    source: &mut S,
    committed_len: u64,
    from: u64,
    to: u64,
    out: &mut Vec<u8>,
) -> TxResult<()> {
    let backed_end = to.min(committed_len);
    if from < backed_end {
        out.extend(source.read_at(from, (backed_end - from) as usize)?);
    }
    let zeros = to - from.max(backed_end);
    out.resize(out.len() + zeros as usize, 0);
    Ok(())
}
