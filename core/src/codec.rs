// Journal payload encoding
// Length-prefixed little-endian block records guarded by a CRC32 trailer

use crate::block::Block;
use crate::error::{TxError, TxResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// "TXJ1"
pub const JOURNAL_MAGIC: u32 = 0x54584A31;
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 4 + 2 + 4;
const RECORD_HEADER_SIZE: usize = 8 + 8;
const TRAILER_SIZE: usize = 4;

/// Serialize an ordered block set.
///
/// Layout: `magic u32 | version u16 | count u32 | count x (pos u64, len u64, bytes) | crc32 u32`
pub fn encode_blocks(blocks: &[Block]) -> TxResult<Vec<u8>> {
    let payload: usize = blocks.iter().map(|b| RECORD_HEADER_SIZE + b.len()).sum();
    let mut out = Vec::with_capacity(HEADER_SIZE + payload + TRAILER_SIZE);

    write_records(&mut out, blocks)?;
    let crc = crc32fast::hash(&out);
    out.write_u32::<LittleEndian>(crc)?;
    Ok(out)
}

fn write_records<W: Write>(writer: &mut W, blocks: &[Block]) -> io::Result<()> {
    let count = u32::try_from(blocks.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many blocks for one journal"))?;

    writer.write_u32::<LittleEndian>(JOURNAL_MAGIC)?;
    writer.write_u16::<LittleEndian>(JOURNAL_VERSION)?;
    writer.write_u32::<LittleEndian>(count)?;
    for block in blocks {
        writer.write_u64::<LittleEndian>(block.pos)?;
        writer.write_u64::<LittleEndian>(block.len() as u64)?;
        writer.write_all(&block.data)?;
    }
    Ok(())
}

/// Deserialize a block set written by [`encode_blocks`].
///
/// Rejects anything that is not a complete, checksummed, sorted and
/// non-overlapping record list.
pub fn decode_blocks(bytes: &[u8]) -> TxResult<Vec<Block>> {
    if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(corrupt(format!("journal too short ({} bytes)", bytes.len())));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_SIZE);
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual_crc = crc32fast::hash(body);
    if stored_crc != actual_crc {
        return Err(corrupt(format!(
            "checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored_crc, actual_crc
        )));
    }

    let mut reader = Cursor::new(body);
    let magic = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    if magic != JOURNAL_MAGIC {
        return Err(corrupt(format!("bad magic {:#010x}", magic)));
    }
    let version = reader.read_u16::<LittleEndian>().map_err(truncated)?;
    if version != JOURNAL_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    let count = reader.read_u32::<LittleEndian>().map_err(truncated)?;

    let mut blocks: Vec<Block> = Vec::new();
    for index in 0..count {
        let pos = reader.read_u64::<LittleEndian>().map_err(truncated)?;
        let len = reader.read_u64::<LittleEndian>().map_err(truncated)?;

        let remaining = (body.len() as u64).saturating_sub(reader.position());
        if len == 0 || len > remaining {
            return Err(corrupt(format!("record {} has invalid length {}", index, len)));
        }
        if pos.checked_add(len).is_none() {
            return Err(corrupt(format!(
                "record {} at {} with length {} overflows the file offset",
                index, pos, len
            )));
        }
        let mut data = vec![0u8; len as usize];
        reader.read_exact(&mut data).map_err(truncated)?;

        if let Some(prev) = blocks.last() {
            if prev.end() > pos {
                return Err(corrupt(format!(
                    "record {} at {} overlaps previous record ending at {}",
                    index,
                    pos,
                    prev.end()
                )));
            }
        }
        blocks.push(Block::new(pos, data));
    }

    if reader.position() != body.len() as u64 {
        return Err(corrupt(format!(
            "{} trailing bytes after {} records",
            body.len() as u64 - reader.position(),
            count
        )));
    }

    Ok(blocks)
}

fn corrupt(msg: String) -> TxError {
    TxError::CorruptJournal(msg)
}

fn truncated(e: io::Error) -> TxError {
    TxError::CorruptJournal(format!("truncated journal: {}", e))
}
