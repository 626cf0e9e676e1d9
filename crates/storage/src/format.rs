//! Multiplexed store file format.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Block 0: Store Header (64 bytes)   │
//! ├────────────────────────────────────┤
//! │ Block 1..N: stream data blocks     │
//! ├────────────────────────────────────┤
//! │ Stream table (block chain)         │
//! └────────────────────────────────────┘
//! ```
//!
//! # Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────┬────────────────┐
//! │ Payload (block_size - 4 bytes)       │ Next block (4) │
//! └──────────────────────────────────────┴────────────────┘
//! ```
//!
//! A next-block value of 0 terminates the chain (block 0 is the header and
//! never part of a chain).
//!
//! # Stream Table
//!
//! One 12 byte entry per stream ID, followed by a CRC32 of all entries:
//!
//! ```text
//! ┌──────────────────┬───────────────────┐
//! │ Length (8 bytes) │ First block (4)   │
//! └──────────────────┴───────────────────┘
//! ```

use crc32fast::Hasher;
use tracestore_core::{Error, Result};

/// Magic bytes identifying a tracestore file: "TRMX"
pub const STORE_MAGIC: [u8; 4] = *b"TRMX";

/// Current store format version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Size of the store header in bytes
pub const HEADER_SIZE: usize = 64;

/// Size of the trailing next-block link in every block
pub const BLOCK_LINK_SIZE: usize = 4;

/// Size of one stream table entry
pub const TABLE_ENTRY_SIZE: usize = 12;

/// Marker for "no block"
pub const NO_BLOCK: u32 = 0;

/// Store header (64 bytes), written into block 0 when the store is closed.
///
/// Until then block 0 is all zeros, so an abandoned file fails the magic
/// check instead of being misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Magic bytes: "TRMX"
    pub magic: [u8; 4],

    /// Format version for forward compatibility
    pub format_version: u32,

    /// Physical block size
    pub block_size: u32,

    /// Number of stream IDs handed out
    pub stream_count: u32,

    /// First block of the stream table chain
    pub table_first_block: u32,

    /// Length of the stream table entries in bytes (excluding CRC)
    pub table_len: u64,

    /// Total number of blocks in the file, header included
    pub total_blocks: u32,

    /// Session identifier
    pub session_uuid: [u8; 16],
}

impl StoreHeader {
    /// Create a new header.
    pub fn new(
        block_size: u32,
        stream_count: u32,
        table_first_block: u32,
        total_blocks: u32,
        session_uuid: [u8; 16],
    ) -> Self {
        StoreHeader {
            magic: STORE_MAGIC,
            format_version: STORE_FORMAT_VERSION,
            block_size,
            stream_count,
            table_first_block,
            table_len: stream_count as u64 * TABLE_ENTRY_SIZE as u64,
            total_blocks,
            session_uuid,
        }
    }

    /// Serialize header to bytes, with a CRC32 over the first 60 bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.stream_count.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.table_first_block.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.table_len.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.total_blocks.to_le_bytes());
        bytes[32..48].copy_from_slice(&self.session_uuid);
        let crc = crc32(&bytes[0..60]);
        bytes[60..64].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Deserialize and validate a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::corrupt("file shorter than store header"));
        }
        if bytes[0..4] != STORE_MAGIC {
            return Err(Error::corrupt(
                "invalid store magic (file incomplete or not a trace file)",
            ));
        }
        let stored_crc = u32::from_le_bytes(le4(&bytes[60..64]));
        if stored_crc != crc32(&bytes[0..60]) {
            return Err(Error::corrupt("store header checksum mismatch"));
        }
        let header = StoreHeader {
            magic: STORE_MAGIC,
            format_version: u32::from_le_bytes(le4(&bytes[4..8])),
            block_size: u32::from_le_bytes(le4(&bytes[8..12])),
            stream_count: u32::from_le_bytes(le4(&bytes[12..16])),
            table_first_block: u32::from_le_bytes(le4(&bytes[16..20])),
            table_len: u64::from_le_bytes(le8(&bytes[20..28])),
            total_blocks: u32::from_le_bytes(le4(&bytes[28..32])),
            session_uuid: {
                let mut id = [0u8; 16];
                id.copy_from_slice(&bytes[32..48]);
                id
            },
        };
        if header.format_version != STORE_FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported store format version {}",
                header.format_version
            )));
        }
        if (header.block_size as usize) < HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "block size {} below header size",
                header.block_size
            )));
        }
        if header.table_len != header.stream_count as u64 * TABLE_ENTRY_SIZE as u64 {
            return Err(Error::corrupt("stream table length does not match stream count"));
        }
        Ok(header)
    }
}

/// Location of one closed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableEntry {
    /// Stream length in bytes
    pub len: u64,
    /// First block of the chain, `NO_BLOCK` for empty streams
    pub first_block: u32,
}

impl TableEntry {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> [u8; TABLE_ENTRY_SIZE] {
        let mut bytes = [0u8; TABLE_ENTRY_SIZE];
        bytes[0..8].copy_from_slice(&self.len.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.first_block.to_le_bytes());
        bytes
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        TableEntry {
            len: u64::from_le_bytes(le8(&bytes[0..8])),
            first_block: u32::from_le_bytes(le4(&bytes[8..12])),
        }
    }
}

/// Encode a full stream table: entries followed by their CRC32.
pub fn encode_table(entries: &[TableEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * TABLE_ENTRY_SIZE + 4);
    for entry in entries {
        out.extend_from_slice(&entry.to_bytes());
    }
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Decode a stream table produced by [`encode_table`].
pub fn decode_table(bytes: &[u8], stream_count: u32) -> Result<Vec<TableEntry>> {
    let entries_len = stream_count as usize * TABLE_ENTRY_SIZE;
    if bytes.len() != entries_len + 4 {
        return Err(Error::corrupt("stream table has wrong size"));
    }
    let stored_crc = u32::from_le_bytes(le4(&bytes[entries_len..]));
    if stored_crc != crc32(&bytes[..entries_len]) {
        return Err(Error::corrupt("stream table checksum mismatch"));
    }
    Ok(bytes[..entries_len]
        .chunks_exact(TABLE_ENTRY_SIZE)
        .map(TableEntry::from_bytes)
        .collect())
}

/// Number of blocks needed for `len` payload bytes.
#[inline]
pub fn blocks_for(len: u64, payload_size: usize) -> u64 {
    let payload = payload_size as u64;
    (len + payload - 1) / payload
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}
