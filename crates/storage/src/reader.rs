//! Read side of the multiplexed store.
//!
//! The whole file is memory-mapped once; each [`StreamReader`] resolves its
//! block chain up front and then serves reads straight from the map.

use crate::format::{self, StoreHeader, TableEntry, BLOCK_LINK_SIZE, HEADER_SIZE, NO_BLOCK};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracestore_core::{Error, Result, StreamId};
use tracing::debug;

/// Read-only view of a closed store file.
#[derive(Debug, Clone)]
pub struct StreamStoreReader {
    path: PathBuf,
    map: Arc<Mmap>,
    header: StoreHeader,
    entries: Arc<Vec<TableEntry>>,
}

impl StreamStoreReader {
    /// Open and validate a store file.
    ///
    /// Fails with `CorruptFormat` if the header, stream table or any chain
    /// start is inconsistent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(Error::corrupt(format!(
                "'{}' is too short to be a trace file",
                path.display()
            )));
        }

        // SAFETY: the file is opened read-only and trace files are never
        // modified after the writing session closes them.
        let map = unsafe { Mmap::map(&file)? };
        let header = StoreHeader::from_bytes(&map[..HEADER_SIZE])?;

        let block_size = header.block_size as u64;
        if file_len < header.total_blocks as u64 * block_size {
            return Err(Error::corrupt(format!(
                "file holds {} bytes but header claims {} blocks",
                file_len, header.total_blocks
            )));
        }

        let map = Arc::new(map);
        let table_bytes = ChainCursor::new(
            &map,
            &header,
            header.table_first_block,
            header.table_len + 4,
        )?
        .collect_bytes();
        let entries = format::decode_table(&table_bytes, header.stream_count)?;

        for (id, entry) in entries.iter().enumerate() {
            let empty = entry.len == 0;
            let unlinked = entry.first_block == NO_BLOCK;
            if empty != unlinked || entry.first_block >= header.total_blocks {
                return Err(Error::corrupt(format!(
                    "stream table entry {} is inconsistent",
                    id
                )));
            }
        }

        debug!(
            target: "tracestore::store",
            path = %path.display(),
            streams = header.stream_count,
            blocks = header.total_blocks,
            "Opened trace store"
        );

        Ok(StreamStoreReader {
            path,
            map,
            header,
            entries: Arc::new(entries),
        })
    }

    /// Open a stream for sequential or random access reading.
    pub fn open_stream(&self, id: StreamId) -> Result<StreamReader> {
        let entry = self
            .entries
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| Error::corrupt(format!("unknown {}", id)))?;
        let blocks = ChainCursor::new(&self.map, &self.header, entry.first_block, entry.len)?.blocks;
        Ok(StreamReader {
            map: Arc::clone(&self.map),
            id,
            blocks,
            block_size: self.header.block_size as usize,
            len: entry.len,
            pos: 0,
        })
    }

    /// Read a whole stream into memory.
    pub fn read_stream(&self, id: StreamId) -> Result<Vec<u8>> {
        let mut reader = self.open_stream(id)?;
        let mut out = Vec::with_capacity(reader.len() as usize);
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Length of a stream in bytes.
    pub fn stream_len(&self, id: StreamId) -> Option<u64> {
        self.entries.get(id.0 as usize).map(|e| e.len)
    }

    /// Number of stream IDs in the file.
    pub fn stream_count(&self) -> u32 {
        self.header.stream_count
    }

    /// Session identifier from the header.
    pub fn session_uuid(&self) -> [u8; 16] {
        self.header.session_uuid
    }

    /// Physical block size of the file.
    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolved block chain of one stream.
struct ChainCursor<'a> {
    map: &'a Mmap,
    block_size: usize,
    len: u64,
    blocks: Vec<u32>,
}

impl<'a> ChainCursor<'a> {
    fn new(map: &'a Mmap, header: &StoreHeader, first: u32, len: u64) -> Result<Self> {
        let block_size = header.block_size as usize;
        let payload = block_size - BLOCK_LINK_SIZE;
        let expected = format::blocks_for(len, payload);
        if expected > header.total_blocks as u64 {
            return Err(Error::corrupt("stream longer than the file"));
        }

        let mut blocks = Vec::with_capacity(expected as usize);
        let mut current = first;
        for i in 0..expected {
            if current == NO_BLOCK || current >= header.total_blocks {
                return Err(Error::corrupt(format!(
                    "broken block chain at link {} (block {})",
                    i, current
                )));
            }
            blocks.push(current);
            let end = (current as usize + 1) * block_size;
            let link = &map[end - BLOCK_LINK_SIZE..end];
            current = u32::from_le_bytes([link[0], link[1], link[2], link[3]]);
        }
        if current != NO_BLOCK {
            return Err(Error::corrupt("block chain does not terminate"));
        }

        Ok(ChainCursor {
            map,
            block_size,
            len,
            blocks,
        })
    }

    fn collect_bytes(&self) -> Vec<u8> {
        let payload = self.block_size - BLOCK_LINK_SIZE;
        let mut out = Vec::with_capacity(self.len as usize);
        let mut remaining = self.len as usize;
        for &block in &self.blocks {
            let start = block as usize * self.block_size;
            let n = remaining.min(payload);
            out.extend_from_slice(&self.map[start..start + n]);
            remaining -= n;
        }
        out
    }
}

/// Reader over one virtual stream.
///
/// Implements [`Read`] and [`Seek`]; [`read_at`](Self::read_at) serves
/// positioned reads without moving the cursor.
#[derive(Debug, Clone)]
pub struct StreamReader {
    map: Arc<Mmap>,
    id: StreamId,
    blocks: Vec<u32>,
    block_size: usize,
    len: u64,
    pos: u64,
}

impl StreamReader {
    /// ID of this stream.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Stream length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the stream holds no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Copy bytes starting at `offset` into `buf`, returning the count.
    ///
    /// Returns 0 at or past the end of the stream.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let payload = (self.block_size - BLOCK_LINK_SIZE) as u64;
        let mut offset = offset;
        let mut written = 0;
        while written < buf.len() && offset < self.len {
            let block = self.blocks[(offset / payload) as usize] as usize;
            let within = (offset % payload) as usize;
            let avail = (payload as usize - within).min((self.len - offset) as usize);
            let n = avail.min(buf.len() - written);
            let start = block * self.block_size + within;
            buf[written..written + n].copy_from_slice(&self.map[start..start + n]);
            written += n;
            offset += n as u64;
        }
        written
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.pos, buf);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StoreConfig, StreamStore};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_store(path: &Path, streams: &[&[u8]]) {
        let store = StreamStore::create(path, StoreConfig::for_testing()).unwrap();
        for data in streams {
            let mut s = store.create_stream().unwrap();
            s.write_all(data).unwrap();
            s.close().unwrap();
        }
        store.close().unwrap();
    }

    #[test]
    fn test_roundtrip_multi_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let big: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        write_store(&path, &[&b"small"[..], &big[..], &b""[..]]);

        let reader = StreamStoreReader::open(&path).unwrap();
        assert_eq!(reader.stream_count(), 3);
        assert_eq!(reader.read_stream(StreamId(0)).unwrap(), b"small");
        assert_eq!(reader.read_stream(StreamId(1)).unwrap(), big);
        assert!(reader.read_stream(StreamId(2)).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_stream_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        write_store(&path, &[&b"a"[..]]);
        let reader = StreamStoreReader::open(&path).unwrap();
        assert!(matches!(
            reader.open_stream(StreamId(9)),
            Err(Error::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_read_at_and_seek() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(600).collect();
        write_store(&path, &[&data[..]]);

        let reader = StreamStoreReader::open(&path).unwrap();
        let mut stream = reader.open_stream(StreamId(0)).unwrap();

        // Straddles a block boundary (payload is 124 bytes)
        let mut buf = [0u8; 10];
        assert_eq!(stream.read_at(120, &mut buf), 10);
        assert_eq!(&buf[..], &data[120..130]);

        stream.seek(SeekFrom::End(-4)).unwrap();
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &data[596..]);

        assert_eq!(stream.read_at(600, &mut buf), 0);
        assert!(stream.seek(SeekFrom::Current(-1000)).is_err());
    }

    #[test]
    fn test_unclosed_store_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
        let mut s = store.create_stream().unwrap();
        s.write_all(b"never finished").unwrap();
        s.close().unwrap();

        let err = StreamStoreReader::open(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptFormat(_)));
    }

    #[test]
    fn test_broken_chain_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let data = vec![7u8; 300];
        write_store(&path, &[&data[..]]);

        // Point the first block's link past the end of the file
        let block_size = StoreConfig::for_testing().block_size as usize;
        let mut bytes = std::fs::read(&path).unwrap();
        let link_at = 2 * block_size - BLOCK_LINK_SIZE;
        bytes[link_at..link_at + 4].copy_from_slice(&9999u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let reader = StreamStoreReader::open(&path).unwrap();
        assert!(matches!(
            reader.open_stream(StreamId(0)),
            Err(Error::CorruptFormat(_))
        ));
    }
}
