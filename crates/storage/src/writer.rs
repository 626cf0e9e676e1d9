//! Write side of the multiplexed store.
//!
//! A [`StreamStore`] hands out [`StreamWriter`]s. Each writer buffers one
//! block worth of payload and links blocks into a chain as it grows. Block
//! allocation and the stream table live behind one short critical section;
//! file I/O happens outside it.

use crate::config::StoreConfig;
use crate::format::{self, StoreHeader, TableEntry, BLOCK_LINK_SIZE, NO_BLOCK};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracestore_core::{Error, Result, StreamId};
use tracing::{debug, info, warn};

/// Summary returned when a store is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Number of stream IDs handed out
    pub streams: u32,
    /// Total number of blocks in the file, header included
    pub total_blocks: u32,
    /// Sum of all stream lengths
    pub payload_bytes: u64,
}

/// Allocation state guarded by the store mutex.
#[derive(Debug)]
struct AllocState {
    /// Next unallocated block (block 0 is the header)
    next_block: u32,
    /// Next never-used stream ID
    next_stream_id: u32,
    /// Recyclable IDs, smallest first
    free_ids: BTreeSet<u32>,
    /// Table entry per stream ID, `None` while the stream is open
    entries: Vec<Option<TableEntry>>,
    /// Streams created but not yet closed
    open_streams: usize,
    /// Set once the table and header have been written
    closed: bool,
}

struct StoreShared {
    path: PathBuf,
    config: StoreConfig,
    session_uuid: [u8; 16],
    state: Mutex<AllocState>,
    file: Mutex<File>,
}

impl StoreShared {
    /// Reserve `count` consecutive blocks, returning the first.
    ///
    /// Either every block is reserved or none is.
    fn allocate_blocks(&self, count: u64) -> Result<u32> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::invalid_state("block allocation on a closed store"));
        }
        if state.next_block as u64 + count > self.config.max_blocks as u64 {
            return Err(Error::capacity(format!(
                "store '{}' reached its limit of {} blocks",
                self.path.display(),
                self.config.max_blocks
            )));
        }
        let first = state.next_block;
        state.next_block += count as u32;
        Ok(first)
    }

    /// Write one block: `payload` zero-padded to the payload size, then the link.
    fn write_block(&self, index: u32, payload: &[u8], next: u32) -> Result<()> {
        let block_size = self.config.block_size as usize;
        debug_assert!(payload.len() <= block_size - BLOCK_LINK_SIZE);
        let mut block = vec![0u8; block_size];
        block[..payload.len()].copy_from_slice(payload);
        block[block_size - BLOCK_LINK_SIZE..].copy_from_slice(&next.to_le_bytes());

        let offset = index as u64 * block_size as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block)?;
        Ok(())
    }

    fn register_closed(&self, id: StreamId, entry: TableEntry) {
        let mut state = self.state.lock();
        state.entries[id.0 as usize] = Some(entry);
        state.open_streams -= 1;
    }

    /// Return the ID of a closed, empty stream whose writer is gone.
    fn release_id(&self, id: StreamId) {
        if !self.config.reuse_stream_ids || id.is_reserved() {
            return;
        }
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Some(Some(entry)) = state.entries.get(id.0 as usize) {
            if entry.len == 0 {
                state.free_ids.insert(id.0);
            }
        }
    }
}

/// A single physical file holding many append-only virtual streams.
///
/// Cheap to clone; all clones refer to the same file.
#[derive(Clone)]
pub struct StreamStore {
    shared: Arc<StoreShared>,
}

impl StreamStore {
    /// Create a new store file, truncating any existing file at `path`.
    ///
    /// The file is locked exclusively for the lifetime of the store.
    pub fn create<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        Self::create_with_uuid(path, config, uuid::Uuid::new_v4().into_bytes())
    }

    /// Create a new store file with an explicit session identifier.
    pub fn create_with_uuid<P: AsRef<Path>>(
        path: P,
        config: StoreConfig,
        session_uuid: [u8; 16],
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
            Error::invalid_state(format!(
                "trace file '{}' is already in use by another session",
                path.display()
            ))
        })?;

        // Placeholder header block; the real header is written on close
        file.write_all(&vec![0u8; config.block_size as usize])?;

        info!(
            target: "tracestore::store",
            path = %path.display(),
            block_size = config.block_size,
            "Created trace store"
        );

        Ok(StreamStore {
            shared: Arc::new(StoreShared {
                path,
                config,
                session_uuid,
                state: Mutex::new(AllocState {
                    next_block: 1,
                    next_stream_id: 0,
                    free_ids: BTreeSet::new(),
                    entries: Vec::new(),
                    open_streams: 0,
                    closed: false,
                }),
                file: Mutex::new(file),
            }),
        })
    }

    /// Allocate a new stream.
    ///
    /// IDs increase monotonically from 0, except that IDs of streams closed
    /// without data are recycled when the store allows it.
    pub fn create_stream(&self) -> Result<StreamWriter> {
        let id = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(Error::invalid_state("create_stream on a closed store"));
            }
            let id = match state.free_ids.pop_first() {
                Some(id) => {
                    state.entries[id as usize] = None;
                    id
                }
                None => {
                    if state.next_stream_id == u32::MAX {
                        return Err(Error::capacity("stream ID space exhausted"));
                    }
                    let id = state.next_stream_id;
                    state.next_stream_id += 1;
                    state.entries.push(None);
                    id
                }
            };
            state.open_streams += 1;
            StreamId(id)
        };

        debug!(target: "tracestore::store", stream = id.0, "Created stream");

        let payload = self.shared.config.payload_size();
        Ok(StreamWriter {
            store: Arc::clone(&self.shared),
            id,
            buf: Vec::with_capacity(payload),
            payload_size: payload,
            first_block: NO_BLOCK,
            current_block: NO_BLOCK,
            len: 0,
            closed: false,
        })
    }

    /// Number of streams created so far (recycled IDs counted once).
    pub fn stream_count(&self) -> u32 {
        self.shared.state.lock().next_stream_id
    }

    /// Number of streams created and not yet closed.
    pub fn open_streams(&self) -> usize {
        self.shared.state.lock().open_streams
    }

    /// Number of blocks allocated so far, header included.
    pub fn blocks_allocated(&self) -> u32 {
        self.shared.state.lock().next_block
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Session identifier written into the header.
    pub fn session_uuid(&self) -> [u8; 16] {
        self.shared.session_uuid
    }

    /// Whether the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Write the stream table and header and sync the file.
    ///
    /// Every stream must have been closed. Closing twice is an error.
    pub fn close(&self) -> Result<StoreSummary> {
        let (table, table_first, total_blocks, stream_count, payload_bytes) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(Error::invalid_state("store already closed"));
            }
            if state.open_streams > 0 {
                return Err(Error::invalid_state(format!(
                    "{} streams still open at store close",
                    state.open_streams
                )));
            }
            let entries: Vec<TableEntry> = state
                .entries
                .iter()
                .map(|e| e.unwrap_or_default())
                .collect();
            let payload_bytes = entries.iter().map(|e| e.len).sum();
            let table = format::encode_table(&entries);

            let needed =
                format::blocks_for(table.len() as u64, self.shared.config.payload_size()) as u32;
            let table_first = state.next_block;
            let total = state.next_block as u64 + needed as u64;
            if total > self.shared.config.max_blocks as u64 {
                return Err(Error::capacity("no room left for the stream table"));
            }
            state.next_block = total as u32;
            state.closed = true;
            (table, table_first, total as u32, state.next_stream_id, payload_bytes)
        };

        // Stream table: contiguous blocks, chained like any other stream
        let payload = self.shared.config.payload_size();
        let chunks: Vec<&[u8]> = table.chunks(payload).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let index = table_first + i as u32;
            let next = if i + 1 < chunks.len() { index + 1 } else { NO_BLOCK };
            self.shared.write_block(index, chunk, next)?;
        }

        let header = StoreHeader::new(
            self.shared.config.block_size,
            stream_count,
            table_first,
            total_blocks,
            self.shared.session_uuid,
        );
        {
            let mut file = self.shared.file.lock();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.to_bytes())?;
            file.sync_all()?;
        }

        info!(
            target: "tracestore::store",
            path = %self.shared.path.display(),
            streams = stream_count,
            blocks = total_blocks,
            payload_bytes,
            "Closed trace store"
        );

        Ok(StoreSummary {
            streams: stream_count,
            total_blocks,
            payload_bytes,
        })
    }
}

/// Exclusive write handle for one virtual stream.
///
/// Implements [`std::io::Write`], so codecs can wrap it in compressors.
/// Dropping an unclosed writer closes it.
pub struct StreamWriter {
    store: Arc<StoreShared>,
    id: StreamId,
    buf: Vec<u8>,
    payload_size: usize,
    first_block: u32,
    current_block: u32,
    len: u64,
    closed: bool,
}

impl StreamWriter {
    /// ID of this stream.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append bytes to the stream.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state(format!(
                "write to closed stream {}",
                self.id
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        // Reserve every block the write needs before copying any byte, so
        // a capacity failure leaves the stream unchanged
        let payload = self.payload_size as u64;
        let spill = if self.current_block == NO_BLOCK {
            data.len() as u64
        } else {
            (self.buf.len() as u64 + data.len() as u64).saturating_sub(payload)
        };
        let needed = (spill + payload - 1) / payload;
        let mut next_new = if needed > 0 {
            self.store.allocate_blocks(needed)?
        } else {
            NO_BLOCK
        };

        while !data.is_empty() {
            if self.current_block == NO_BLOCK {
                self.current_block = next_new;
                self.first_block = next_new;
                next_new += 1;
            } else if self.buf.len() == self.payload_size {
                // Only link a new block once there is data for it
                self.store
                    .write_block(self.current_block, &self.buf, next_new)?;
                self.buf.clear();
                self.current_block = next_new;
                next_new += 1;
            }
            let room = self.payload_size - self.buf.len();
            let n = room.min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            self.len += n as u64;
            data = &data[n..];
        }
        Ok(())
    }

    /// Flush the last block and make the stream immutable.
    ///
    /// Closing an already closed stream is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.current_block != NO_BLOCK {
            self.store
                .write_block(self.current_block, &self.buf, NO_BLOCK)?;
            self.buf = Vec::new();
        }
        self.store.register_closed(
            self.id,
            TableEntry {
                len: self.len,
                first_block: self.first_block,
            },
        );
        debug!(target: "tracestore::store", stream = self.id.0, len = self.len, "Closed stream");
        Ok(())
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Partial blocks stay buffered until full or closed
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(
                    target: "tracestore::store",
                    stream = self.id.0,
                    error = %e,
                    "Failed to close dropped stream"
                );
            }
        }
        if self.closed && self.len == 0 {
            self.store.release_id(self.id);
        }
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store(dir: &Path) -> StreamStore {
        StreamStore::create(dir.join("trace.bin"), StoreConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_ids_are_monotonic() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let a = store.create_stream().unwrap();
        let b = store.create_stream().unwrap();
        let c = store.create_stream().unwrap();
        assert_eq!(a.id(), StreamId(0));
        assert_eq!(b.id(), StreamId(1));
        assert_eq!(c.id(), StreamId(2));
        assert_eq!(store.open_streams(), 3);
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut s = store.create_stream().unwrap();
        s.write_bytes(b"abc").unwrap();
        s.close().unwrap();
        s.close().unwrap();
        let err = s.write_bytes(b"d").unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_blocks_allocated_lazily() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let payload = StoreConfig::for_testing().payload_size();

        let mut s = store.create_stream().unwrap();
        assert_eq!(store.blocks_allocated(), 1);
        s.write_bytes(&vec![1u8; payload]).unwrap();
        // Exactly one full block: no successor allocated yet
        assert_eq!(store.blocks_allocated(), 2);
        s.write_bytes(&[2u8]).unwrap();
        assert_eq!(store.blocks_allocated(), 3);
        s.close().unwrap();
    }

    #[test]
    fn test_empty_stream_ids_are_recycled() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut catalogue = store.create_stream().unwrap();
        let mut directory = store.create_stream().unwrap();
        let mut empty = store.create_stream().unwrap();
        assert_eq!(empty.id(), StreamId(2));
        empty.close().unwrap();
        drop(empty);

        let again = store.create_stream().unwrap();
        assert_eq!(again.id(), StreamId(2));
        assert_eq!(store.stream_count(), 3);

        // Reserved streams are never recycled, even when empty
        catalogue.close().unwrap();
        directory.close().unwrap();
        let next = store.create_stream().unwrap();
        assert_eq!(next.id(), StreamId(3));
    }

    #[test]
    fn test_closed_stream_id_held_until_writer_dropped() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let _a = store.create_stream().unwrap();
        let _b = store.create_stream().unwrap();
        let mut held = store.create_stream().unwrap();
        held.close().unwrap();
        assert_eq!(store.create_stream().unwrap().id(), StreamId(3));
        drop(held);
        assert_eq!(store.create_stream().unwrap().id(), StreamId(2));
    }

    #[test]
    fn test_non_empty_streams_not_recycled() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let _a = store.create_stream().unwrap();
        let _b = store.create_stream().unwrap();
        let mut c = store.create_stream().unwrap();
        c.write_bytes(b"x").unwrap();
        c.close().unwrap();
        assert_eq!(store.create_stream().unwrap().id(), StreamId(3));
    }

    #[test]
    fn test_recycling_disabled() {
        let dir = tempdir().unwrap();
        let store = StreamStore::create(
            dir.path().join("t.bin"),
            StoreConfig::for_testing().with_reuse_stream_ids(false),
        )
        .unwrap();
        let _a = store.create_stream().unwrap();
        let _b = store.create_stream().unwrap();
        let mut c = store.create_stream().unwrap();
        c.close().unwrap();
        assert_eq!(store.create_stream().unwrap().id(), StreamId(3));
    }

    #[test]
    fn test_capacity_error() {
        let dir = tempdir().unwrap();
        let store = StreamStore::create(
            dir.path().join("t.bin"),
            StoreConfig::for_testing().with_max_blocks(3),
        )
        .unwrap();
        let payload = StoreConfig::for_testing().payload_size();
        let mut s = store.create_stream().unwrap();
        s.write_bytes(&vec![0u8; payload * 2]).unwrap();
        let err = s.write_bytes(&[1u8]).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[test]
    fn test_failed_write_leaves_stream_unchanged() {
        let dir = tempdir().unwrap();
        let store = StreamStore::create(
            dir.path().join("t.bin"),
            StoreConfig::for_testing().with_max_blocks(3),
        )
        .unwrap();
        let payload = StoreConfig::for_testing().payload_size();
        let mut s = store.create_stream().unwrap();
        s.write_bytes(&vec![7u8; payload * 2 - 3]).unwrap();
        assert!(matches!(s.write_bytes(&[1u8; 8]), Err(Error::Capacity(_))));
        assert_eq!(s.len(), payload as u64 * 2 - 3);
        s.write_bytes(&[1u8; 3]).unwrap();
        assert_eq!(s.len(), payload as u64 * 2);
    }

    #[test]
    fn test_close_requires_all_streams_closed() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let mut s = store.create_stream().unwrap();
        assert!(matches!(store.close(), Err(Error::InvalidState(_))));
        s.close().unwrap();
        let summary = store.close().unwrap();
        assert_eq!(summary.streams, 1);
        assert!(store.is_closed());
        assert!(matches!(store.close(), Err(Error::InvalidState(_))));
        assert!(matches!(store.create_stream(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_drop_closes_stream() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        {
            let mut s = store.create_stream().unwrap();
            s.write_bytes(b"dropped").unwrap();
        }
        assert_eq!(store.open_streams(), 0);
        let summary = store.close().unwrap();
        assert_eq!(summary.payload_bytes, 7);
    }

    #[test]
    fn test_file_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        let _store = StreamStore::create(&path, StoreConfig::for_testing()).unwrap();
        let second = StreamStore::create(&path, StoreConfig::for_testing());
        assert!(matches!(second, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let result = StreamStore::create(
            dir.path().join("t.bin"),
            StoreConfig::new().with_block_size(16),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
