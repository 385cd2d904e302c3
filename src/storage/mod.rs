//! Chunked arenas for persistent node data.
//!
//! Four arenas back the DOM: variable-sized records for packed elements
//! and text, fixed-size records for render rects and per-node style
//! references. Each arena is a sequence of chunks; a chunk is either
//! unloaded (only its cache block is known), loaded clean, or loaded
//! dirty. A shared unpacked-space budget evicts clean chunks LRU-first
//! and flushes dirty ones before eviction.

use crate::cache::{BlockType, CacheFile};
use crate::deadline::{Deadline, Progress};
use crate::error::{Error, Result};
use crate::serial::{SerialReader, SerialWriter};

/// Per-document buffer size the arena budgets are fractions of.
pub const DEFAULT_DOC_BUFFER_SIZE: usize = 0x00A0_0000; // 10 MiB

pub const TEXT_CHUNK_SIZE: u32 = 0x8000; // 32K
pub const ELEM_CHUNK_SIZE: u32 = 0x4000; // 16K
pub const RECT_CHUNK_SIZE: u32 = 0xF000; // 60K
pub const STYLE_CHUNK_SIZE: u32 = 0xC000; // 48K

/// Record header preceding every variable-sized payload:
/// owner handle (u32) + parent handle (u32) + payload size (u16).
const RECORD_HEADER_SIZE: u32 = 10;

/// Records are aligned so the low 16 address bits cover a whole chunk.
const RECORD_ALIGN: u32 = 16;

/// Directory blocks live at this reserved data index within the arena's
/// block type; chunk payloads use their chunk index.
const DIRECTORY_INDEX: u16 = 0xFFFF;

/// Owner value marking a tombstoned record.
const TOMBSTONE_OWNER: u32 = 0xFFFF_FFFF;

/// Opaque 32-bit arena address: `(chunk_index << 16) | (offset / 16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordAddr(pub u32);

impl RecordAddr {
    pub const NULL: RecordAddr = RecordAddr(u32::MAX);

    fn new(chunk: usize, offset: u32) -> Self {
        debug_assert_eq!(offset % RECORD_ALIGN, 0);
        RecordAddr(((chunk as u32) << 16) | (offset / RECORD_ALIGN))
    }

    fn chunk(self) -> usize {
        (self.0 >> 16) as usize
    }

    fn offset(self) -> u32 {
        (self.0 & 0xFFFF) * RECORD_ALIGN
    }

    pub fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

fn align_record(n: u32) -> u32 {
    (n + (RECORD_ALIGN - 1)) & !(RECORD_ALIGN - 1)
}

enum ChunkData {
    /// Bytes resident in memory. `dirty` means they differ from the
    /// cache file (or were never written).
    Loaded { bytes: Vec<u8>, dirty: bool },
    /// Only the cache block `(arena_type, chunk_index)` holds the bytes.
    Unloaded,
}

struct Chunk {
    data: ChunkData,
    /// Bytes in use; the tail chunk grows, others are frozen.
    used: u32,
    /// Monotonic access stamp for LRU eviction.
    stamp: u64,
}

impl Chunk {
    fn is_dirty(&self) -> bool {
        matches!(self.data, ChunkData::Loaded { dirty: true, .. })
    }

    fn loaded_len(&self) -> usize {
        match &self.data {
            ChunkData::Loaded { bytes, .. } => bytes.len(),
            ChunkData::Unloaded => 0,
        }
    }
}

/// Arena of variable-sized records (packed elements, packed text).
pub struct ChunkedStorage {
    arena_type: BlockType,
    chunk_size: u32,
    /// Unpacked-space budget in bytes; loaded chunks above this trigger
    /// eviction.
    max_loaded: usize,
    chunks: Vec<Chunk>,
    loaded_bytes: usize,
    clock: u64,
}

impl ChunkedStorage {
    pub fn new(arena_type: BlockType, chunk_size: u32, max_loaded: usize) -> Self {
        Self {
            arena_type,
            chunk_size,
            max_loaded,
            chunks: Vec::new(),
            loaded_bytes: 0,
            clock: 0,
        }
    }

    pub fn arena_type(&self) -> BlockType {
        self.arena_type
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn has_dirty_chunks(&self) -> bool {
        self.chunks.iter().any(Chunk::is_dirty)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Appends a record to the tail chunk, opening a new chunk when the
    /// tail cannot hold it.
    pub fn alloc_record(
        &mut self,
        owner: u32,
        parent: u32,
        payload: &[u8],
        mut cache: Option<&mut CacheFile>,
    ) -> Result<RecordAddr> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::Corrupted(format!(
                "arena {:?} record payload of {} bytes exceeds the 64 KiB record limit",
                self.arena_type,
                payload.len()
            )));
        }
        let record_size = align_record(RECORD_HEADER_SIZE + payload.len() as u32);
        // A record larger than the nominal chunk size gets a chunk of
        // its own (the chunk just runs oversized).
        let need_new = match self.chunks.last() {
            Some(chunk) => chunk.used > 0 && chunk.used + record_size > self.chunk_size,
            None => true,
        };
        if need_new {
            let stamp = self.tick();
            self.chunks.push(Chunk {
                data: ChunkData::Loaded {
                    bytes: Vec::with_capacity(self.chunk_size as usize),
                    dirty: true,
                },
                used: 0,
                stamp,
            });
        }
        let chunk_index = self.chunks.len() - 1;
        self.ensure_loaded(chunk_index, cache.as_deref_mut())?;

        let stamp = self.tick();
        let chunk = &mut self.chunks[chunk_index];
        chunk.stamp = stamp;
        let offset = chunk.used;
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            unreachable!("just loaded");
        };
        let mut w = SerialWriter::with_capacity(record_size as usize);
        w.put_u32(owner);
        w.put_u32(parent);
        w.put_u16(payload.len() as u16);
        w.put_bytes(payload);
        let mut record = w.into_vec();
        record.resize(record_size as usize, 0);
        let grown = record.len();
        bytes.extend_from_slice(&record);
        *dirty = true;
        chunk.used += record_size;
        self.loaded_bytes += grown;
        self.enforce_budget(cache)?;
        Ok(RecordAddr::new(chunk_index, offset))
    }

    /// Returns the payload bytes of the record at `addr`, paging its
    /// chunk in if necessary.
    pub fn get(&mut self, addr: RecordAddr, cache: Option<&mut CacheFile>) -> Result<&[u8]> {
        let (chunk_index, offset) = self.locate(addr)?;
        self.ensure_loaded(chunk_index, cache)?;
        let stamp = self.tick();
        let chunk = &mut self.chunks[chunk_index];
        chunk.stamp = stamp;
        let ChunkData::Loaded { bytes, .. } = &chunk.data else {
            unreachable!("just loaded");
        };
        let mut r = SerialReader::new(&bytes[offset as usize..]);
        let owner = r.get_u32()?;
        let _parent = r.get_u32()?;
        let size = r.get_u16()? as usize;
        if owner == TOMBSTONE_OWNER {
            return Err(Error::Corrupted(format!(
                "arena {:?} record {:#010x} is tombstoned",
                self.arena_type, addr.0
            )));
        }
        let start = offset as usize + RECORD_HEADER_SIZE as usize;
        Ok(&bytes[start..start + size])
    }

    /// Rewrites a record's payload. In-place when the new payload fits
    /// the record's aligned slot; otherwise the record is tombstoned and
    /// reallocated, and the returned address differs.
    pub fn modify(
        &mut self,
        addr: RecordAddr,
        payload: &[u8],
        mut cache: Option<&mut CacheFile>,
    ) -> Result<RecordAddr> {
        let (chunk_index, offset) = self.locate(addr)?;
        self.ensure_loaded(chunk_index, cache.as_deref_mut())?;
        let chunk = &mut self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            unreachable!("just loaded");
        };
        let mut r = SerialReader::new(&bytes[offset as usize..]);
        let owner = r.get_u32()?;
        let parent = r.get_u32()?;
        let old_size = r.get_u16()? as u32;
        let slot = align_record(RECORD_HEADER_SIZE + old_size);
        if RECORD_HEADER_SIZE + payload.len() as u32 <= slot {
            let base = offset as usize;
            bytes[base + 8..base + 10].copy_from_slice(&(payload.len() as u16).to_le_bytes());
            let start = base + RECORD_HEADER_SIZE as usize;
            bytes[start..start + payload.len()].copy_from_slice(payload);
            // Zero the slack so identical content re-saves identically.
            for b in &mut bytes[start + payload.len()..base + slot as usize] {
                *b = 0;
            }
            *dirty = true;
            return Ok(addr);
        }
        self.free_record(addr)?;
        self.alloc_record(owner, parent, payload, cache)
    }

    /// Tombstones a record. Chunks are never compacted online; a full
    /// save re-packs live records.
    pub fn free_record(&mut self, addr: RecordAddr) -> Result<()> {
        let (chunk_index, offset) = self.locate(addr)?;
        // Freeing happens only on mutable (resident) chunks.
        let chunk = &mut self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            return Err(Error::Corrupted(
                "freeing a record in an unloaded chunk".into(),
            ));
        };
        let base = offset as usize;
        bytes[base..base + 4].copy_from_slice(&TOMBSTONE_OWNER.to_le_bytes());
        *dirty = true;
        Ok(())
    }

    pub fn set_parent(
        &mut self,
        addr: RecordAddr,
        parent: u32,
        cache: Option<&mut CacheFile>,
    ) -> Result<()> {
        let (chunk_index, offset) = self.locate(addr)?;
        self.ensure_loaded(chunk_index, cache)?;
        let chunk = &mut self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            unreachable!("just loaded");
        };
        let base = offset as usize + 4;
        bytes[base..base + 4].copy_from_slice(&parent.to_le_bytes());
        *dirty = true;
        Ok(())
    }

    pub fn get_parent(
        &mut self,
        addr: RecordAddr,
        cache: Option<&mut CacheFile>,
    ) -> Result<u32> {
        let (chunk_index, offset) = self.locate(addr)?;
        self.ensure_loaded(chunk_index, cache)?;
        let chunk = &self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, .. } = &chunk.data else {
            unreachable!("just loaded");
        };
        let base = offset as usize + 4;
        Ok(u32::from_le_bytes(
            bytes[base..base + 4].try_into().expect("4 bytes"),
        ))
    }

    fn locate(&self, addr: RecordAddr) -> Result<(usize, u32)> {
        if addr.is_null() || addr.chunk() >= self.chunks.len() {
            return Err(Error::Corrupted(format!(
                "arena {:?} address {:#010x} out of range",
                self.arena_type, addr.0
            )));
        }
        Ok((addr.chunk(), addr.offset()))
    }

    fn ensure_loaded(&mut self, chunk_index: usize, cache: Option<&mut CacheFile>) -> Result<()> {
        if matches!(self.chunks[chunk_index].data, ChunkData::Loaded { .. }) {
            return Ok(());
        }
        let cache = cache.ok_or_else(|| {
            Error::Corrupted(format!(
                "arena {:?} chunk {} unloaded and no cache file attached",
                self.arena_type, chunk_index
            ))
        })?;
        let bytes = cache.read(self.arena_type, chunk_index as u16)?;
        if bytes.len() != self.chunks[chunk_index].used as usize {
            return Err(Error::Corrupted(format!(
                "arena {:?} chunk {} has {} bytes, directory says {}",
                self.arena_type,
                chunk_index,
                bytes.len(),
                self.chunks[chunk_index].used
            )));
        }
        self.loaded_bytes += bytes.len();
        let stamp = self.tick();
        let chunk = &mut self.chunks[chunk_index];
        chunk.data = ChunkData::Loaded { bytes, dirty: false };
        chunk.stamp = stamp;
        Ok(())
    }

    /// Evicts chunks (clean LRU first, dirty flushed then evicted) until
    /// the loaded footprint fits the budget. Without a cache file there
    /// is nowhere to spill, so everything stays resident.
    fn enforce_budget(&mut self, mut cache: Option<&mut CacheFile>) -> Result<()> {
        let Some(cache) = cache.take() else {
            return Ok(());
        };
        while self.loaded_bytes > self.max_loaded {
            // The tail chunk is append-active and never evicted.
            let candidate = self
                .chunks
                .iter()
                .enumerate()
                .take(self.chunks.len().saturating_sub(1))
                .filter(|(_, c)| matches!(c.data, ChunkData::Loaded { .. }))
                .min_by_key(|(_, c)| (c.is_dirty(), c.stamp))
                .map(|(i, _)| i);
            let Some(i) = candidate else {
                break;
            };
            if self.chunks[i].is_dirty() {
                self.flush_chunk(i, cache)?;
            }
            let chunk = &mut self.chunks[i];
            self.loaded_bytes -= chunk.loaded_len();
            chunk.data = ChunkData::Unloaded;
            log::debug!(
                "arena {:?}: evicted chunk {} ({} bytes loaded)",
                self.arena_type,
                i,
                self.loaded_bytes
            );
        }
        Ok(())
    }

    fn flush_chunk(&mut self, chunk_index: usize, cache: &mut CacheFile) -> Result<()> {
        let chunk = &mut self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            return Ok(());
        };
        if !*dirty {
            return Ok(());
        }
        cache.write(self.arena_type, chunk_index as u16, bytes, true)?;
        *dirty = false;
        Ok(())
    }

    /// Writes all dirty chunks plus the arena directory. Deadline-checked
    /// between chunks; returns `Timeout` with everything written so far
    /// durable in the (still dirty) cache file.
    pub fn save(&mut self, cache: &mut CacheFile, deadline: Deadline) -> Result<Progress> {
        for i in 0..self.chunks.len() {
            if self.chunks[i].is_dirty() {
                self.flush_chunk(i, cache)?;
                if deadline.expired() {
                    return Ok(Progress::Timeout);
                }
            }
        }
        let mut w = SerialWriter::new();
        w.put_u32(self.chunks.len() as u32);
        for chunk in &self.chunks {
            w.put_u32(chunk.used);
        }
        cache.write(self.arena_type, DIRECTORY_INDEX, w.as_slice(), false)?;
        Ok(Progress::Done)
    }

    /// Reads the arena directory and registers every chunk as unloaded;
    /// chunk bytes page in on first access.
    pub fn load(&mut self, cache: &mut CacheFile) -> Result<()> {
        self.chunks.clear();
        self.loaded_bytes = 0;
        let raw = cache.read(self.arena_type, DIRECTORY_INDEX)?;
        let mut r = SerialReader::new(&raw);
        let count = r.get_u32()? as usize;
        if count > u16::MAX as usize {
            return Err(Error::Corrupted(format!(
                "arena {:?} directory lists {count} chunks",
                self.arena_type
            )));
        }
        for _ in 0..count {
            let used = r.get_u32()?;
            self.chunks.push(Chunk {
                data: ChunkData::Unloaded,
                used,
                stamp: 0,
            });
        }
        Ok(())
    }
}

/// Arena of fixed-size records addressed by a dense index (render rects,
/// per-node style references). Absent records read back zeroed.
pub struct FixedStorage {
    arena_type: BlockType,
    record_size: u32,
    records_per_chunk: u32,
    chunks: Vec<Chunk>,
    max_loaded: usize,
    loaded_bytes: usize,
    clock: u64,
}

impl FixedStorage {
    pub fn new(
        arena_type: BlockType,
        record_size: u32,
        chunk_size: u32,
        max_loaded: usize,
    ) -> Self {
        Self {
            arena_type,
            record_size,
            records_per_chunk: chunk_size / record_size,
            chunks: Vec::new(),
            max_loaded,
            loaded_bytes: 0,
            clock: 0,
        }
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    pub fn has_dirty_chunks(&self) -> bool {
        self.chunks.iter().any(Chunk::is_dirty)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn chunk_byte_len(&self) -> usize {
        (self.records_per_chunk * self.record_size) as usize
    }

    /// Makes sure the chunk holding record `index` exists and is
    /// resident, zero-filling brand-new chunks.
    fn ensure_chunk(&mut self, index: u32, cache: Option<&mut CacheFile>) -> Result<usize> {
        let chunk_index = (index / self.records_per_chunk) as usize;
        let byte_len = self.chunk_byte_len();
        while self.chunks.len() <= chunk_index {
            let stamp = self.tick();
            self.chunks.push(Chunk {
                data: ChunkData::Loaded {
                    bytes: vec![0u8; byte_len],
                    dirty: true,
                },
                used: byte_len as u32,
                stamp,
            });
            self.loaded_bytes += byte_len;
        }
        if matches!(self.chunks[chunk_index].data, ChunkData::Unloaded) {
            let cache = cache.ok_or_else(|| {
                Error::Corrupted(format!(
                    "arena {:?} chunk {} unloaded and no cache file attached",
                    self.arena_type, chunk_index
                ))
            })?;
            let bytes = cache.read(self.arena_type, chunk_index as u16)?;
            if bytes.len() != byte_len {
                return Err(Error::Corrupted(format!(
                    "arena {:?} chunk {} has {} bytes, expected {}",
                    self.arena_type,
                    chunk_index,
                    bytes.len(),
                    byte_len
                )));
            }
            self.loaded_bytes += bytes.len();
            self.chunks[chunk_index].data = ChunkData::Loaded { bytes, dirty: false };
        }
        let stamp = self.tick();
        self.chunks[chunk_index].stamp = stamp;
        Ok(chunk_index)
    }

    /// Copies record `index` into `out` (zeroes if never written).
    pub fn get(
        &mut self,
        index: u32,
        out: &mut [u8],
        cache: Option<&mut CacheFile>,
    ) -> Result<()> {
        debug_assert_eq!(out.len(), self.record_size as usize);
        if (index / self.records_per_chunk) as usize >= self.chunks.len() {
            out.fill(0);
            return Ok(());
        }
        let chunk_index = self.ensure_chunk(index, cache)?;
        let offset = ((index % self.records_per_chunk) * self.record_size) as usize;
        let ChunkData::Loaded { bytes, .. } = &self.chunks[chunk_index].data else {
            unreachable!("just loaded");
        };
        out.copy_from_slice(&bytes[offset..offset + self.record_size as usize]);
        Ok(())
    }

    pub fn set(
        &mut self,
        index: u32,
        record: &[u8],
        mut cache: Option<&mut CacheFile>,
    ) -> Result<()> {
        debug_assert_eq!(record.len(), self.record_size as usize);
        let chunk_index = self.ensure_chunk(index, cache.as_deref_mut())?;
        let offset = ((index % self.records_per_chunk) * self.record_size) as usize;
        let chunk = &mut self.chunks[chunk_index];
        let ChunkData::Loaded { bytes, dirty } = &mut chunk.data else {
            unreachable!("just loaded");
        };
        bytes[offset..offset + record.len()].copy_from_slice(record);
        *dirty = true;
        self.enforce_budget(cache)
    }

    fn enforce_budget(&mut self, mut cache: Option<&mut CacheFile>) -> Result<()> {
        let Some(cache) = cache.take() else {
            return Ok(());
        };
        while self.loaded_bytes > self.max_loaded {
            let candidate = self
                .chunks
                .iter()
                .enumerate()
                .filter(|(_, c)| matches!(c.data, ChunkData::Loaded { .. }))
                .min_by_key(|(_, c)| (c.is_dirty(), c.stamp))
                .map(|(i, _)| i);
            let Some(i) = candidate else {
                break;
            };
            if self.chunks[i].is_dirty() {
                let ChunkData::Loaded { bytes, .. } = &self.chunks[i].data else {
                    unreachable!();
                };
                cache.write(self.arena_type, i as u16, bytes, true)?;
            }
            let chunk = &mut self.chunks[i];
            self.loaded_bytes -= chunk.loaded_len();
            chunk.data = ChunkData::Unloaded;
        }
        Ok(())
    }

    pub fn save(&mut self, cache: &mut CacheFile, deadline: Deadline) -> Result<Progress> {
        for i in 0..self.chunks.len() {
            if self.chunks[i].is_dirty() {
                let ChunkData::Loaded { bytes, dirty } = &mut self.chunks[i].data else {
                    unreachable!();
                };
                cache.write(self.arena_type, i as u16, bytes, true)?;
                *dirty = false;
                if deadline.expired() {
                    return Ok(Progress::Timeout);
                }
            }
        }
        let mut w = SerialWriter::new();
        w.put_u32(self.chunks.len() as u32);
        w.put_u32(self.record_size);
        cache.write(self.arena_type, DIRECTORY_INDEX, w.as_slice(), false)?;
        Ok(Progress::Done)
    }

    pub fn load(&mut self, cache: &mut CacheFile) -> Result<()> {
        self.chunks.clear();
        self.loaded_bytes = 0;
        let raw = cache.read(self.arena_type, DIRECTORY_INDEX)?;
        let mut r = SerialReader::new(&raw);
        let count = r.get_u32()? as usize;
        let record_size = r.get_u32()?;
        if record_size != self.record_size {
            return Err(Error::Corrupted(format!(
                "arena {:?} record size {} != expected {}",
                self.arena_type, record_size, self.record_size
            )));
        }
        let byte_len = self.chunk_byte_len() as u32;
        for _ in 0..count {
            self.chunks.push(Chunk {
                data: ChunkData::Unloaded,
                used: byte_len,
                stamp: 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Compression;
    use crate::io::MemStream;

    fn fresh_cache() -> CacheFile {
        let mut cf = CacheFile::new(1, Compression::Zlib);
        cf.create(Box::new(MemStream::new())).unwrap();
        cf
    }

    #[test]
    fn test_alloc_and_get() {
        let mut arena = ChunkedStorage::new(BlockType::TextData, 0x8000, 1 << 20);
        let a = arena.alloc_record(1, 2, b"hello", None).unwrap();
        let b = arena.alloc_record(3, 4, b"world!", None).unwrap();
        assert_eq!(arena.get(a, None).unwrap(), b"hello");
        assert_eq!(arena.get(b, None).unwrap(), b"world!");
        assert_eq!(arena.get_parent(a, None).unwrap(), 2);
        assert_eq!(arena.get_parent(b, None).unwrap(), 4);
    }

    #[test]
    fn test_chunk_overflow_opens_new_chunk() {
        let mut arena = ChunkedStorage::new(BlockType::TextData, 64, 1 << 20);
        let payload = [7u8; 30];
        let a = arena.alloc_record(1, 0, &payload, None).unwrap();
        let b = arena.alloc_record(2, 0, &payload, None).unwrap();
        assert_eq!(a.chunk(), 0);
        assert_eq!(b.chunk(), 1);
        assert_eq!(arena.chunk_count(), 2);
    }

    #[test]
    fn test_modify_in_place_and_relocating() {
        let mut arena = ChunkedStorage::new(BlockType::TextData, 0x8000, 1 << 20);
        let a = arena.alloc_record(1, 9, b"short", None).unwrap();
        // Fits the 16-byte slot: same address.
        let same = arena.modify(a, b"tiny", None).unwrap();
        assert_eq!(same, a);
        assert_eq!(arena.get(a, None).unwrap(), b"tiny");
        // Too large for the slot: relocated, parent preserved.
        let moved = arena
            .modify(a, b"a payload that is much longer than one slot", None)
            .unwrap();
        assert_ne!(moved, a);
        assert_eq!(
            arena.get(moved, None).unwrap(),
            b"a payload that is much longer than one slot"
        );
        assert_eq!(arena.get_parent(moved, None).unwrap(), 9);
        assert!(arena.get(a, None).is_err()); // tombstoned
    }

    #[test]
    fn test_set_parent_direct_field() {
        let mut arena = ChunkedStorage::new(BlockType::ElemData, 0x4000, 1 << 20);
        let a = arena.alloc_record(5, 1, &[0u8; 20], None).unwrap();
        arena.set_parent(a, 42, None).unwrap();
        assert_eq!(arena.get_parent(a, None).unwrap(), 42);
    }

    #[test]
    fn test_save_load_page_in() {
        let mut cache = fresh_cache();
        let mut arena = ChunkedStorage::new(BlockType::TextData, 64, 1 << 20);
        let a = arena.alloc_record(1, 0, b"persisted one", None).unwrap();
        let b = arena.alloc_record(2, 0, b"persisted two", None).unwrap();
        assert_eq!(
            arena.save(&mut cache, Deadline::none()).unwrap(),
            Progress::Done
        );
        cache.flush(true, Deadline::none()).unwrap();

        let mut arena2 = ChunkedStorage::new(BlockType::TextData, 64, 1 << 20);
        arena2.load(&mut cache).unwrap();
        assert_eq!(arena2.chunk_count(), arena.chunk_count());
        assert_eq!(arena2.get(a, Some(&mut cache)).unwrap(), b"persisted one");
        assert_eq!(arena2.get(b, Some(&mut cache)).unwrap(), b"persisted two");
    }

    #[test]
    fn test_budget_evicts_lru_clean_chunks() {
        let mut cache = fresh_cache();
        // Budget of ~2 chunks of 64 bytes.
        let mut arena = ChunkedStorage::new(BlockType::TextData, 64, 128);
        let mut addrs = Vec::new();
        for i in 0..6u8 {
            addrs.push(
                arena
                    .alloc_record(i as u32 + 1, 0, &[i; 30], Some(&mut cache))
                    .unwrap(),
            );
        }
        assert!(arena.loaded_bytes <= 128 + 64);
        // Everything is still reachable, paging back in as needed.
        for (i, addr) in addrs.iter().enumerate() {
            assert_eq!(
                arena.get(*addr, Some(&mut cache)).unwrap(),
                &[i as u8; 30][..]
            );
        }
    }

    #[test]
    fn test_fixed_storage_get_set() {
        let mut arena = FixedStorage::new(BlockType::RectData, 48, RECT_CHUNK_SIZE, 1 << 20);
        let mut rec = [0u8; 48];
        // Unwritten records read back zeroed.
        arena.get(5, &mut rec, None).unwrap();
        assert_eq!(rec, [0u8; 48]);
        let data = [9u8; 48];
        arena.set(5, &data, None).unwrap();
        arena.get(5, &mut rec, None).unwrap();
        assert_eq!(rec, data);
        // Neighbouring record untouched.
        arena.get(6, &mut rec, None).unwrap();
        assert_eq!(rec, [0u8; 48]);
    }

    #[test]
    fn test_fixed_storage_save_load() {
        let mut cache = fresh_cache();
        let mut arena = FixedStorage::new(BlockType::ElemStyleData, 4, STYLE_CHUNK_SIZE, 1 << 20);
        arena.set(0, &[1, 0, 2, 0], Some(&mut cache)).unwrap();
        arena.set(100, &[3, 0, 4, 0], Some(&mut cache)).unwrap();
        arena.save(&mut cache, Deadline::none()).unwrap();

        let mut arena2 = FixedStorage::new(BlockType::ElemStyleData, 4, STYLE_CHUNK_SIZE, 1 << 20);
        arena2.load(&mut cache).unwrap();
        let mut rec = [0u8; 4];
        arena2.get(100, &mut rec, Some(&mut cache)).unwrap();
        assert_eq!(rec, [3, 0, 4, 0]);
    }

    #[test]
    fn test_unloaded_chunk_without_cache_errors() {
        let mut cache = fresh_cache();
        let mut arena = ChunkedStorage::new(BlockType::TextData, 64, 1 << 20);
        let a = arena.alloc_record(1, 0, b"bytes", None).unwrap();
        arena.save(&mut cache, Deadline::none()).unwrap();
        let mut arena2 = ChunkedStorage::new(BlockType::TextData, 64, 1 << 20);
        arena2.load(&mut cache).unwrap();
        assert!(arena2.get(a, None).is_err());
    }
}
