//! The cache file proper: a sector-granular container of typed,
//! CRC-validated, optionally compressed blocks.

use std::collections::HashMap;

use xxhash_rust::xxh32::xxh32;

use crate::cache::codec::Codec;
use crate::cache::entry::{
    block_key, round_sector, BlockEntry, BlockType, BLOCK_ENTRY_SIZE, SECTOR_SIZE,
};
use crate::cache::header::{Compression, FileHeader, HEADER_SIZE};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::io::{BlockSlice, CacheStream};
use crate::serial::{SerialReader, SerialWriter};

/// Hash used for both the logical and the on-disk bytes of every block.
fn calc_hash(data: &[u8]) -> u64 {
    xxh32(data, 0) as u64
}

/// A paged cache file over a random-access stream.
///
/// Blocks are identified by `(BlockType, data_index)`. The index block
/// lists every block; a copy of its entry lives in the header so the
/// index can be found without scanning.
pub struct CacheFile {
    stream: Box<dyn CacheStream>,
    /// Logical file size in sector units; the stream may lag behind until
    /// block tails are padded.
    size: u32,
    dirty: bool,
    index_changed: bool,
    dom_version: u32,
    codec: Codec,
    /// Every block ever allocated, in `block_index` order. Entries are
    /// never removed; freed ones are retagged `Free` and listed in `free`.
    index: Vec<BlockEntry>,
    /// Positions in `index` of free blocks available for reuse.
    free: Vec<usize>,
    /// `(type << 16 | index)` → position in `index`, live blocks only.
    map: HashMap<u32, usize>,
    /// Re-hash every block at open time.
    validate_contents: bool,
}

impl CacheFile {
    pub fn new(dom_version: u32, compression: Compression) -> Self {
        Self {
            stream: Box::new(crate::io::MemStream::new()),
            size: 0,
            dirty: true,
            index_changed: false,
            dom_version,
            codec: Codec::new(compression),
            index: Vec::new(),
            free: Vec::new(),
            map: HashMap::new(),
            validate_contents: true,
        }
    }

    /// Disables the open-time re-hash of every block (mainly for huge
    /// caches on slow media; per-read hash checks still apply).
    pub fn set_contents_validation(&mut self, enable: bool) {
        self.validate_contents = enable;
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn dom_version(&self) -> u32 {
        self.dom_version
    }

    pub fn compression(&self) -> Compression {
        self.codec.flavour()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Opens an existing cache file, validating header, index and
    /// (optionally) the hash of every block.
    pub fn open(&mut self, stream: Box<dyn CacheStream>) -> Result<()> {
        self.stream = stream;
        self.size = self.stream.len() as u32;
        self.read_index()?;
        if self.validate_contents {
            self.validate_all_blocks()?;
        }
        Ok(())
    }

    /// Creates a fresh cache file: a zeroed first sector holding a header
    /// with the dirty flag set. The flag only clears on a successful
    /// `flush(clear_dirty = true)`.
    pub fn create(&mut self, stream: Box<dyn CacheStream>) -> Result<()> {
        self.stream = stream;
        self.dirty = true;
        self.size = SECTOR_SIZE;
        self.index.clear();
        self.free.clear();
        self.map.clear();
        self.stream.write_at(0, &vec![0u8; SECTOR_SIZE as usize])?;
        self.update_header()?;
        Ok(())
    }

    fn read_index(&mut self) -> Result<()> {
        let raw = self
            .stream
            .read_vec(0, HEADER_SIZE)
            .map_err(|_| Error::Corrupted("cannot read header sector".into()))?;
        let hdr = FileHeader::decode(&raw)?;
        log::info!(
            "cache header: dirty={} dom_version={} compression={:?}",
            hdr.dirty,
            hdr.dom_version,
            hdr.compression
        );
        hdr.validate(self.dom_version, self.codec.flavour())?;
        if hdr.file_size > self.size + 4096 - 1 {
            return Err(Error::Corrupted(format!(
                "file size {} doesn't match header {}",
                self.size, hdr.file_size
            )));
        }
        if hdr.index_block.block_file_pos == 0 {
            return Ok(()); // empty index is ok
        }
        let idx = &hdr.index_block;
        if idx.block_file_pos as u32 >= hdr.file_size
            || (idx.block_file_pos + idx.block_size) as u32 > hdr.file_size + 4096 - 1
        {
            return Err(Error::Corrupted("index block position out of range".into()));
        }
        let count = idx.data_size as usize / BLOCK_ENTRY_SIZE;
        if count > 100_000 {
            return Err(Error::Corrupted(format!(
                "implausible block count {count} in index"
            )));
        }
        let raw = self
            .stream
            .read_vec(idx.block_file_pos as u64, idx.data_size as usize)?;
        if calc_hash(&raw) != idx.data_hash {
            return Err(Error::Corrupted("index block hash doesn't match".into()));
        }
        let mut reader = SerialReader::new(&raw);
        for _ in 0..count {
            let mut entry = BlockEntry::decode(&mut reader)?;
            if entry.is_index() {
                // The serialized self-entry has its hashes zeroed; the
                // authoritative copy is the one in the header.
                entry = hdr.index_block;
            }
            entry.validate(self.size as i32)?;
            let pos = self.index.len();
            self.index.push(entry);
            if entry.is_free() {
                self.free.push(pos);
            } else {
                self.map.insert(entry.key(), pos);
            }
        }
        if self.find_block(BlockType::Index as u16, 0).is_none() {
            return Err(Error::Corrupted(
                "index block entry missing from index".into(),
            ));
        }
        self.dirty = hdr.dirty != 0;
        Ok(())
    }

    /// Re-reads every non-index block and verifies its on-disk hash.
    fn validate_all_blocks(&self) -> Result<()> {
        log::info!("validating cache file contents");
        for entry in &self.index {
            if entry.is_index() || entry.is_free() {
                continue;
            }
            self.validate_block(entry)?;
        }
        Ok(())
    }

    fn validate_block(&self, entry: &BlockEntry) -> Result<()> {
        let raw = self
            .stream
            .read_vec(entry.block_file_pos as u64, entry.data_size as usize)?;
        if calc_hash(&raw) != entry.packed_hash {
            log::error!(
                "packed data hash mismatch for block {}:{}",
                entry.data_type,
                entry.data_index
            );
            return Err(Error::Corrupted(format!(
                "packed hash mismatch for block {}:{}",
                entry.data_type, entry.data_index
            )));
        }
        Ok(())
    }

    fn find_block(&self, data_type: u16, data_index: u16) -> Option<usize> {
        self.map.get(&block_key(data_type, data_index)).copied()
    }

    pub fn has_block(&self, data_type: BlockType, data_index: u16) -> bool {
        self.find_block(data_type as u16, data_index).is_some()
    }

    fn free_block(&mut self, pos: usize) {
        let entry = &mut self.index[pos];
        self.map.remove(&entry.key());
        entry.data_type = BlockType::Free as u16;
        entry.data_index = 0;
        entry.data_size = 0;
        self.free.push(pos);
    }

    /// Finds or allocates a block for `(type, index)` able to hold `size`
    /// bytes: reuse in place, else best-fit from the free list, else
    /// append at end of file.
    fn alloc_block(&mut self, data_type: u16, data_index: u16, size: i32) -> usize {
        if let Some(pos) = self.find_block(data_type, data_index) {
            if self.index[pos].block_size >= size {
                if self.index[pos].data_size != size {
                    self.index[pos].data_size = size;
                    self.index_changed = true;
                }
                return pos;
            }
            // Existing block too small: release it for later reuse.
            self.free_block(pos);
        }
        // Best fit among free blocks.
        let mut best: Option<usize> = None;
        for &pos in &self.free {
            let bs = self.index[pos].block_size;
            if bs >= size && best.is_none_or(|b| bs < self.index[b].block_size) {
                best = Some(pos);
            }
        }
        if let Some(pos) = best {
            self.free.retain(|&p| p != pos);
            let entry = &mut self.index[pos];
            entry.data_type = data_type;
            entry.data_index = data_index;
            entry.data_size = size;
            self.map.insert(entry.key(), pos);
            self.index_changed = true;
            return pos;
        }
        // Append a new block at the end of the file.
        let mut entry = BlockEntry::new(data_type, data_index);
        entry.block_size = round_sector(size as u32) as i32;
        entry.data_size = size;
        entry.block_index = self.index.len() as i32;
        entry.block_file_pos = self.size as i32;
        self.size += entry.block_size as u32;
        let pos = self.index.len();
        self.map.insert(entry.key(), pos);
        self.index.push(entry);
        self.index_changed = true;
        pos
    }

    /// Reads a block's logical bytes, decompressing and hash-checking.
    pub fn read(&mut self, data_type: BlockType, data_index: u16) -> Result<Vec<u8>> {
        let pos = self
            .find_block(data_type as u16, data_index)
            .ok_or(Error::NotFound(data_type as u16, data_index))?;
        let entry = self.index[pos];
        let mut data = self
            .stream
            .read_vec(entry.block_file_pos as u64, entry.data_size as usize)?;
        if entry.is_compressed() {
            if calc_hash(&data) != entry.packed_hash {
                return Err(Error::Corrupted(format!(
                    "packed hash mismatch for block {}:{}",
                    entry.data_type, entry.data_index
                )));
            }
            data = self
                .codec
                .unpack(&data, entry.uncompressed_size as usize)?;
        }
        if calc_hash(&data) != entry.data_hash {
            return Err(Error::Corrupted(format!(
                "data hash mismatch for block {}:{}",
                entry.data_type, entry.data_index
            )));
        }
        Ok(data)
    }

    /// Writes a block, optionally compressed. A write whose logical bytes
    /// match the stored hash is a no-op, which is what keeps unmodified
    /// re-saves byte-identical.
    pub fn write(
        &mut self,
        data_type: BlockType,
        data_index: u16,
        data: &[u8],
        compress: bool,
    ) -> Result<()> {
        self.write_raw(data_type as u16, data_index, data, compress)
    }

    fn write_raw(
        &mut self,
        data_type: u16,
        data_index: u16,
        data: &[u8],
        compress: bool,
    ) -> Result<()> {
        let new_hash = calc_hash(data);
        if let Some(pos) = self.find_block(data_type, data_index) {
            let existing = &self.index[pos];
            let same_size = existing.uncompressed_size as usize == data.len()
                || (existing.uncompressed_size == 0 && existing.data_size as usize == data.len());
            if same_size && existing.data_hash == new_hash {
                return Ok(());
            }
        }
        self.set_dirty(true)?;

        let mut uncompressed_size = 0u32;
        let mut packed_hash = new_hash;
        let mut stored: &[u8] = data;
        let packed;
        if compress {
            if let Some(p) = self.codec.pack(data)? {
                uncompressed_size = data.len() as u32;
                packed = p;
                stored = &packed;
                packed_hash = calc_hash(stored);
            }
        }

        let pos = self.alloc_block(data_type, data_index, stored.len() as i32);
        let entry = self.index[pos];
        self.stream.write_at(entry.block_file_pos as u64, stored)?;
        // Pad the block tail so files with identical content are
        // byte-identical no matter what occupied the sectors before.
        let padding = entry.block_size as usize - stored.len();
        if padding > 0 {
            self.stream.write_at(
                (entry.block_file_pos as u64) + stored.len() as u64,
                &vec![0xFFu8; padding],
            )?;
        }
        let entry = &mut self.index[pos];
        entry.data_hash = new_hash;
        entry.packed_hash = packed_hash;
        entry.uncompressed_size = uncompressed_size;
        self.index_changed = true;
        Ok(())
    }

    /// A zero-copy byte-range view over a block's stored bytes. Only
    /// meaningful for uncompressed blocks (BLOBs are written that way).
    pub fn read_stream(&self, data_type: BlockType, data_index: u16) -> Option<BlockSlice<'_>> {
        let pos = self.find_block(data_type as u16, data_index)?;
        let entry = &self.index[pos];
        if entry.data_size == 0 || entry.is_compressed() {
            return None;
        }
        Some(BlockSlice::new(
            &*self.stream,
            entry.block_file_pos as u64,
            entry.data_size as u64,
        ))
    }

    /// Serializes the block index and rewrites the header.
    fn write_index(&mut self) -> Result<()> {
        if !self.index_changed {
            return Ok(());
        }
        if self.index.is_empty() {
            self.update_header()?;
            return Ok(());
        }
        if self.find_block(BlockType::Index as u16, 0).is_none() {
            // First index write: reserve room for the index growing as
            // later saves add blocks, so it rarely relocates.
            let sz = (BLOCK_ENTRY_SIZE * (self.index.len() * 2 + 100)) as i32;
            self.alloc_block(BlockType::Index as u16, 0, sz);
        }
        let count = self.index.len();
        let mut w = SerialWriter::with_capacity(count * BLOCK_ENTRY_SIZE);
        for entry in &self.index {
            let mut copy = *entry;
            if copy.is_index() {
                // The self-entry's hashes and size are not knowable while
                // serializing; zero them for reproducible output.
                copy.data_hash = 0;
                copy.packed_hash = 0;
                copy.data_size = 0;
            }
            copy.encode(&mut w);
        }
        let bytes = w.into_vec();
        self.write_raw(BlockType::Index as u16, 0, &bytes, false)?;
        self.update_header()?;
        self.index_changed = false;
        Ok(())
    }

    fn update_header(&mut self) -> Result<()> {
        let mut hdr = FileHeader::new(self.codec.flavour(), self.dirty, self.dom_version);
        hdr.file_size = self.size;
        if let Some(pos) = self.find_block(BlockType::Index as u16, 0) {
            hdr.index_block = self.index[pos];
        }
        self.stream.write_at(0, &hdr.encode())?;
        Ok(())
    }

    /// Sets the dirty flag, rewriting the header prefix when it changes.
    /// Clearing the flag syncs data first so the clean mark never lands
    /// before the blocks it vouches for.
    pub fn set_dirty(&mut self, dirty: bool) -> Result<()> {
        if self.dirty == dirty {
            return Ok(());
        }
        if !dirty {
            log::info!("clearing cache dirty flag");
            self.stream.flush(true)?;
        } else {
            log::info!("setting cache dirty flag");
        }
        self.dirty = dirty;
        let hdr = FileHeader::new(self.codec.flavour(), self.dirty, self.dom_version);
        self.stream.write_at(0, &hdr.encode_simple())?;
        self.stream.flush(true)?;
        Ok(())
    }

    /// Bumps the DOM version stored in the header (used when a document
    /// is migrated without rebuilding its cache).
    pub fn set_dom_version(&mut self, dom_version: u32) -> Result<()> {
        if self.dom_version == dom_version {
            return Ok(());
        }
        self.dom_version = dom_version;
        let hdr = FileHeader::new(self.codec.flavour(), self.dirty, self.dom_version);
        self.stream.write_at(0, &hdr.encode_simple())?;
        self.stream.flush(true)?;
        Ok(())
    }

    /// Flushes the index; with `clear_dirty`, also rewrites the header
    /// with `dirty = 0` and syncs. Intermediate saves pass `false` to
    /// bound data loss without certifying the file as complete.
    pub fn flush(&mut self, clear_dirty: bool, _deadline: Deadline) -> Result<()> {
        if clear_dirty {
            self.write_index()?;
            self.set_dirty(false)?;
        } else {
            self.stream.flush(false)?;
        }
        Ok(())
    }

    /// Drops the lazily-created compression context (end of a save).
    pub fn cleanup_compressor(&mut self) {
        self.codec.drop_compressor();
    }

    /// Drops the lazily-created decompression context (end of a load).
    pub fn cleanup_decompressor(&mut self) {
        self.codec.drop_decompressor();
    }

    /// Consumes the cache file, returning the underlying stream (tests
    /// use this to inspect or corrupt the raw bytes).
    pub fn into_stream(self) -> Box<dyn CacheStream> {
        self.stream
    }

    /// Allocation accounting, used to verify the no-leak invariant:
    /// every block is either live (reachable through the map) or on the
    /// free list, and the file size is exactly one header sector plus
    /// all block extents.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            live_blocks: self.map.len(),
            free_blocks: self.free.len(),
            block_bytes: self.index.iter().map(|e| e.block_size as u64).sum(),
            file_size: self.size as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub live_blocks: usize,
    pub free_blocks: usize,
    /// Sum of every block's sector-aligned extent, live and free.
    pub block_bytes: u64,
    pub file_size: u64,
}
