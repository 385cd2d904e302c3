//! Paged, compressed, CRC-validated cache file.
//!
//! A cache file is a single stream split into 1 KiB sectors. Each block
//! is a contiguous run of sectors addressed by `(BlockType, index)`; the
//! index block lists them all, and a 48-byte copy of its entry in the
//! header bootstraps the lookup. Any hash or structure violation rejects
//! the whole file, and the document falls back to re-parsing the source.

mod codec;
mod entry;
mod file;
mod header;

pub use codec::Codec;
pub use entry::{block_key, round_sector, BlockEntry, BlockType, BLOCK_ENTRY_SIZE, SECTOR_SIZE};
pub use file::{CacheFile, CacheStats};
pub use header::{Compression, FileHeader, HEADER_SIZE};
