//! Named BLOB store for embedded binaries (cover images, fonts,
//! FB2 `<binary>` payloads).
//!
//! Blobs live in memory until a cache file is attached; from then on
//! each blob occupies one uncompressed `BlobData` block so readers can
//! stream it straight off the file, and the `BlobIndex` block maps
//! names to block indexes.

use base64::Engine;
use bstr::ByteSlice;

use crate::cache::{BlockType, CacheFile};
use crate::error::{Error, Result};
use crate::io::BlockSlice;
use crate::serial::{SerialReader, SerialWriter};

enum BlobData {
    /// Held in memory, not yet spilled to the cache file.
    Resident(Vec<u8>),
    /// Stored as `(BlobData, index)` in the cache file.
    Cached { index: u16, size: u32 },
}

struct BlobItem {
    name: String,
    data: BlobData,
}

#[derive(Default)]
pub struct BlobCache {
    items: Vec<BlobItem>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|b| b.name.as_str())
    }

    /// Registers a blob; an existing blob of the same name is replaced.
    pub fn add(&mut self, name: &str, data: Vec<u8>) {
        if let Some(item) = self.items.iter_mut().find(|b| b.name == name) {
            item.data = BlobData::Resident(data);
        } else {
            self.items.push(BlobItem {
                name: name.to_string(),
                data: BlobData::Resident(data),
            });
        }
    }

    /// Decodes and registers a base64 payload (FB2 `<binary>` content,
    /// `data:` URI bodies). Whitespace is stripped first; a bad payload
    /// is rejected rather than stored truncated.
    pub fn add_base64(&mut self, name: &str, payload: &str) -> Result<()> {
        let compact: Vec<u8> = payload
            .as_bytes()
            .fields()
            .flat_map(|chunk| chunk.iter().copied())
            .collect();
        let data = base64::engine::general_purpose::STANDARD
            .decode(&compact)
            .map_err(|e| Error::Corrupted(format!("bad base64 blob '{name}': {e}")))?;
        self.add(name, data);
        Ok(())
    }

    /// Fetches a blob's bytes, reading from the cache file when the
    /// blob has been spilled.
    pub fn get(&self, name: &str, cache: Option<&mut CacheFile>) -> Result<Option<Vec<u8>>> {
        let Some(item) = self.items.iter().find(|b| b.name == name) else {
            return Ok(None);
        };
        match &item.data {
            BlobData::Resident(bytes) => Ok(Some(bytes.clone())),
            BlobData::Cached { index, .. } => {
                let cache = cache.ok_or_else(|| {
                    Error::Corrupted(format!("blob '{name}' is cached but no cache attached"))
                })?;
                cache.read(BlockType::BlobData, *index).map(Some)
            }
        }
    }

    /// A zero-copy stream over a cached blob (resident blobs return
    /// `None`; use [`BlobCache::get`]).
    pub fn stream<'a>(&self, name: &str, cache: &'a CacheFile) -> Option<BlockSlice<'a>> {
        let item = self.items.iter().find(|b| b.name == name)?;
        match &item.data {
            BlobData::Cached { index, .. } => cache.read_stream(BlockType::BlobData, *index),
            BlobData::Resident(_) => None,
        }
    }

    /// Spills resident blobs into `BlobData` blocks and rewrites the
    /// `BlobIndex`. Blob blocks are stored uncompressed so they can be
    /// served as byte-range streams.
    pub fn save(&mut self, cache: &mut CacheFile) -> Result<()> {
        // Assign indexes in insertion order so re-saves are stable.
        for (i, item) in self.items.iter_mut().enumerate() {
            let index = i as u16;
            if let BlobData::Resident(bytes) = &item.data {
                cache.write(BlockType::BlobData, index, bytes, false)?;
                item.data = BlobData::Cached {
                    index,
                    size: bytes.len() as u32,
                };
            }
        }
        let mut w = SerialWriter::new();
        w.put_u32(self.items.len() as u32);
        for (i, item) in self.items.iter().enumerate() {
            w.put_str(&item.name);
            w.put_u16(i as u16);
            let size = match &item.data {
                BlobData::Cached { size, .. } => *size,
                BlobData::Resident(bytes) => bytes.len() as u32,
            };
            w.put_u32(size);
        }
        cache.write(BlockType::BlobIndex, 0, w.as_slice(), false)?;
        Ok(())
    }

    /// Rebuilds the name table from the `BlobIndex` block; an absent
    /// index just means the document has no blobs.
    pub fn load(&mut self, cache: &mut CacheFile) -> Result<()> {
        self.items.clear();
        let raw = match cache.read(BlockType::BlobIndex, 0) {
            Ok(raw) => raw,
            Err(Error::NotFound(..)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let mut r = SerialReader::new(&raw);
        let count = r.get_u32()? as usize;
        for _ in 0..count {
            let name = r.get_string()?;
            let index = r.get_u16()?;
            let size = r.get_u32()?;
            self.items.push(BlobItem {
                name,
                data: BlobData::Cached { index, size },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Compression;
    use crate::deadline::Deadline;
    use crate::io::MemStream;

    fn fresh_cache() -> CacheFile {
        let mut cf = CacheFile::new(1, Compression::None);
        cf.create(Box::new(MemStream::new())).unwrap();
        cf
    }

    #[test]
    fn test_resident_blob_round_trip() {
        let mut blobs = BlobCache::new();
        blobs.add("cover.jpg", vec![1, 2, 3]);
        assert_eq!(blobs.get("cover.jpg", None).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(blobs.get("missing", None).unwrap(), None);
    }

    #[test]
    fn test_base64_ingestion() {
        let mut blobs = BlobCache::new();
        blobs.add_base64("bin", "aGVs\n bG8=").unwrap();
        assert_eq!(blobs.get("bin", None).unwrap(), Some(b"hello".to_vec()));
        assert!(blobs.add_base64("bad", "!!!").is_err());
    }

    #[test]
    fn test_save_load_and_stream() {
        let mut cache = fresh_cache();
        let mut blobs = BlobCache::new();
        blobs.add("a", vec![7u8; 100]);
        blobs.add("b", b"stream me".to_vec());
        blobs.save(&mut cache).unwrap();
        cache.flush(true, Deadline::none()).unwrap();

        let mut blobs2 = BlobCache::new();
        blobs2.load(&mut cache).unwrap();
        assert_eq!(blobs2.len(), 2);
        assert_eq!(
            blobs2.get("a", Some(&mut cache)).unwrap(),
            Some(vec![7u8; 100])
        );
        let stream = blobs2.stream("b", &cache).unwrap();
        assert_eq!(stream.read_all().unwrap(), b"stream me");
    }

    #[test]
    fn test_replace_same_name() {
        let mut blobs = BlobCache::new();
        blobs.add("x", vec![1]);
        blobs.add("x", vec![2]);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.get("x", None).unwrap(), Some(vec![2]));
    }
}
