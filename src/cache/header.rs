//! Cache file header: the first sector of the file.
//!
//! The 40-byte magic banner doubles as the compression-type selector, so
//! a build without a given codec rejects such files at the magic check.

use crate::cache::entry::{BlockEntry, BLOCK_ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::serial::{SerialReader, SerialWriter};

pub const MAGIC_SIZE: usize = 40;

const MAGIC_NONE: &[u8] = b"CoolReader 3 Cache File v3.05.42: c0m0\n";
const MAGIC_ZLIB: &[u8] = b"CoolReader 3 Cache File v3.05.42: c0m1\n";
const MAGIC_ZSTD: &[u8] = b"CoolReader 3 Cache File v3.05.42: c0mS\n";

/// Per-block compression flavour of a cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Zstd,
}

/// zstd when compiled in, zlib otherwise (the original engine's
/// preference order).
impl Default for Compression {
    fn default() -> Self {
        if cfg!(feature = "zstd-codec") {
            Compression::Zstd
        } else {
            Compression::Zlib
        }
    }
}

impl Compression {
    fn magic(self) -> &'static [u8] {
        match self {
            Compression::None => MAGIC_NONE,
            Compression::Zlib => MAGIC_ZLIB,
            Compression::Zstd => MAGIC_ZSTD,
        }
    }

    fn from_magic(banner: &[u8]) -> Option<Self> {
        let compare = |magic: &[u8]| banner[..magic.len()] == *magic;
        if compare(MAGIC_ZSTD) {
            Some(Compression::Zstd)
        } else if compare(MAGIC_ZLIB) {
            Some(Compression::Zlib)
        } else if compare(MAGIC_NONE) {
            Some(Compression::None)
        } else {
            None
        }
    }
}

/// Serialized size of the full header (banner + dirty + dom_version +
/// file_size + padding + inlined index entry).
pub const HEADER_SIZE: usize = MAGIC_SIZE + 4 * 4 + BLOCK_ENTRY_SIZE;

/// The leading fields of the header, rewritten alone whenever only the
/// dirty flag or DOM version changes.
pub const SIMPLE_HEADER_SIZE: usize = MAGIC_SIZE + 4 + 4;

/// Full first-sector header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub compression: Compression,
    pub dirty: u32,
    pub dom_version: u32,
    pub file_size: u32,
    /// Copy of the INDEX block's entry so the index can be located
    /// without reading anything else.
    pub index_block: BlockEntry,
}

impl FileHeader {
    pub fn new(compression: Compression, dirty: bool, dom_version: u32) -> Self {
        Self {
            compression,
            dirty: dirty as u32,
            dom_version,
            file_size: 0,
            index_block: BlockEntry::new(0, 0),
        }
    }

    /// Serializes just the banner + dirty + dom_version prefix, used for
    /// cheap in-place dirty-flag updates.
    pub fn encode_simple(&self) -> Vec<u8> {
        let mut w = SerialWriter::with_capacity(SIMPLE_HEADER_SIZE);
        self.put_banner(&mut w);
        w.put_u32(self.dirty);
        w.put_u32(self.dom_version);
        w.into_vec()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = SerialWriter::with_capacity(HEADER_SIZE);
        self.put_banner(&mut w);
        w.put_u32(self.dirty);
        w.put_u32(self.dom_version);
        w.put_u32(self.file_size);
        w.put_u32(0); // alignment padding, zero for reproducible files
        self.index_block.encode(&mut w);
        w.into_vec()
    }

    fn put_banner(&self, w: &mut SerialWriter) {
        let magic = self.compression.magic();
        w.put_bytes(magic);
        for _ in magic.len()..MAGIC_SIZE {
            w.put_u8(0);
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Corrupted("header truncated".into()));
        }
        let mut r = SerialReader::new(bytes);
        let banner = r.get_bytes(MAGIC_SIZE)?;
        let compression = Compression::from_magic(banner)
            .ok_or_else(|| Error::Corrupted("header magic doesn't match".into()))?;
        let dirty = r.get_u32()?;
        let dom_version = r.get_u32()?;
        let file_size = r.get_u32()?;
        let _padding = r.get_u32()?;
        let index_block = if bytes[MAGIC_SIZE + 16..MAGIC_SIZE + 16 + BLOCK_ENTRY_SIZE]
            .iter()
            .all(|&b| b == 0)
        {
            // Freshly created file: no index written yet.
            BlockEntry::new(0, 0)
        } else {
            BlockEntry::decode(&mut r)?
        };
        Ok(Self {
            compression,
            dirty,
            dom_version,
            file_size,
            index_block,
        })
    }

    /// Open-time validation against the caller's expectations.
    pub fn validate(&self, dom_version: u32, compression: Compression) -> Result<()> {
        if self.dirty != 0 {
            log::warn!("ignoring cache file: marked dirty");
            return Err(Error::Dirty);
        }
        if self.dom_version != dom_version {
            log::info!(
                "ignoring cache file: DOM version {} != requested {}",
                self.dom_version,
                dom_version
            );
            return Err(Error::VersionMismatch(format!(
                "dom version {} != {}",
                self.dom_version, dom_version
            )));
        }
        if self.compression != compression {
            return Err(Error::VersionMismatch(format!(
                "compression {:?} != {:?}",
                self.compression, compression
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut hdr = FileHeader::new(Compression::Zstd, false, 20200824);
        hdr.file_size = 10240;
        hdr.index_block = BlockEntry::new(1, 0);
        hdr.index_block.block_file_pos = 2048;
        hdr.index_block.block_size = 1024;
        hdr.index_block.data_size = 96;

        let bytes = hdr.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let back = FileHeader::decode(&bytes).unwrap();
        assert_eq!(back.compression, Compression::Zstd);
        assert_eq!(back.dom_version, 20200824);
        assert_eq!(back.file_size, 10240);
        assert_eq!(back.index_block, hdr.index_block);
    }

    #[test]
    fn test_magic_selects_compression() {
        for comp in [Compression::None, Compression::Zlib, Compression::Zstd] {
            let hdr = FileHeader::new(comp, false, 1);
            let back = FileHeader::decode(&hdr.encode()).unwrap();
            assert_eq!(back.compression, comp);
        }
    }

    #[test]
    fn test_validate_rejects_dirty_and_mismatches() {
        let hdr = FileHeader::new(Compression::None, true, 1);
        let bytes = hdr.encode();
        let back = FileHeader::decode(&bytes).unwrap();
        assert!(matches!(
            back.validate(1, Compression::None),
            Err(Error::Dirty)
        ));

        let clean = FileHeader::new(Compression::None, false, 1);
        let back = FileHeader::decode(&clean.encode()).unwrap();
        assert!(matches!(
            back.validate(2, Compression::None),
            Err(Error::VersionMismatch(_))
        ));
        assert!(matches!(
            back.validate(1, Compression::Zlib),
            Err(Error::VersionMismatch(_))
        ));
        assert!(back.validate(1, Compression::None).is_ok());
    }

    #[test]
    fn test_unknown_banner_is_corrupted() {
        let mut bytes = FileHeader::new(Compression::None, false, 1).encode();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::decode(&bytes),
            Err(Error::Corrupted(_))
        ));
    }
}
