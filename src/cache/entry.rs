//! Block index entries: the 48-byte records describing every block in
//! the cache file.

use crate::error::{Error, Result};
use crate::serial::{SerialReader, SerialWriter};

/// Magic value carried by every index entry.
pub const BLOCK_ENTRY_MAGIC: u32 = 0xC007_B00C;

/// Serialized size of a [`BlockEntry`].
pub const BLOCK_ENTRY_SIZE: usize = 48;

/// Allocation granularity: every block starts on a sector boundary and
/// spans a whole number of sectors.
pub const SECTOR_SIZE: u32 = 1024;

/// Typed identity of a cache block. A block is addressed by
/// `(BlockType, data_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BlockType {
    Free = 0,
    Index = 1,
    TextData = 2,
    ElemData = 3,
    RectData = 4,
    ElemStyleData = 5,
    MapsData = 6,
    PageData = 7,
    PropData = 8,
    NodeIndex = 9,
    ElemNode = 10,
    TextNode = 11,
    RendParams = 12,
    TocData = 13,
    PageMapData = 14,
    StyleData = 15,
    BlobIndex = 16,
    BlobData = 17,
    FontData = 18,
}

impl BlockType {
    pub fn from_u16(v: u16) -> Option<Self> {
        use BlockType::*;
        Some(match v {
            0 => Free,
            1 => Index,
            2 => TextData,
            3 => ElemData,
            4 => RectData,
            5 => ElemStyleData,
            6 => MapsData,
            7 => PageData,
            8 => PropData,
            9 => NodeIndex,
            10 => ElemNode,
            11 => TextNode,
            12 => RendParams,
            13 => TocData,
            14 => PageMapData,
            15 => StyleData,
            16 => BlobIndex,
            17 => BlobData,
            18 => FontData,
            _ => return None,
        })
    }
}

/// One block's index record.
///
/// `block_size` is sector-aligned and never shrinks; `data_size` is the
/// live byte count inside it. `uncompressed_size == 0` means the block
/// is stored uncompressed. The trailing padding field exists only so the
/// serialized record is exactly 48 bytes of defined content, keeping
/// re-saved files byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub data_type: u16,
    pub data_index: u16,
    pub block_index: i32,
    pub block_file_pos: i32,
    pub block_size: i32,
    pub data_size: i32,
    pub data_hash: u64,
    pub packed_hash: u64,
    pub uncompressed_size: u32,
}

impl BlockEntry {
    pub fn new(data_type: u16, data_index: u16) -> Self {
        Self {
            data_type,
            data_index,
            block_index: 0,
            block_file_pos: 0,
            block_size: 0,
            data_size: 0,
            data_hash: 0,
            packed_hash: 0,
            uncompressed_size: 0,
        }
    }

    /// Key for the `(type << 16) | index` block map.
    pub fn key(&self) -> u32 {
        block_key(self.data_type, self.data_index)
    }

    pub fn is_free(&self) -> bool {
        self.data_type == BlockType::Free as u16 && self.data_index == 0
    }

    pub fn is_index(&self) -> bool {
        self.data_type == BlockType::Index as u16
    }

    pub fn is_compressed(&self) -> bool {
        self.uncompressed_size != 0
    }

    /// End of the block's sector range.
    pub fn block_end(&self) -> i32 {
        self.block_file_pos + self.block_size
    }

    pub fn encode(&self, w: &mut SerialWriter) {
        w.put_u32(BLOCK_ENTRY_MAGIC);
        w.put_u16(self.data_type);
        w.put_u16(self.data_index);
        w.put_i32(self.block_index);
        w.put_i32(self.block_file_pos);
        w.put_i32(self.block_size);
        w.put_i32(self.data_size);
        w.put_u64(self.data_hash);
        w.put_u64(self.packed_hash);
        w.put_u32(self.uncompressed_size);
        w.put_u32(0); // explicit padding, always zero
    }

    pub fn decode(r: &mut SerialReader) -> Result<Self> {
        let magic = r.get_u32()?;
        if magic != BLOCK_ENTRY_MAGIC {
            return Err(Error::Corrupted(format!(
                "block entry magic {magic:#010x} doesn't match"
            )));
        }
        let entry = Self {
            data_type: r.get_u16()?,
            data_index: r.get_u16()?,
            block_index: r.get_i32()?,
            block_file_pos: r.get_i32()?,
            block_size: r.get_i32()?,
            data_size: r.get_i32()?,
            data_hash: r.get_u64()?,
            packed_hash: r.get_u64()?,
            uncompressed_size: r.get_u32()?,
        };
        let _padding = r.get_u32()?;
        Ok(entry)
    }

    /// Structural validity against the current file size.
    pub fn validate(&self, file_size: i32) -> Result<()> {
        if self.data_size > self.block_size || self.block_size < 0 || self.data_size < 0 {
            return Err(Error::Corrupted(format!(
                "block {}:{} has invalid sizes (data {} in block {})",
                self.data_type, self.data_index, self.data_size, self.block_size
            )));
        }
        if self.block_file_pos < SECTOR_SIZE as i32
            || self.block_file_pos + self.data_size > file_size
        {
            return Err(Error::Corrupted(format!(
                "block {}:{} has invalid position {}",
                self.data_type, self.data_index, self.block_file_pos
            )));
        }
        Ok(())
    }
}

pub fn block_key(data_type: u16, data_index: u16) -> u32 {
    ((data_type as u32) << 16) | data_index as u32
}

/// Rounds a byte count up to the sector boundary.
pub fn round_sector(n: u32) -> u32 {
    (n + (SECTOR_SIZE - 1)) & !(SECTOR_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_round_trip_is_48_bytes() {
        let mut e = BlockEntry::new(BlockType::TextData as u16, 7);
        e.block_index = 3;
        e.block_file_pos = 4096;
        e.block_size = 2048;
        e.data_size = 1500;
        e.data_hash = 0xDEAD_BEEF_0000_0001;
        e.packed_hash = 0xFEED_FACE_0000_0002;
        e.uncompressed_size = 3000;

        let mut w = SerialWriter::new();
        e.encode(&mut w);
        assert_eq!(w.len(), BLOCK_ENTRY_SIZE);

        let bytes = w.into_vec();
        let mut r = SerialReader::new(&bytes);
        let back = BlockEntry::decode(&mut r).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let bytes = [0u8; BLOCK_ENTRY_SIZE];
        let mut r = SerialReader::new(&bytes);
        assert!(matches!(
            BlockEntry::decode(&mut r),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_validate_checks_position_and_sizes() {
        let mut e = BlockEntry::new(2, 0);
        e.block_file_pos = 1024;
        e.block_size = 1024;
        e.data_size = 2048; // data larger than block
        assert!(e.validate(1 << 20).is_err());

        e.data_size = 100;
        e.block_file_pos = 0; // inside the header sector
        assert!(e.validate(1 << 20).is_err());

        e.block_file_pos = 1024;
        assert!(e.validate(1 << 20).is_ok());
    }

    #[test]
    fn test_round_sector() {
        assert_eq!(round_sector(0), 0);
        assert_eq!(round_sector(1), 1024);
        assert_eq!(round_sector(1024), 1024);
        assert_eq!(round_sector(1025), 2048);
    }
}
