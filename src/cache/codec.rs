//! Per-block compression for the cache file.
//!
//! Codec contexts are expensive to set up, so they are created lazily on
//! first use and kept alive across calls; a whole save or load reuses one
//! context. [`Codec::drop_compressor`]/[`Codec::drop_decompressor`]
//! release them once the batch is over.

use flate2::{Compress, Compression as ZlibLevel, Decompress, FlushCompress, FlushDecompress};

use crate::cache::header::Compression;
use crate::error::{Error, Result};

/// zlib deflate level; kept modest since cache blocks are rewritten often.
const ZLIB_LEVEL: u32 = 1;

#[cfg(feature = "zstd-codec")]
const ZSTD_LEVEL: i32 = 3;

pub struct Codec {
    flavour: Compression,
    zlib_comp: Option<Compress>,
    zlib_decomp: Option<Decompress>,
    #[cfg(feature = "zstd-codec")]
    zstd_comp: Option<zstd::bulk::Compressor<'static>>,
    #[cfg(feature = "zstd-codec")]
    zstd_decomp: Option<zstd::bulk::Decompressor<'static>>,
}

impl Codec {
    pub fn new(flavour: Compression) -> Self {
        Self {
            flavour,
            zlib_comp: None,
            zlib_decomp: None,
            #[cfg(feature = "zstd-codec")]
            zstd_comp: None,
            #[cfg(feature = "zstd-codec")]
            zstd_decomp: None,
        }
    }

    pub fn flavour(&self) -> Compression {
        self.flavour
    }

    /// Compresses `data`. Returns `None` for the identity flavour, where
    /// the caller stores the block uncompressed.
    pub fn pack(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.flavour {
            Compression::None => Ok(None),
            Compression::Zlib => self.zlib_pack(data).map(Some),
            Compression::Zstd => self.zstd_pack(data).map(Some),
        }
    }

    /// Decompresses `data`, which must expand to exactly `unpacked_size`
    /// bytes (recorded in the block entry).
    pub fn unpack(&mut self, data: &[u8], unpacked_size: usize) -> Result<Vec<u8>> {
        let out = match self.flavour {
            Compression::None => {
                return Err(Error::Corrupted(
                    "compressed block in an uncompressed cache file".into(),
                ));
            }
            Compression::Zlib => self.zlib_unpack(data, unpacked_size)?,
            Compression::Zstd => self.zstd_unpack(data, unpacked_size)?,
        };
        if out.len() != unpacked_size {
            return Err(Error::Corrupted(format!(
                "block unpacked to {} bytes, expected {}",
                out.len(),
                unpacked_size
            )));
        }
        Ok(out)
    }

    pub fn drop_compressor(&mut self) {
        self.zlib_comp = None;
        #[cfg(feature = "zstd-codec")]
        {
            self.zstd_comp = None;
        }
    }

    pub fn drop_decompressor(&mut self) {
        self.zlib_decomp = None;
        #[cfg(feature = "zstd-codec")]
        {
            self.zstd_decomp = None;
        }
    }

    fn zlib_pack(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let comp = self
            .zlib_comp
            .get_or_insert_with(|| Compress::new(ZlibLevel::new(ZLIB_LEVEL), true));
        comp.reset();
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        loop {
            let before_in = comp.total_in();
            let status = comp
                .compress_vec(&data[before_in as usize..], &mut out, FlushCompress::Finish)
                .map_err(|e| Error::Corrupted(format!("deflate error: {e}")))?;
            match status {
                flate2::Status::StreamEnd => break,
                _ => out.reserve(out.capacity().max(64)),
            }
        }
        Ok(out)
    }

    fn zlib_unpack(&mut self, data: &[u8], unpacked_size: usize) -> Result<Vec<u8>> {
        let decomp = self
            .zlib_decomp
            .get_or_insert_with(|| Decompress::new(true));
        decomp.reset(true);
        let mut out = Vec::with_capacity(unpacked_size);
        loop {
            let before_in = decomp.total_in();
            let status = decomp
                .decompress_vec(
                    &data[before_in as usize..],
                    &mut out,
                    FlushDecompress::Finish,
                )
                .map_err(|e| Error::Corrupted(format!("inflate error: {e}")))?;
            match status {
                flate2::Status::StreamEnd => break,
                flate2::Status::BufError if out.len() >= out.capacity() => {
                    out.reserve(out.capacity().max(64));
                }
                flate2::Status::Ok => continue,
                _ => {
                    return Err(Error::Corrupted("inflate stalled before stream end".into()));
                }
            }
        }
        Ok(out)
    }

    #[cfg(feature = "zstd-codec")]
    fn zstd_pack(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.zstd_comp.is_none() {
            let comp = zstd::bulk::Compressor::new(ZSTD_LEVEL)
                .map_err(|e| Error::Corrupted(format!("zstd compressor init: {e}")))?;
            self.zstd_comp = Some(comp);
        }
        self.zstd_comp
            .as_mut()
            .expect("just initialized")
            .compress(data)
            .map_err(|e| Error::Corrupted(format!("zstd compress: {e}")))
    }

    #[cfg(feature = "zstd-codec")]
    fn zstd_unpack(&mut self, data: &[u8], unpacked_size: usize) -> Result<Vec<u8>> {
        if self.zstd_decomp.is_none() {
            let decomp = zstd::bulk::Decompressor::new()
                .map_err(|e| Error::Corrupted(format!("zstd decompressor init: {e}")))?;
            self.zstd_decomp = Some(decomp);
        }
        self.zstd_decomp
            .as_mut()
            .expect("just initialized")
            .decompress(data, unpacked_size)
            .map_err(|e| Error::Corrupted(format!("zstd decompress: {e}")))
    }

    #[cfg(not(feature = "zstd-codec"))]
    fn zstd_pack(&mut self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Unsupported("zstd"))
    }

    #[cfg(not(feature = "zstd-codec"))]
    fn zstd_unpack(&mut self, _data: &[u8], _unpacked_size: usize) -> Result<Vec<u8>> {
        Err(Error::Unsupported("zstd"))
    }
}
