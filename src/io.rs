//! Random-access byte streams backing a cache file.
//!
//! The cache file never reads or writes sequentially: every block access
//! is positioned. This trait keeps the underlying handle free of cursor
//! state so a block can be read while another is being staged for write.

use std::fs::File;
use std::io;
use std::path::Path;

/// A random-access source and sink of bytes.
///
/// Positions are absolute; implementations must not keep a cursor.
pub trait CacheStream {
    /// Current total length of the stream.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `buf` starting at `offset`, extending the stream
    /// if the write runs past the current end.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Flushes buffered data; when `sync` is set, also forces it to the
    /// storage device (fsync) so a dirty-flag clear survives power loss.
    fn flush(&mut self, sync: bool) -> io::Result<()>;

    /// Reads exactly `len` bytes starting at `offset` into a fresh buffer.
    fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

// --- Implementation: Local File ---

pub struct FileStream {
    file: File,
    len: u64,
}

impl FileStream {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, len: 0 })
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

#[cfg(unix)]
impl CacheStream for FileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt; // Enables pread
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)?;
        self.len = self.len.max(offset + buf.len() as u64);
        Ok(())
    }

    fn flush(&mut self, sync: bool) -> io::Result<()> {
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(not(unix))]
impl CacheStream for FileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.len = self.len.max(offset + buf.len() as u64);
        Ok(())
    }

    fn flush(&mut self, sync: bool) -> io::Result<()> {
        use std::io::Write;
        self.file.flush()?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

// --- Implementation: In-Memory ---

/// An in-memory stream backed by a `Vec<u8>`, used by tests and by
/// embedders that keep caches off the filesystem.
#[derive(Default)]
pub struct MemStream {
    data: Vec<u8>,
}

impl MemStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Truncates to `len` bytes, simulating a torn write in tests.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

impl CacheStream for MemStream {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let offset = offset as usize;
        let end = offset.checked_add(buf.len()).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                buf.copy_from_slice(&self.data[offset..end]);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of stream",
            )),
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self, _sync: bool) -> io::Result<()> {
        Ok(())
    }
}

/// A read-only window over a stream, for zero-copy access to a block's
/// bytes (BLOBs are served this way). Borrows the stream, so it cannot
/// outlive the cache file nor overlap a write.
pub struct BlockSlice<'a> {
    stream: &'a dyn CacheStream,
    start: u64,
    len: u64,
}

impl<'a> BlockSlice<'a> {
    pub fn new(stream: &'a dyn CacheStream, start: u64, len: u64) -> Self {
        Self { stream, start, len }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads from the window; `offset` is relative to the window start.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset + buf.len() as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of block",
            ));
        }
        self.stream.read_at(self.start + offset, buf)
    }

    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len as usize];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_stream_read_write_at() {
        let mut s = MemStream::new();
        s.write_at(6, b"world").unwrap();
        s.write_at(0, b"hello ").unwrap();
        let mut buf = [0u8; 5];
        s.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(s.len(), 11);
    }

    #[test]
    fn test_mem_stream_read_past_end() {
        let s = MemStream::from_vec(b"abc".to_vec());
        let mut buf = [0u8; 4];
        assert!(s.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_block_slice_window() {
        let s = MemStream::from_vec(b"0123456789".to_vec());
        let slice = BlockSlice::new(&s, 2, 5);
        assert_eq!(slice.read_all().unwrap(), b"23456");
        let mut buf = [0u8; 2];
        slice.read_at(3, &mut buf).unwrap();
        assert_eq!(&buf, b"56");
        assert!(slice.read_at(4, &mut [0u8; 2]).is_err());
    }
}
