//! Error types for lectern operations.

use thiserror::Error;

/// Errors that can occur while reading or writing a document cache.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic, hash or structural-invariant violation. The cache file is
    /// unusable and must be rebuilt from the source document.
    #[error("Corrupted cache file: {0}")]
    Corrupted(String),

    /// The file's DOM version or compression flavour does not match what
    /// the caller asked for. The underlying book is fine.
    #[error("Cache version mismatch: {0}")]
    VersionMismatch(String),

    /// The header's dirty flag was set: a previous save did not complete.
    #[error("Cache file is marked dirty")]
    Dirty,

    /// No block with this (type, index) pair exists in the index.
    #[error("Block {0}:{1} not found in cache file")]
    NotFound(u16, u16),

    /// A compression backend required by the file is not compiled in.
    #[error("Unsupported compression: {0}")]
    Unsupported(&'static str),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A malformed XPointer string.
    #[error("Invalid XPointer: {0}")]
    XPointer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
