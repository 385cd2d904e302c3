//! # lectern
//!
//! A persistent DOM cache for reflowable e-book reading engines.
//!
//! Opening a big book means parsing it, building a DOM, computing
//! styles and laying out pages — work worth keeping. lectern stores the
//! parsed tree (elements, text, attributes, per-node layout records,
//! page tables and embedded BLOBs) in a paged, compressed,
//! hash-validated cache file, so the next open re-materialises the DOM
//! without touching the source container.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lectern::{Deadline, Document, FileStream, NullProgress};
//!
//! // First open: parse, then persist.
//! let mut doc = Document::new();
//! doc.parse_html("<p>One<p>Two<p>Three")?;
//! doc.create_cache(Box::new(FileStream::create("book.cache".as_ref())?))?;
//! doc.save_changes(Deadline::none(), &mut NullProgress)?;
//!
//! // Later opens: skip the parse entirely.
//! let mut doc = Document::new();
//! doc.open_cache(Box::new(FileStream::open("book.cache".as_ref())?))?;
//! assert!(doc.load_from_cache(None, &mut NullProgress));
//! # Ok::<(), lectern::Error>(())
//! ```
//!
//! ## Pieces
//!
//! - [`cache`] — the sector-granular block container on disk.
//! - [`storage`] — chunked arenas holding packed node records under a
//!   memory budget.
//! - [`dom`] — the node graph, handle scheme, boxing passes and
//!   XPointer addressing.
//! - [`writer`] — the strict XHTML and lossy HTML document builders.
//! - [`Document`] — ties it all together with resumable save/load.
//!
//! Long operations take a [`Deadline`] and return
//! [`Progress::Timeout`] when it expires; calling again resumes.

pub mod blob;
pub mod cache;
pub mod deadline;
pub mod doc;
pub mod dom;
pub mod error;
pub mod io;
pub(crate) mod serial;
pub mod storage;
pub mod style;
pub mod writer;

pub use blob::BlobCache;
pub use cache::{BlockType, CacheFile, Compression};
pub use deadline::{Deadline, Progress};
pub use doc::{
    DocId, DocRegistry, Document, NullProgress, ProgressCallback, RenderParams,
    DOM_VERSION_CURRENT,
};
pub use dom::{
    create_xpointer, xpointer_string, DomTree, NodeHandle, RendMethod, XPointer,
    NORMALIZED_XPOINTERS_VERSION,
};
pub use error::{Error, Result};
pub use io::{CacheStream, FileStream, MemStream};
pub use writer::{
    feed_markup, DocProps, DocSinks, DomWriter, DomWriterFilter, ParserCallback, TocEntry,
};
