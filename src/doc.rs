//! The document: everything the cache file persists, and the staged
//! save/load orchestration over it.
//!
//! A document owns the DOM tree (with its arenas and cache file), the
//! blob store, properties, TOC, page tables and render-context record.
//! Saving is a resumable step machine: each stage writes one family of
//! blocks, checks the deadline, and records where to resume. Only the
//! final stage clears the dirty flag.

use crate::blob::BlobCache;
use crate::cache::{BlockType, CacheFile, Compression};
use crate::deadline::{Deadline, Progress};
use crate::dom::DomTree;
use crate::error::{Error, Result};
use crate::io::CacheStream;
use crate::serial::{SerialReader, SerialWriter};
use crate::storage::DEFAULT_DOC_BUFFER_SIZE;
use crate::style::{FontPool, StylePool};
use crate::writer::{DocProps, DocSinks, DomWriter, DomWriterFilter, TocEntry};

/// Current DOM construction behaviour: the HTML5-ish auto-close state
/// machine. Older documents carry older numbers so their bookmarks keep
/// resolving; this crate implements only the current behaviour and
/// rejects caches written with another version.
pub const DOM_VERSION_CURRENT: u32 = 20200824;

/// Progress notifications a frontend can subscribe to.
pub trait ProgressCallback {
    fn on_load_progress(&mut self, _percent: u8) {}
    fn on_save_progress(&mut self, _percent: u8) {}
    fn on_node_styles_update_start(&mut self) {}
    fn on_node_styles_update_progress(&mut self, _percent: u8) {}
    fn on_node_styles_update_end(&mut self) {}
    fn on_format_start(&mut self) {}
    fn on_format_end(&mut self) {}
}

/// No-op callback for embedders that don't care.
pub struct NullProgress;
impl ProgressCallback for NullProgress {}

/// Render-context record: hashes that let a reload skip re-rendering
/// when nothing that affects layout has changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderParams {
    pub style_hash: u64,
    pub stylesheet_hash: u64,
    pub width: u32,
    pub height: u32,
    pub render_flags: u32,
    pub rendered: bool,
}

impl RenderParams {
    fn encode(&self, w: &mut SerialWriter) {
        w.put_u64(self.style_hash);
        w.put_u64(self.stylesheet_hash);
        w.put_u32(self.width);
        w.put_u32(self.height);
        w.put_u32(self.render_flags);
        w.put_u8(self.rendered as u8);
    }

    fn decode(r: &mut SerialReader) -> Result<Self> {
        Ok(Self {
            style_hash: r.get_u64()?,
            stylesheet_hash: r.get_u64()?,
            width: r.get_u32()?,
            height: r.get_u32()?,
            render_flags: r.get_u32()?,
            rendered: r.get_u8()? != 0,
        })
    }
}

/// Registry handing out small document ids in constant time. An engine
/// context owns one; ids are recycled on unregister.
pub struct DocRegistry {
    slots: Vec<bool>,
    free: Vec<u16>,
}

pub const MAX_DOCUMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocId(pub u16);

impl DocRegistry {
    pub fn new() -> Self {
        Self {
            slots: vec![false; MAX_DOCUMENTS],
            free: (0..MAX_DOCUMENTS as u16).rev().collect(),
        }
    }

    pub fn register(&mut self) -> Option<DocId> {
        let id = self.free.pop()?;
        self.slots[id as usize] = true;
        Some(DocId(id))
    }

    pub fn unregister(&mut self, id: DocId) {
        if self.slots.get(id.0 as usize).copied() == Some(true) {
            self.slots[id.0 as usize] = false;
            self.free.push(id.0);
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| **s).count()
    }
}

impl Default for DocRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of stages in the save step machine.
const SAVE_STAGES: u8 = 14;

pub struct Document {
    pub tree: DomTree,
    pub props: DocProps,
    pub toc: Vec<TocEntry>,
    /// Stylesheet stack; writers push the aggregated head CSS here
    /// while parsing.
    pub stylesheets: Vec<String>,
    pub blobs: BlobCache,
    pub render_params: RenderParams,
    /// Opaque serialized page-break table, owned by the paginator.
    pages_data: Vec<u8>,
    /// Opaque serialized source page map.
    pagemap_data: Vec<u8>,
    compression: Compression,
    dom_version: u32,
    save_stage: u8,
    pub doc_id: Option<DocId>,
}

impl Document {
    pub fn new() -> Self {
        Self::with_config(
            DOM_VERSION_CURRENT,
            Compression::default(),
            DEFAULT_DOC_BUFFER_SIZE,
        )
    }

    pub fn with_config(dom_version: u32, compression: Compression, buffer_size: usize) -> Self {
        Self {
            tree: DomTree::new(dom_version, buffer_size),
            props: DocProps::new(),
            toc: Vec::new(),
            stylesheets: Vec::new(),
            blobs: BlobCache::new(),
            render_params: RenderParams::default(),
            pages_data: Vec::new(),
            pagemap_data: Vec::new(),
            compression,
            dom_version,
            save_stage: 0,
            doc_id: None,
        }
    }

    pub fn dom_version(&self) -> u32 {
        self.dom_version
    }

    /// Creates a fresh cache file on `stream` and attaches it.
    pub fn create_cache(&mut self, stream: Box<dyn CacheStream>) -> Result<()> {
        let mut cache = CacheFile::new(self.dom_version, self.compression);
        cache.create(stream)?;
        self.tree.attach_cache(cache);
        Ok(())
    }

    /// Opens an existing cache file (header, index and content hashes
    /// validated) and attaches it. The document content itself is
    /// materialized later by [`Document::load_from_cache`].
    pub fn open_cache(&mut self, stream: Box<dyn CacheStream>) -> Result<()> {
        let mut cache = CacheFile::new(self.dom_version, self.compression);
        cache.open(stream)?;
        self.tree.attach_cache(cache);
        Ok(())
    }

    /// Path convenience over [`Document::create_cache`].
    pub fn create_cache_at(&mut self, path: &std::path::Path) -> Result<()> {
        self.create_cache(Box::new(crate::io::FileStream::create(path)?))
    }

    /// Path convenience over [`Document::open_cache`].
    pub fn open_cache_at(&mut self, path: &std::path::Path) -> Result<()> {
        self.open_cache(Box::new(crate::io::FileStream::open(path)?))
    }

    pub fn has_cache(&mut self) -> bool {
        self.tree.cache_mut().is_some()
    }

    /// Detaches and returns the cache file (tests use this to reopen).
    pub fn take_cache(&mut self) -> Option<CacheFile> {
        self.tree.cache.take()
    }

    // --- writers ---

    fn sinks(&mut self) -> (&mut DomTree, DocSinks<'_>) {
        (
            &mut self.tree,
            DocSinks {
                stylesheets: &mut self.stylesheets,
                toc: &mut self.toc,
                props: &mut self.props,
                blobs: &mut self.blobs,
                font_hook: None,
            },
        )
    }

    /// Strict writer for balanced XHTML (FB2/EPUB fragments).
    pub fn xml_writer(&mut self) -> DomWriter<'_> {
        let (tree, sinks) = self.sinks();
        DomWriter::new(tree, sinks)
    }

    /// Lossy writer for HTML/CHM tag soup.
    pub fn html_writer(&mut self) -> DomWriterFilter<'_> {
        let (tree, sinks) = self.sinks();
        DomWriterFilter::new(tree, sinks)
    }

    /// Parses markup into the (empty) document, with format-phase
    /// progress notifications. `lossy` selects the HTML filter writer;
    /// otherwise the strict XHTML writer runs.
    pub fn parse_markup(
        &mut self,
        markup: &str,
        lossy: bool,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        progress.on_format_start();
        let result = if lossy {
            let (tree, sinks) = self.sinks();
            let mut writer = DomWriterFilter::new(tree, sinks);
            crate::writer::feed_markup(&mut writer, markup)
        } else {
            let (tree, sinks) = self.sinks();
            let mut writer = DomWriter::new(tree, sinks);
            crate::writer::feed_markup(&mut writer, markup)
        };
        progress.on_format_end();
        result
    }

    /// Parses balanced XHTML text into the (empty) document.
    pub fn parse_xhtml(&mut self, markup: &str) -> Result<()> {
        self.parse_markup(markup, false, &mut NullProgress)
    }

    /// Parses lossy HTML text into the (empty) document.
    pub fn parse_html(&mut self, markup: &str) -> Result<()> {
        self.parse_markup(markup, true, &mut NullProgress)
    }

    // --- blobs / pages ---

    pub fn add_blob(&mut self, name: &str, data: Vec<u8>) {
        self.blobs.add(name, data);
    }

    pub fn get_blob(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        self.blobs.get(name, self.tree.cache_mut())
    }

    /// Stores the paginator's serialized page table for the next save.
    pub fn set_pages_data(&mut self, data: Vec<u8>) {
        self.pages_data = data;
    }

    pub fn pages_data(&self) -> &[u8] {
        &self.pages_data
    }

    pub fn set_pagemap_data(&mut self, data: Vec<u8>) {
        self.pagemap_data = data;
    }

    pub fn pagemap_data(&self) -> &[u8] {
        &self.pagemap_data
    }

    /// Compares the caller's render context against the stored one.
    /// Returns true (and records the new context) when a re-render is
    /// needed; false means the cached rendering can be reused as-is.
    pub fn update_render_context(&mut self, width: u32, height: u32, render_flags: u32) -> bool {
        let style_hash = self.style_content_hash();
        let stylesheet_hash = self.stylesheet_hash();
        let fresh = RenderParams {
            style_hash,
            stylesheet_hash,
            width,
            height,
            render_flags,
            rendered: true,
        };
        if self.render_params == fresh {
            return false;
        }
        self.render_params = fresh;
        true
    }

    fn style_content_hash(&self) -> u64 {
        self.tree.style_pool.content_hash() ^ self.tree.font_pool.content_hash().rotate_left(1)
    }

    fn stylesheet_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        self.stylesheets.hash(&mut h);
        h.finish()
    }

    // --- block serialization helpers ---

    fn write_block(&mut self, block: BlockType, bytes: &[u8], compress: bool) -> Result<()> {
        let cache = self
            .tree
            .cache_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        cache.write(block, 0, bytes, compress)
    }

    fn read_block(&mut self, block: BlockType) -> Result<Vec<u8>> {
        let cache = self
            .tree
            .cache_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        cache.read(block, 0)
    }

    fn encode_props(&self) -> Vec<u8> {
        let mut w = SerialWriter::new();
        let count = self.props.iter().count();
        w.put_u32(count as u32);
        for (k, v) in self.props.iter() {
            w.put_str(k);
            w.put_str(v);
        }
        w.into_vec()
    }

    fn decode_props(raw: &[u8]) -> Result<DocProps> {
        let mut r = SerialReader::new(raw);
        let count = r.get_u32()?;
        let mut props = DocProps::new();
        for _ in 0..count {
            let k = r.get_string()?;
            let v = r.get_string()?;
            props.set(&k, &v);
        }
        Ok(props)
    }

    fn encode_toc(&self) -> Vec<u8> {
        let mut w = SerialWriter::new();
        w.put_u32(self.toc.len() as u32);
        for entry in &self.toc {
            w.put_u16(entry.level);
            w.put_str(&entry.title);
            w.put_str(&entry.path);
        }
        w.into_vec()
    }

    fn decode_toc(raw: &[u8]) -> Result<Vec<TocEntry>> {
        let mut r = SerialReader::new(raw);
        let count = r.get_u32()?;
        let mut toc = Vec::with_capacity(count as usize);
        for _ in 0..count {
            toc.push(TocEntry {
                level: r.get_u16()?,
                title: r.get_string()?,
                path: r.get_string()?,
            });
        }
        Ok(toc)
    }

    /// The `StyleData` block: the style pool followed by the document
    /// stylesheet stack.
    fn encode_pools(&self) -> Vec<u8> {
        let mut w = SerialWriter::new();
        self.tree.style_pool.encode_pool(&mut w);
        w.put_u32(self.stylesheets.len() as u32);
        for sheet in &self.stylesheets {
            w.put_str(sheet);
        }
        w.into_vec()
    }

    fn encode_fonts(&self) -> Vec<u8> {
        let mut w = SerialWriter::new();
        self.tree.font_pool.encode_pool(&mut w);
        w.into_vec()
    }

    fn encode_maps(&self) -> Vec<u8> {
        let mut w = SerialWriter::new();
        self.tree.names.encode(&mut w);
        w.into_vec()
    }

    // --- save ---

    /// Saves everything that changed. Resumable: on `Timeout`, call
    /// again with a fresh deadline and it continues from the recorded
    /// stage. The dirty flag only clears in the final stage.
    pub fn save_changes(
        &mut self,
        deadline: Deadline,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Progress> {
        if !self.has_cache() {
            return Err(Error::Corrupted("no cache file attached".into()));
        }
        macro_rules! check_deadline {
            () => {
                if deadline.expired() {
                    log::debug!("save timed out at stage {}", self.save_stage);
                    return Ok(Progress::Timeout);
                }
            };
        }
        log::debug!("save_changes resuming at stage {}", self.save_stage);
        loop {
            progress.on_save_progress((self.save_stage as u32 * 100 / SAVE_STAGES as u32) as u8);
            match self.save_stage {
                0 => {
                    // Bound data loss first, then pack remaining
                    // mutable nodes into the arenas.
                    let cache = self.tree.cache_mut().expect("cache checked");
                    cache.flush(false, deadline)?;
                    if self.tree.persist_all(deadline)? == Progress::Timeout {
                        return Ok(Progress::Timeout);
                    }
                }
                1 => {
                    if self.tree.save_elem_arena(deadline)? == Progress::Timeout {
                        return Ok(Progress::Timeout);
                    }
                }
                2 => {
                    if self.tree.save_text_arena(deadline)? == Progress::Timeout {
                        return Ok(Progress::Timeout);
                    }
                }
                3 => {
                    if self.tree.save_rect_arena(deadline)? == Progress::Timeout {
                        return Ok(Progress::Timeout);
                    }
                }
                4 => {
                    let cache = self.tree.cache_mut().expect("cache checked");
                    self.blobs.save(cache)?;
                    check_deadline!();
                }
                5 => {
                    if self.tree.save_style_arena(deadline)? == Progress::Timeout {
                        return Ok(Progress::Timeout);
                    }
                }
                6 => {
                    let bytes = self.encode_props();
                    self.write_block(BlockType::PropData, &bytes, true)?;
                    check_deadline!();
                }
                7 => {
                    let bytes = self.encode_maps();
                    self.write_block(BlockType::MapsData, &bytes, true)?;
                    check_deadline!();
                }
                8 => {
                    if !self.pages_data.is_empty() {
                        let bytes = std::mem::take(&mut self.pages_data);
                        self.write_block(BlockType::PageData, &bytes, true)?;
                        self.pages_data = bytes;
                    }
                    check_deadline!();
                }
                9 => {
                    self.tree.save_node_tables()?;
                    check_deadline!();
                }
                10 => {
                    let mut w = SerialWriter::new();
                    self.render_params.encode(&mut w);
                    let bytes = w.into_vec();
                    self.write_block(BlockType::RendParams, &bytes, false)?;
                    let toc = self.encode_toc();
                    self.write_block(BlockType::TocData, &toc, true)?;
                    if !self.pagemap_data.is_empty() {
                        let bytes = std::mem::take(&mut self.pagemap_data);
                        self.write_block(BlockType::PageMapData, &bytes, true)?;
                        self.pagemap_data = bytes;
                    }
                    check_deadline!();
                }
                11 => {
                    let pools = self.encode_pools();
                    self.write_block(BlockType::StyleData, &pools, true)?;
                    check_deadline!();
                }
                12 => {
                    let fonts = self.encode_fonts();
                    self.write_block(BlockType::FontData, &fonts, true)?;
                    check_deadline!();
                }
                13 => {
                    let cache = self.tree.cache_mut().expect("cache checked");
                    cache.flush(true, deadline)?;
                    cache.cleanup_compressor();
                    self.save_stage = 0;
                    progress.on_save_progress(100);
                    return Ok(Progress::Done);
                }
                _ => unreachable!("save stage out of range"),
            }
            self.save_stage += 1;
            check_deadline!();
        }
    }

    // --- load ---

    /// Re-materializes the document from its attached cache file,
    /// avoiding a reparse of the source. `format_cb` is invoked with
    /// the stored document-format tag before the stylesheet applies.
    /// Returns false (leaving the document empty) when anything in the
    /// cache is unusable; the caller then reparses from source.
    pub fn load_from_cache(
        &mut self,
        format_cb: Option<&mut dyn FnMut(&str)>,
        progress: &mut dyn ProgressCallback,
    ) -> bool {
        match self.try_load_from_cache(format_cb, progress) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("cache load failed, falling back to source: {e}");
                false
            }
        }
    }

    fn try_load_from_cache(
        &mut self,
        format_cb: Option<&mut dyn FnMut(&str)>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        if !self.has_cache() {
            return Err(Error::Corrupted("no cache file attached".into()));
        }
        progress.on_load_progress(0);

        let maps = self.read_block(BlockType::MapsData)?;
        let mut r = SerialReader::new(&maps);
        self.tree.names = crate::dom::NameRegistry::decode(&mut r)?;
        progress.on_load_progress(10);

        let props = self.read_block(BlockType::PropData)?;
        self.props = Self::decode_props(&props)?;

        if let Some(cb) = format_cb {
            if let Some(format) = self.props.get("doc.format") {
                cb(format);
            }
        }
        progress.on_load_progress(20);

        self.tree.load_node_tables()?;
        progress.on_load_progress(50);

        {
            let cache = self.tree.cache_mut().expect("cache checked");
            self.blobs.load(cache)?;
        }
        progress.on_load_progress(60);

        match self.read_block(BlockType::TocData) {
            Ok(raw) => self.toc = Self::decode_toc(&raw)?,
            Err(Error::NotFound(..)) => self.toc.clear(),
            Err(e) => return Err(e),
        }
        match self.read_block(BlockType::PageData) {
            Ok(raw) => self.pages_data = raw,
            Err(Error::NotFound(..)) => self.pages_data.clear(),
            Err(e) => return Err(e),
        }
        match self.read_block(BlockType::PageMapData) {
            Ok(raw) => self.pagemap_data = raw,
            Err(Error::NotFound(..)) => self.pagemap_data.clear(),
            Err(e) => return Err(e),
        }
        progress.on_load_progress(70);

        let pools = self.read_block(BlockType::StyleData)?;
        let mut r = SerialReader::new(&pools);
        self.tree.style_pool = StylePool::decode_pool(&mut r)?;
        let sheet_count = r.get_u32()?;
        self.stylesheets.clear();
        for _ in 0..sheet_count {
            self.stylesheets.push(r.get_string()?);
        }
        let fonts = self.read_block(BlockType::FontData)?;
        let mut r = SerialReader::new(&fonts);
        self.tree.font_pool = FontPool::decode_pool(&mut r)?;
        progress.on_load_progress(85);

        match self.read_block(BlockType::RendParams) {
            Ok(raw) => {
                let mut r = SerialReader::new(&raw);
                self.render_params = RenderParams::decode(&mut r)?;
            }
            Err(Error::NotFound(..)) => self.render_params = RenderParams::default(),
            Err(e) => return Err(e),
        }

        if let Some(cache) = self.tree.cache_mut() {
            cache.cleanup_decompressor();
        }
        progress.on_load_progress(100);
        Ok(())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemStream;

    #[test]
    fn test_doc_registry_constant_time_ids() {
        let mut reg = DocRegistry::new();
        let a = reg.register().unwrap();
        let b = reg.register().unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.live_count(), 2);
        reg.unregister(a);
        assert_eq!(reg.live_count(), 1);
        let c = reg.register().unwrap();
        assert_eq!(c, a); // recycled
    }

    #[test]
    fn test_save_needs_cache() {
        let mut doc = Document::new();
        assert!(doc
            .save_changes(Deadline::none(), &mut NullProgress)
            .is_err());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let mut doc = Document::with_config(DOM_VERSION_CURRENT, Compression::Zlib, 1 << 20);
        doc.parse_xhtml("<html><body><p>alpha</p><p>beta</p></body></html>")
            .unwrap();
        doc.props.set("doc.format", "html");
        doc.add_blob("cover", vec![9u8; 32]);
        doc.create_cache(Box::new(MemStream::new())).unwrap();
        assert_eq!(
            doc.save_changes(Deadline::none(), &mut NullProgress).unwrap(),
            Progress::Done
        );
        let stream = doc.take_cache().unwrap().into_stream();

        let mut doc2 = Document::with_config(DOM_VERSION_CURRENT, Compression::Zlib, 1 << 20);
        doc2.open_cache(stream).unwrap();
        let mut seen_format = String::new();
        let mut cb = |f: &str| seen_format = f.to_string();
        assert!(doc2.load_from_cache(Some(&mut cb), &mut NullProgress));
        assert_eq!(seen_format, "html");
        assert_eq!(doc2.get_blob("cover").unwrap(), Some(vec![9u8; 32]));

        // Structure survived: html > body > p, p.
        let root = doc2.tree.root();
        let html = doc2.tree.child(root, 0).unwrap();
        let body = doc2.tree.child(html, 0).unwrap();
        assert_eq!(doc2.tree.child_count(body).unwrap(), 2);
        let p1 = doc2.tree.child(body, 0).unwrap();
        let t1 = doc2.tree.child(p1, 0).unwrap();
        assert_eq!(doc2.tree.text(t1).unwrap(), "alpha");
    }

    #[test]
    fn test_render_context_check() {
        let mut doc = Document::new();
        assert!(doc.update_render_context(600, 800, 0)); // first render
        assert!(!doc.update_render_context(600, 800, 0)); // unchanged
        assert!(doc.update_render_context(600, 900, 0)); // height changed
    }
}
