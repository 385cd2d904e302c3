//! Parser-side document builders.
//!
//! Parsers are black boxes that emit a SAX-like event stream; the two
//! writers here consume it and grow the DOM. [`DomWriter`] expects
//! balanced XHTML (FB2/EPUB); [`DomWriterFilter`] accepts tag soup and
//! repairs it with HTML5-ish auto-close rules, foster parenting and
//! implicit containers. Both share the element-stack core in this
//! module: style application on tag-body, head-stylesheet collection,
//! TOC updates and node persistence on close.

mod drive;
mod filter;
mod strict;

pub use drive::feed_markup;
pub use filter::DomWriterFilter;
pub use strict::DomWriter;

use crate::blob::BlobCache;
use crate::dom::boxing::{init_rend_method, is_empty_space};
use crate::dom::{attr, el, xpointer, DomTree, ElemId, NodeHandle, NsId, TagFlags, XPointer};
use crate::style::{apply_inline_style, ComputedStyle, Display, WhiteSpace};

/// Text arrived inside a `white-space: pre` context; keep its spacing.
pub const TEXT_FLAG_PRE: u32 = 1;

/// The event stream every writer consumes. Mirrors what the format
/// parsers produce; attribute events arrive between `on_tag_open` and
/// `on_tag_body`.
pub trait ParserCallback {
    fn on_start(&mut self);
    fn on_encoding(&mut self, _label: &str) {}
    fn on_tag_open(&mut self, ns: &str, name: &str);
    fn on_attribute(&mut self, ns: &str, name: &str, value: &str);
    fn on_tag_body(&mut self);
    fn on_tag_close(&mut self, ns: &str, name: &str, self_closing: bool);
    fn on_text(&mut self, text: &str, flags: u32);
    /// Returns false when the blob was rejected.
    fn on_blob(&mut self, name: &str, data: &[u8]) -> bool;
    fn on_doc_property(&mut self, name: &str, value: &str);
    fn on_stop(&mut self);
}

/// One entry of the document's table of contents, produced while
/// parsing sectioned formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub level: u16,
    pub title: String,
    /// XPointer of the section start.
    pub path: String,
}

/// String key/value document properties (author, title, source file…).
#[derive(Debug, Default, Clone)]
pub struct DocProps {
    entries: Vec<(String, String)>,
}

impl DocProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(e) = self.entries.iter_mut().find(|(k, _)| k == name) {
            e.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Document-side channels a writer feeds while parsing. Borrowed from
/// the owning document for the duration of one parse.
pub struct DocSinks<'d> {
    pub stylesheets: &'d mut Vec<String>,
    pub toc: &'d mut Vec<TocEntry>,
    pub props: &'d mut DocProps,
    pub blobs: &'d mut BlobCache,
    /// Invoked with the blob name of every embedded font met.
    pub font_hook: Option<&'d mut dyn FnMut(&str)>,
}

/// One open element on the writer stack.
pub(crate) struct OpenElement {
    pub element: NodeHandle,
    pub tag_id: ElemId,
    pub flags: u32,
    pub allow_text: bool,
    pub is_block: bool,
    pub body_enter_called: bool,
}

/// Shared writer machinery: the open-element stack and everything both
/// writers do identically.
pub(crate) struct WriterBase<'d> {
    pub tree: &'d mut DomTree,
    pub sinks: DocSinks<'d>,
    pub stack: Vec<OpenElement>,
    pub flags: u32,
    pub head_style_text: String,
    pub stylesheet_links: Vec<String>,
    pub pop_style_on_finish: bool,
    pub err_flag: bool,
}

impl<'d> WriterBase<'d> {
    pub fn new(tree: &'d mut DomTree, sinks: DocSinks<'d>) -> Self {
        Self {
            tree,
            sinks,
            stack: Vec::new(),
            flags: 0,
            head_style_text: String::new(),
            stylesheet_links: Vec::new(),
            pop_style_on_finish: false,
            err_flag: false,
        }
    }

    pub fn start(&mut self) {
        let root = self.tree.root();
        let _ = self.tree.set_rend_method(root, crate::dom::RendMethod::Block);
        self.stack.push(OpenElement {
            element: root,
            tag_id: ElemId::NONE,
            flags: 0,
            allow_text: false,
            is_block: true,
            body_enter_called: true,
        });
    }

    pub fn top_tag(&self) -> ElemId {
        self.stack.last().map(|f| f.tag_id).unwrap_or(ElemId::NONE)
    }

    pub fn top_element(&self) -> NodeHandle {
        self.stack
            .last()
            .map(|f| f.element)
            .unwrap_or(NodeHandle::NULL)
    }

    /// Opens a new element under `parent` (default: the current top),
    /// inserted at `index` (default: appended), and pushes its frame.
    pub fn open_element_at(
        &mut self,
        ns: NsId,
        id: ElemId,
        parent: Option<NodeHandle>,
        index: Option<usize>,
    ) -> NodeHandle {
        let parent = parent.unwrap_or_else(|| self.top_element());
        let count = self.tree.child_count(parent).unwrap_or(0);
        let index = index.unwrap_or(count).min(count);
        let element = match self.tree.insert_child_element(parent, index, ns, id) {
            Ok(h) => h,
            Err(e) => {
                log::error!("cannot insert element: {e}");
                self.err_flag = true;
                return NodeHandle::NULL;
            }
        };
        let inherited_pre = self.flags & TEXT_FLAG_PRE;
        let allow_text = self.tree.names.allow_text(id);
        self.stack.push(OpenElement {
            element,
            tag_id: id,
            flags: inherited_pre,
            allow_text,
            is_block: true,
            body_enter_called: false,
        });
        self.flags = inherited_pre;
        element
    }

    pub fn open_element(&mut self, ns: NsId, id: ElemId) -> NodeHandle {
        self.open_element_at(ns, id, None, None)
    }

    pub fn add_attribute(&mut self, ns: &str, name: &str, value: &str) {
        let ns_id = if ns.is_empty() {
            NsId::NONE
        } else {
            self.tree.names.ns_id(ns)
        };
        let attr_id = self.tree.names.attr_id(name);
        let element = self.top_element();
        if element.is_null() {
            return;
        }
        if let Err(e) = self.tree.set_attr(element, ns_id, attr_id, value) {
            log::warn!("cannot set attribute {name}: {e}");
        }
    }

    /// Appends a declaration to the element's `style` attribute
    /// (presentational-attribute translation lands here).
    pub fn append_style(&mut self, declaration: &str) {
        let element = self.top_element();
        if element.is_null() {
            return;
        }
        let existing = self
            .tree
            .attr_str(element, NsId::NONE, attr::STYLE)
            .ok()
            .flatten()
            .unwrap_or("")
            .to_string();
        let combined = if existing.is_empty() {
            declaration.to_string()
        } else if existing.trim_end().ends_with(';') {
            format!("{existing} {declaration}")
        } else {
            format!("{existing}; {declaration}")
        };
        let _ = self
            .tree
            .set_attr(element, NsId::NONE, attr::STYLE, &combined);
    }

    /// Applies the element's style once its attributes are known (the
    /// `>` of the opening tag). Needed this early because
    /// `white-space: pre` changes how the following text is parsed.
    pub fn body_enter(&mut self) {
        let Some(frame) = self.stack.last() else {
            return;
        };
        if frame.body_enter_called {
            return;
        }
        let element = frame.element;
        let tag_id = frame.tag_id;

        let parent = self.tree.parent(element).unwrap_or(NodeHandle::NULL);
        let mut style = if parent.is_null() || self.tree.is_root(parent) {
            ComputedStyle::default()
        } else {
            // Inherit the inheritable subset from the parent.
            let parent_style = self.tree.style(parent).unwrap_or_default();
            ComputedStyle {
                white_space: parent_style.white_space,
                text_align: parent_style.text_align,
                ..ComputedStyle::default()
            }
        };
        style.display = self.tree.names.default_display(tag_id);
        if tag_id == el::PRE {
            style.white_space = WhiteSpace::Pre;
        }
        if let Ok(Some(css)) = self.tree.attr_str(element, NsId::NONE, attr::STYLE) {
            let css = css.to_string();
            style = apply_inline_style(&style, &css);
        }
        let is_block = style.display != Display::Inline && style.display != Display::None;
        let pre = style.white_space.is_pre();
        if let Err(e) = self.tree.apply_style(element, style) {
            log::warn!("cannot apply style: {e}");
        }

        let frame = self.stack.last_mut().expect("frame still on stack");
        frame.body_enter_called = true;
        frame.is_block = is_block;
        if pre {
            frame.flags |= TEXT_FLAG_PRE;
        } else {
            frame.flags &= !TEXT_FLAG_PRE;
        }
        self.flags = frame.flags;
    }

    /// The `<body>` entry hook: if `<head>` carried `<style>` text or
    /// stylesheet links, inject one `<body><stylesheet>` child holding
    /// `@import url(…)` lines plus the aggregated CSS, and push it on
    /// the document stylesheet stack (popped when the writer stops).
    pub fn enter_body_with_styles(&mut self) {
        if self.head_style_text.is_empty() && self.stylesheet_links.is_empty() {
            self.body_enter();
            return;
        }
        let mut style_text = String::new();
        for link in self.stylesheet_links.drain(..) {
            style_text.push_str("@import url(\"");
            style_text.push_str(&link);
            style_text.push_str("\");\n");
        }
        style_text.push_str(&self.head_style_text);
        self.head_style_text.clear();

        self.sinks.stylesheets.push(style_text.clone());
        self.pop_style_on_finish = true;

        // The stylesheet child must come after this body's own style is
        // set, so body {} declarations apply to the body element itself.
        self.body_enter();
        self.open_element(NsId::NONE, el::STYLESHEET);
        self.body_enter();
        self.text_to_current(&style_text, 0);
        self.close_top();
        log::debug!("added body>stylesheet child with head style content");
    }

    /// Plain text into the current element, honouring the text rules.
    pub fn text_to_current(&mut self, text: &str, flags: u32) {
        let Some(frame) = self.stack.last() else {
            return;
        };
        if !frame.allow_text {
            return;
        }
        // Drop a leading empty-space run inside a block element.
        let pre = frame.flags & TEXT_FLAG_PRE != 0 || flags & TEXT_FLAG_PRE != 0;
        let element = frame.element;
        let is_block = frame.is_block;
        if is_block
            && !pre
            && self.tree.child_count(element).unwrap_or(0) == 0
            && is_empty_space(text)
        {
            return;
        }
        if let Err(e) = self.tree.append_child_text(element, text) {
            log::warn!("cannot append text: {e}");
        }
    }

    /// Collects `<head><style>` content instead of adding text nodes.
    /// Returns true when the text was consumed.
    pub fn collect_head_style(&mut self, text: &str) -> bool {
        let len = self.stack.len();
        if len < 2 {
            return false;
        }
        if self.stack[len - 1].tag_id == el::STYLE && self.stack[len - 2].tag_id == el::HEAD {
            self.head_style_text.push_str(text);
            return true;
        }
        false
    }

    /// Records a closing `<head><link rel="stylesheet">`; the links
    /// become `@import` lines when `<body>` opens.
    fn note_stylesheet_link(&mut self, element: NodeHandle) {
        let parent = self.tree.parent(element).unwrap_or(NodeHandle::NULL);
        if parent.is_null() || self.tree.node_id(parent).ok() != Some(el::HEAD) {
            return;
        }
        let rel = self
            .tree
            .attr_str(element, NsId::NONE, attr::REL)
            .ok()
            .flatten()
            .map(|s| s.to_ascii_lowercase());
        if rel.as_deref() != Some("stylesheet") {
            return;
        }
        if let Ok(Some(href)) = self.tree.attr_str(element, NsId::NONE, attr::HREF) {
            let href = href.to_string();
            log::debug!("internal stylesheet link: {href}");
            self.stylesheet_links.push(href);
        }
    }

    /// Closes the top frame: late body-enter if needed, TOC update,
    /// render-method derivation, persistence.
    pub fn close_top(&mut self) {
        let Some(frame) = self.stack.last() else {
            return;
        };
        if !frame.body_enter_called {
            self.body_enter();
        }
        let frame = self.stack.pop().expect("frame on stack");
        if frame.element.is_null() {
            // The element was never created (insertion failure already
            // logged); nothing to finish.
            return;
        }
        if frame.tag_id == el::LINK {
            self.note_stylesheet_link(frame.element);
        }
        if frame.tag_id == el::SECTION {
            self.update_toc(frame.element);
        }
        if let Err(e) = init_rend_method(self.tree, frame.element) {
            log::warn!("render-method derivation failed: {e}");
        }
        if let Err(e) = self.tree.persist(frame.element) {
            log::warn!("cannot persist node: {e}");
        }
        if let Some(top) = self.stack.last() {
            self.flags = top.flags;
        }
    }

    fn update_toc(&mut self, section: NodeHandle) {
        let title = self.section_title(section).unwrap_or_default();
        let level = self
            .stack
            .iter()
            .filter(|f| f.tag_id == el::SECTION)
            .count() as u16
            + 1;
        let path = xpointer::xpointer_string(
            self.tree,
            XPointer {
                node: section,
                offset: 0,
            },
        )
        .unwrap_or_default();
        self.sinks.toc.push(TocEntry { level, title, path });
    }

    fn section_title(&mut self, section: NodeHandle) -> Option<String> {
        let count = self.tree.child_count(section).ok()?;
        for i in 0..count {
            let child = self.tree.child(section, i).ok()?;
            if child.is_element() {
                let id = self.tree.node_id(child).ok()?;
                if self.tree.names.elem_name(id) == "title"
                    || (id >= el::H1 && id <= el::H6)
                    || id == el::TITLE
                {
                    return Some(self.collect_text(child));
                }
            }
        }
        None
    }

    fn collect_text(&mut self, h: NodeHandle) -> String {
        let mut out = String::new();
        let mut stack = vec![h];
        while let Some(node) = stack.pop() {
            if node.is_text() {
                if let Ok(t) = self.tree.text(node) {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    out.push_str(t.trim());
                }
            } else if let Ok(children) = self.tree.children(node) {
                for child in children.into_iter().rev() {
                    stack.push(child);
                }
            }
        }
        out.trim().to_string()
    }

    /// Registers a blob, routing font payloads to the font hook too.
    pub fn add_blob(&mut self, name: &str, data: &[u8]) -> bool {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".ttf")
            || lower.ends_with(".otf")
            || lower.ends_with(".woff")
            || lower.ends_with(".woff2")
        {
            if let Some(hook) = self.sinks.font_hook.as_mut() {
                hook(name);
            }
        }
        self.sinks.blobs.add(name, data.to_vec());
        true
    }

    /// Tears down remaining frames and pops the pushed stylesheet.
    pub fn stop(&mut self) {
        while self.stack.len() > 1 {
            self.close_top();
        }
        // Leave the root frame; derive its method for completeness.
        if let Some(root) = self.stack.pop() {
            let _ = init_rend_method(self.tree, root.element);
        }
        if self.pop_style_on_finish {
            self.sinks.stylesheets.pop();
            self.pop_style_on_finish = false;
        }
    }

    pub fn tag_flags(&self, id: ElemId) -> TagFlags {
        self.tree.names.tag_flags(id)
    }
}
