//! The strict writer: balanced XHTML in, DOM out.
//!
//! Used for formats produced or pre-validated upstream (FB2, EPUB
//! fragments). It performs no auto-close: a mismatched closing tag pops
//! up to the matching open element if one exists, and is otherwise
//! ignored with the error flag set.

use crate::dom::{el, DomTree, NsId};
use crate::writer::{DocSinks, ParserCallback, WriterBase};

pub struct DomWriter<'d> {
    base: WriterBase<'d>,
    /// Parsing stops once this tag closes (header-only scans).
    stop_tag: Option<crate::dom::ElemId>,
    stopped: bool,
}

impl<'d> DomWriter<'d> {
    pub fn new(tree: &'d mut DomTree, sinks: DocSinks<'d>) -> Self {
        Self {
            base: WriterBase::new(tree, sinks),
            stop_tag: None,
            stopped: false,
        }
    }

    /// Header-only mode: stop after the named element closes (FB2
    /// `<description>` scans).
    pub fn with_stop_tag(tree: &'d mut DomTree, sinks: DocSinks<'d>, tag: &str) -> Self {
        let mut writer = Self::new(tree, sinks);
        writer.stop_tag = Some(writer.base.tree.names.elem_id(tag));
        writer
    }

    pub fn error_flag(&self) -> bool {
        self.base.err_flag
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Pops frames up to and including the one with `id`. Stays put
    /// when no such frame is open (unbalanced input).
    fn pop(&mut self, id: crate::dom::ElemId) {
        let found = self
            .base
            .stack
            .iter()
            .rposition(|frame| frame.tag_id == id);
        let Some(found) = found else {
            self.base.err_flag = true;
            return;
        };
        if found == 0 {
            return; // never pop the root frame
        }
        while self.base.stack.len() > found {
            self.base.close_top();
        }
    }
}

impl ParserCallback for DomWriter<'_> {
    fn on_start(&mut self) {
        self.base.start();
    }

    fn on_tag_open(&mut self, ns: &str, name: &str) {
        if self.stopped {
            return;
        }
        let ns_id = if ns.is_empty() {
            NsId::NONE
        } else {
            self.base.tree.names.ns_id(ns)
        };
        let id = self.base.tree.names.elem_id(name);
        self.base.open_element(ns_id, id);
    }

    fn on_attribute(&mut self, ns: &str, name: &str, value: &str) {
        if self.stopped {
            return;
        }
        self.base.add_attribute(ns, name, value);
    }

    fn on_tag_body(&mut self) {
        if self.stopped {
            return;
        }
        if self.base.top_tag() == el::BODY {
            self.base.enter_body_with_styles();
        } else {
            self.base.body_enter();
        }
    }

    fn on_tag_close(&mut self, _ns: &str, name: &str, _self_closing: bool) {
        if self.stopped {
            return;
        }
        let id = self.base.tree.names.elem_id(name);
        let cur = self.base.top_tag();
        if id != cur {
            self.base.err_flag = true;
        }
        self.pop(id);
        if Some(id) == self.stop_tag {
            self.stopped = true;
        }
    }

    fn on_text(&mut self, text: &str, flags: u32) {
        if self.stopped {
            return;
        }
        if self.base.collect_head_style(text) {
            return;
        }
        self.base.text_to_current(text, flags);
    }

    fn on_blob(&mut self, name: &str, data: &[u8]) -> bool {
        self.base.add_blob(name, data)
    }

    fn on_doc_property(&mut self, name: &str, value: &str) {
        self.base.sinks.props.set(name, value);
    }

    fn on_stop(&mut self) {
        self.base.stop();
    }
}
