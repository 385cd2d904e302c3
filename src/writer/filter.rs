//! The lossy HTML writer: tag soup in, repaired DOM out.
//!
//! Follows the HTML Living Standard's tree-construction rules where
//! they matter for rendering: implicit `<html>/<head>/<body>`, optional
//! end tags (`<p>`, `<li>`, table parts, ruby parts…), scope-limited
//! closing, and foster parenting of content mis-nested into tables.
//! Parse errors never abort; the writer logs and repairs.

use crate::dom::boxing::is_empty_space;
use crate::dom::{attr, el, DomTree, ElemId, NodeHandle, NsId, TagFlags};
use crate::writer::{DocSinks, ParserCallback, WriterBase};

/// Ancestor-search boundaries for closing rules. A closing tag whose
/// open element is not found inside its scope is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// No boundary: walk to the root.
    None,
    /// html, table, td, th, caption, applet, marquee, object, template.
    Main,
    /// Main plus ol / ul.
    ListItem,
    /// html, table, template.
    Table,
    /// Everything stops it except optgroup / option.
    Select,
    /// Any "special" element.
    Specials,
    /// Close an open li; specials minus address/div/p stop the search.
    OpeningLi,
    /// Close an open dt/dd; same boundaries as OpeningLi.
    OpeningDtDd,
    /// Close the current node if it is h1..h6; never walk up.
    OpeningH1H6,
    /// Close any h1..h6; Main boundaries.
    ClosingH1H6,
    /// Close table sub-elements until directly inside the table.
    TableToTop,
    /// Close any open td/th; Table boundaries.
    TableOpeningTdTh,
}

enum Walk {
    Continue,
    FoundHere,
    Abort,
}

/// Active foster-parenting state: content opened while a table element
/// was current is being inserted before `table` under its parent.
struct Foster {
    table: NodeHandle,
    /// Stack depth when fostering began; the fostered node is the frame
    /// at this index.
    base_depth: usize,
}

pub struct DomWriterFilter<'d> {
    base: WriterBase<'d>,
    html_seen: bool,
    head_seen: bool,
    body_seen: bool,
    tag_body_called: bool,
    cur_self_closing: bool,
    cur_ignored: bool,
    /// Stack index of the innermost open `<p>`, so the many tags that
    /// close a paragraph skip the scope search.
    last_p: Option<usize>,
    foster: Option<Foster>,
    // lib.ru plain-text-in-HTML heuristics
    libru_to_detect: bool,
    libru_detected: bool,
    libru_parse_as_pre: bool,
}

impl<'d> DomWriterFilter<'d> {
    pub fn new(tree: &'d mut DomTree, sinks: DocSinks<'d>) -> Self {
        Self {
            base: WriterBase::new(tree, sinks),
            html_seen: false,
            head_seen: false,
            body_seen: false,
            tag_body_called: true,
            cur_self_closing: false,
            cur_ignored: false,
            last_p: None,
            foster: None,
            libru_to_detect: true,
            libru_detected: false,
            libru_parse_as_pre: false,
        }
    }

    pub fn error_flag(&self) -> bool {
        self.base.err_flag
    }

    fn tag_flags(&self, id: ElemId) -> TagFlags {
        self.base.tag_flags(id)
    }

    fn is_h(&self, id: ElemId) -> bool {
        id >= el::H1 && id <= el::H6
    }

    fn is_main_scope_stop(&self, id: ElemId) -> bool {
        matches!(
            id,
            el::HTML
                | el::TABLE
                | el::TD
                | el::TH
                | el::CAPTION
                | el::APPLET
                | el::MARQUEE
                | el::OBJECT
                | el::TEMPLATE
        )
    }

    fn scope_walk(&self, scope: Scope, index: usize, id: ElemId, target: ElemId) -> Walk {
        if target != ElemId::NONE && id == target && !matches!(scope, Scope::OpeningH1H6) {
            return Walk::FoundHere;
        }
        let flags = self.tag_flags(id);
        match scope {
            Scope::None => Walk::Continue,
            Scope::Main => {
                if self.is_main_scope_stop(id) {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::ListItem => {
                if self.is_main_scope_stop(id) || id == el::OL || id == el::UL {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::Table => {
                if id == el::HTML || id == el::TABLE || id == el::TEMPLATE {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::Select => {
                if id != el::OPTGROUP && id != el::OPTION {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::Specials => {
                if flags.contains(TagFlags::SPECIAL) {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::OpeningLi => {
                if id == el::LI {
                    Walk::FoundHere
                } else if flags.contains(TagFlags::SPECIAL)
                    && id != el::DIV
                    && id != el::P
                    && id != el::ADDRESS
                {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::OpeningDtDd => {
                if id == el::DT || id == el::DD {
                    Walk::FoundHere
                } else if flags.contains(TagFlags::SPECIAL)
                    && id != el::DIV
                    && id != el::P
                    && id != el::ADDRESS
                {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::OpeningH1H6 => {
                // Only the current node, and only if it is a heading:
                // <h3>…<h4> closes h3, <h3>…<b>…<h4> does not.
                if self.is_h(id) {
                    Walk::FoundHere
                } else {
                    Walk::Abort
                }
            }
            Scope::ClosingH1H6 => {
                if self.is_h(id) {
                    Walk::FoundHere
                } else if self.is_main_scope_stop(id) {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::TableToTop => {
                // Stop once the parent frame is the table itself.
                if index > 0 && self.base.stack[index - 1].tag_id == el::TABLE {
                    Walk::FoundHere
                } else if id == el::HTML || id == el::TABLE || id == el::TEMPLATE {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
            Scope::TableOpeningTdTh => {
                if id == el::TD || id == el::TH {
                    Walk::FoundHere
                } else if id == el::HTML || id == el::TABLE || id == el::TEMPLATE {
                    Walk::Abort
                } else {
                    Walk::Continue
                }
            }
        }
    }

    /// Finds the deepest frame matching `(target_id, scope)` and closes
    /// everything up to and including it. Returns the tag left current.
    fn pop_up_to(&mut self, target_index: Option<usize>, target_id: ElemId, scope: Scope) -> ElemId {
        let target = match target_index {
            Some(i) => Some(i),
            None => {
                let mut found = None;
                let mut i = self.base.stack.len();
                while i > 1 {
                    i -= 1;
                    if let Some(f) = &self.foster {
                        if i < f.base_depth {
                            // Never close past the fostered node.
                            break;
                        }
                    }
                    let id = self.base.stack[i].tag_id;
                    match self.scope_walk(scope, i, id, target_id) {
                        Walk::FoundHere => {
                            found = Some(i);
                            break;
                        }
                        Walk::Abort => break,
                        Walk::Continue => {}
                    }
                }
                found
            }
        };
        if let Some(target) = target {
            self.pop_frames_to(target);
        }
        self.base.top_tag()
    }

    /// Pops frames until `target` is popped too, maintaining the
    /// implicit-container flags, the last-P pointer and foster state.
    fn pop_frames_to(&mut self, target: usize) {
        while self.base.stack.len() > target.max(1) {
            let idx = self.base.stack.len() - 1;
            let tag = self.base.stack[idx].tag_id;
            // Seeing these close means they may legitimately reopen.
            if tag == el::BODY {
                self.body_seen = false;
            } else if tag == el::HTML {
                self.html_seen = false;
                self.head_seen = false;
            }
            if self.last_p == Some(idx) {
                self.last_p = None;
            }
            let mut fostered_closed = false;
            if let Some(f) = &self.foster {
                if idx == f.base_depth {
                    // Closing the fostered node restores the insertion
                    // point inside the table.
                    self.foster = None;
                    fostered_closed = true;
                }
            }
            self.base.close_top();
            if fostered_closed {
                break;
            }
        }
    }

    /// True when the current element is a table container that only
    /// accepts table sub-elements.
    fn in_foster_context(&self) -> bool {
        let cur = self.base.top_tag();
        self.tag_flags(cur).contains(TagFlags::TABLE_PART)
            && cur != el::CAPTION
            && cur != el::TD
            && cur != el::TH
            && cur != el::COL
    }

    /// Decides whether `tag_id` must be foster-parented. Returns the
    /// insertion point `(parent_of_table, index_of_table)` when so.
    fn check_foster_parenting(&mut self, tag_id: ElemId) -> Option<(NodeHandle, usize)> {
        if self.foster.is_none() && self.in_foster_context() {
            if !self.tag_flags(tag_id).contains(TagFlags::TABLE_PART) {
                // Locate the containing table frame.
                let table_frame = self
                    .base
                    .stack
                    .iter()
                    .rposition(|f| f.tag_id == el::TABLE)?;
                let table = self.base.stack[table_frame].element;
                let parent = self.base.tree.parent(table).ok()?;
                if parent.is_null() {
                    return None;
                }
                let index = self.base.tree.child_index_of(parent, table).ok()??;
                self.foster = Some(Foster {
                    table,
                    base_depth: self.base.stack.len(),
                });
                log::debug!("foster parenting <{}>", self.base.tree.names.elem_name(tag_id));
                return Some((parent, index));
            }
            return None;
        }
        if self.foster.is_some() && self.tag_flags(tag_id).contains(TagFlags::TABLE_PART) {
            // A table sub-element ends the fostering excursion.
            let base = self.foster.as_ref().expect("foster active").base_depth;
            self.pop_frames_to(base);
        }
        None
    }

    /// Inserts foster-parented text before the table.
    fn foster_text(&mut self, text: &str) -> bool {
        if self.foster.is_some() || !self.in_foster_context() || is_empty_space(text) {
            return false;
        }
        let Some(table_frame) = self
            .base
            .stack
            .iter()
            .rposition(|f| f.tag_id == el::TABLE)
        else {
            return false;
        };
        let table = self.base.stack[table_frame].element;
        let Ok(parent) = self.base.tree.parent(table) else {
            return false;
        };
        if parent.is_null() {
            return false;
        }
        if let Ok(Some(index)) = self.base.tree.child_index_of(parent, table) {
            let _ = self.base.tree.insert_child_text(parent, index, text);
            return true;
        }
        false
    }

    /// Implicit `<html>/<head>/<body>` creation plus the auto-close
    /// rules for one parser step. Returns false when the tag is to be
    /// ignored outright.
    fn auto_open_close_pop(&mut self, step: Step, tag_id: ElemId) -> bool {
        let mut cur = self.base.top_tag();
        let flags = self.tag_flags(tag_id);
        if !self.body_seen && matches!(step, Step::Opening | Step::Text) {
            if !self.head_seen {
                if !self.html_seen {
                    self.html_seen = true;
                    if tag_id != el::HTML {
                        self.on_tag_open("", "html");
                        self.on_tag_body();
                    }
                }
                if flags.contains(TagFlags::IN_HEAD) || tag_id == el::NOSCRIPT {
                    self.head_seen = true;
                    if tag_id != el::HEAD {
                        self.on_tag_open("", "head");
                        self.on_tag_body();
                    }
                }
                cur = self.base.top_tag();
            }
            let body_content = step == Step::Opening
                && tag_id != el::HTML
                && tag_id != el::HEAD
                && tag_id != el::NOSCRIPT
                && !flags.contains(TagFlags::IN_HEAD);
            let text_needs_body =
                step == Step::Text && (cur == el::HTML || cur == el::HEAD || cur == ElemId::NONE);
            if body_content || text_needs_body || tag_id == el::BODY {
                if self.head_seen {
                    self.on_tag_close("", "head", false);
                } else {
                    self.head_seen = true; // no <head> will open anymore
                }
                self.body_seen = true;
                if tag_id != el::BODY {
                    self.on_tag_open("", "body");
                    self.on_tag_body();
                }
            }
        }
        let _ = cur;
        if step == Step::Text {
            return true;
        }

        let self_closing = flags.contains(TagFlags::SELF_CLOSING);

        if step == Step::Opening {
            // Table sub-elements: create missing containers, close
            // previous cells/rows, or ignore standalone debris.
            if tag_id == el::TD || tag_id == el::TH {
                cur = self.pop_up_to(None, ElemId::NONE, Scope::TableOpeningTdTh);
                let in_table = self.tag_flags(cur).contains(TagFlags::TABLE_PART)
                    && cur != el::TD
                    && cur != el::TH;
                if !in_table {
                    return false; // standalone cell: ignored
                }
                if cur != el::TR {
                    self.on_tag_open("", "tr");
                    self.on_tag_body();
                }
            } else if tag_id == el::TR {
                cur = self.pop_up_to(None, tag_id, Scope::Table);
                let ok = matches!(
                    cur,
                    el::TABLE | el::CAPTION | el::COLGROUP | el::THEAD | el::TBODY | el::TFOOT
                );
                if !ok {
                    return false; // standalone row: ignored
                }
                if !self.tag_flags(cur).contains(TagFlags::ROW_GROUP) {
                    self.on_tag_open("", "tbody");
                    self.on_tag_body();
                }
            } else if tag_id == el::COL {
                cur = self.pop_up_to(None, tag_id, Scope::Table);
                if !self.tag_flags(cur).contains(TagFlags::TABLE_PART) {
                    return false;
                }
                if cur != el::COLGROUP {
                    self.on_tag_open("", "colgroup");
                    self.on_tag_body();
                }
            } else if self.tag_flags(tag_id).contains(TagFlags::ROW_GROUP)
                || tag_id == el::CAPTION
                || tag_id == el::COLGROUP
            {
                cur = self.pop_up_to(None, ElemId::NONE, Scope::TableToTop);
                if cur != el::TABLE {
                    return false;
                }
            }

            if tag_id == el::LI {
                self.pop_up_to(None, tag_id, Scope::OpeningLi);
            } else if tag_id == el::DT || tag_id == el::DD {
                self.pop_up_to(None, ElemId::NONE, Scope::OpeningDtDd);
            } else if tag_id == el::SELECT {
                self.pop_up_to(None, tag_id, Scope::Select);
            }
            if self.last_p.is_some() && self.tag_flags(tag_id).contains(TagFlags::CLOSES_P) {
                // Every such element closes a P "in button scope"; the
                // remembered frame makes the scope search unnecessary.
                let last_p = self.last_p.expect("checked above");
                self.pop_up_to(Some(last_p), ElemId::NONE, Scope::None);
            }
            if self.is_h(tag_id) {
                self.pop_up_to(None, ElemId::NONE, Scope::OpeningH1H6);
            } else if self.base.top_tag() == el::OPTION
                && (tag_id == el::OPTGROUP || tag_id == el::OPTION)
            {
                let top = self.base.stack.len() - 1;
                self.pop_up_to(Some(top), ElemId::NONE, Scope::None);
            } else if tag_id >= el::RBC && tag_id <= el::RP {
                // Ruby sub-elements auto-close their predecessors:
                // rbc/rtc close any of rbc..rp, rb closes rb..rp, and
                // rt/rp close rb..rp except an open rtc.
                loop {
                    let cur = self.base.top_tag();
                    let close = if tag_id == el::RBC || tag_id == el::RTC {
                        cur >= el::RBC && cur <= el::RP
                    } else if tag_id == el::RB {
                        cur >= el::RB && cur <= el::RP
                    } else {
                        cur >= el::RBC && cur <= el::RP && cur != el::RTC
                    };
                    if !close {
                        break;
                    }
                    let top = self.base.stack.len() - 1;
                    self.pop_up_to(Some(top), ElemId::NONE, Scope::None);
                }
            }
            self.cur_self_closing = self_closing;
            return true;
        }

        // Closing (or self-closing) step.
        if self_closing {
            // A standalone </br> inserts a fresh <br/>; other closing
            // tags of void elements are ignored.
            if tag_id == el::BR && step == Step::Closing {
                self.on_tag_open("", "br");
                self.on_tag_body();
                return true;
            }
            return false;
        }
        if tag_id == self.base.top_tag() {
            let top = self.base.stack.len() - 1;
            self.pop_up_to(Some(top), ElemId::NONE, Scope::None);
            return true;
        }
        if tag_id == el::P && self.last_p.is_none() {
            // </p> with no open <p> emits an empty paragraph.
            self.on_tag_open("", "p");
            self.on_tag_body();
            let top = self.base.stack.len() - 1;
            self.pop_up_to(Some(top), ElemId::NONE, Scope::None);
            return true;
        }
        let flags = self.tag_flags(tag_id);
        if !flags.contains(TagFlags::SPECIAL) {
            // Inline elements don't close across specials.
            self.pop_up_to(None, tag_id, Scope::Specials);
        } else if self.is_h(tag_id) {
            self.pop_up_to(None, tag_id, Scope::ClosingH1H6);
        } else if tag_id == el::LI {
            self.pop_up_to(None, tag_id, Scope::ListItem);
        } else if flags.contains(TagFlags::TABLE_PART) {
            self.pop_up_to(None, tag_id, Scope::Table);
        } else {
            self.pop_up_to(None, tag_id, Scope::Main);
        }
        true
    }

    // --- lib.ru plain-text heuristics ---

    fn libru_check_form(&mut self) {
        if !self.libru_to_detect {
            return;
        }
        // A <form> as first content of an aligned <div> marks the
        // plaintext-in-HTML lib.ru book layout.
        let parent_is_aligned_div = self.base.stack.len() >= 2 && {
            let parent = &self.base.stack[self.base.stack.len() - 2];
            parent.tag_id == el::DIV && {
                let e = parent.element;
                self.base
                    .tree
                    .attr_str(e, NsId::NONE, attr::ALIGN)
                    .ok()
                    .flatten()
                    .is_some()
            }
        };
        if parent_is_aligned_div {
            self.libru_detected = true;
            log::info!("lib.ru style document detected");
            // The form itself carries navigation junk: hide it.
            self.base.append_style("display: none");
        }
        self.libru_to_detect = false;
    }

    fn libru_text_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed.len() >= 3
            && trimmed
                .chars()
                .all(|c| matches!(c, '-' | '=' | '_' | '*' | '~'))
        {
            self.on_tag_open("", "hr");
            self.on_tag_body();
            return;
        }
        let has_letters = trimmed.chars().any(|c| c.is_alphabetic());
        let is_heading = has_letters
            && trimmed
                .chars()
                .filter(|c| c.is_alphabetic())
                .all(|c| c.is_uppercase());
        let tag = if is_heading { "h2" } else { "p" };
        self.on_tag_open("", tag);
        self.on_tag_body();
        self.base.text_to_current(trimmed, 0);
        self.on_tag_close("", tag, false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Opening,
    Closing,
    SelfClosing,
    Text,
}

impl ParserCallback for DomWriterFilter<'_> {
    fn on_start(&mut self) {
        self.base.start();
    }

    fn on_tag_open(&mut self, ns: &str, name: &str) {
        if !self.tag_body_called {
            log::warn!("tag <{name}> opened before the previous tag's body");
            self.on_tag_body();
        }
        self.cur_ignored = false;
        let ns_id = if ns.is_empty() {
            NsId::NONE
        } else {
            self.base.tree.names.ns_id(ns)
        };
        let mut id = self.base.tree.names.elem_id(name);

        if self.libru_detected && id == el::PRE {
            // lib.ru books carry their whole text in one <pre>: re-tag
            // it as a div parsed line-by-line into paragraphs.
            self.libru_parse_as_pre = true;
            id = el::DIV;
            let fostered = self.check_foster_parenting(id);
            let opened = match fostered {
                Some((parent, index)) => {
                    self.base.open_element_at(ns_id, id, Some(parent), Some(index))
                }
                None => self.base.open_element(ns_id, id),
            };
            if !opened.is_null() {
                let _ = self
                    .base
                    .tree
                    .set_attr(opened, NsId::NONE, attr::PARSER_HINT, "ParseAsPre");
            }
            self.tag_body_called = false;
            return;
        }

        if let Some((parent, index)) = self.check_foster_parenting(id) {
            self.base.open_element_at(ns_id, id, Some(parent), Some(index));
            self.cur_self_closing = self.tag_flags(id).contains(TagFlags::SELF_CLOSING);
        } else {
            if !self.auto_open_close_pop(Step::Opening, id) {
                log::debug!("ignoring stray <{name}>");
                self.cur_ignored = true;
                self.tag_body_called = true;
                return;
            }
            self.base.open_element(ns_id, id);
        }
        if id == el::P {
            self.last_p = Some(self.base.stack.len() - 1);
        }
        if id == el::FORM {
            self.libru_check_form();
        }
        self.tag_body_called = false;
    }

    fn on_attribute(&mut self, ns: &str, name: &str, value: &str) {
        if self.cur_ignored {
            return;
        }
        let cur = self.base.top_tag();
        let lower = name.to_ascii_lowercase();
        // Deprecated presentational attributes become inline style.
        match lower.as_str() {
            "align" => {
                let value = value.to_ascii_lowercase();
                if matches!(value.as_str(), "left" | "right" | "center" | "justify") {
                    self.base.append_style(&format!("text-align: {value}"));
                }
                // Keep the raw attribute too; heuristics inspect it.
                self.base.add_attribute(ns, name, &value);
                return;
            }
            "valign" => {
                let value = value.to_ascii_lowercase();
                if matches!(value.as_str(), "top" | "middle" | "bottom") {
                    self.base.append_style(&format!("vertical-align: {value}"));
                }
                return;
            }
            "width" if self.tag_flags(cur).contains(TagFlags::TABLE_PART) || cur == el::HR => {
                let value = value.trim();
                if let Some(pc) = value.strip_suffix('%') {
                    if pc.chars().all(|c| c.is_ascii_digit()) {
                        self.base.append_style(&format!("width: {pc}%"));
                        return;
                    }
                } else if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() {
                    self.base.append_style(&format!("width: {value}px"));
                    return;
                }
            }
            _ => {}
        }
        self.base.add_attribute(ns, name, value);
    }

    fn on_tag_body(&mut self) {
        self.tag_body_called = true;
        if self.cur_ignored {
            self.cur_ignored = false;
            return;
        }
        if self.base.top_tag() == el::BODY {
            self.base.enter_body_with_styles();
        } else {
            self.base.body_enter();
        }
        if self.cur_self_closing {
            self.cur_self_closing = false;
            let top = self.base.stack.len() - 1;
            self.pop_frames_to(top);
        }
    }

    fn on_tag_close(&mut self, _ns: &str, name: &str, self_closing: bool) {
        if !self.tag_body_called {
            self.on_tag_body();
        }
        let id = self.base.tree.names.elem_id(name);

        if self.libru_to_detect && id == el::DIV {
            // First <div> closed without the form marker: plain HTML.
            self.libru_to_detect = false;
        }
        if self.libru_parse_as_pre && id == el::PRE {
            self.libru_parse_as_pre = false;
            // Close the re-tagged div.
            self.auto_open_close_pop(Step::Closing, el::DIV);
            return;
        }

        let step = if self_closing {
            Step::SelfClosing
        } else {
            Step::Closing
        };
        self.auto_open_close_pop(step, id);
    }

    fn on_text(&mut self, text: &str, flags: u32) {
        if self.libru_parse_as_pre {
            let text = text.to_string();
            for line in text.lines() {
                self.libru_text_line(line);
            }
            return;
        }
        if !self.body_seen && is_empty_space(text) {
            return; // whitespace never forces document structure
        }
        if self.base.collect_head_style(text) {
            return;
        }
        self.auto_open_close_pop(Step::Text, ElemId::NONE);
        if self.foster_text(text) {
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
