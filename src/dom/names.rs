//! Interned names: element tags, attribute names, namespaces and
//! attribute values.
//!
//! Ids are dense and document-scoped. A fixed table of built-in tags
//! occupies the low element ids so tag classification (boxing, specials,
//! table parts, head content…) is a property lookup rather than a string
//! compare; author tags unknown to the table intern after the built-ins.
//! The tables serialize into the `MapsData` block and must round-trip
//! byte-identically.

use std::collections::HashMap;

use crate::error::Result;
use crate::serial::{SerialReader, SerialWriter};
use crate::style::Display;

/// Element tag id. Id 0 is reserved for "unknown/root".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ElemId {
    pub const NONE: ElemId = ElemId(0);
}

impl NsId {
    pub const NONE: NsId = NsId(0);
}

// A minimal bitflags expansion; the dependency isn't worth it for one type.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $($(#[$fmeta:meta])* const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $($(#[$fmeta])* pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

bitflags_lite! {
    /// Tag classification flags used by the writers and boxing passes.
    pub struct TagFlags: u32 {
        /// Anonymous wrapper inserted by the engine, never by authors.
        const BOXING = 1 << 0;
        /// HTML5 "special" element (inline tags don't close across it).
        const SPECIAL = 1 << 1;
        /// Opening this tag closes an open `<p>`.
        const CLOSES_P = 1 << 2;
        /// Normally lives in `<head>`.
        const IN_HEAD = 1 << 3;
        /// Void element (self-closing in HTML).
        const SELF_CLOSING = 1 << 4;
        /// Element may hold text children.
        const ALLOW_TEXT = 1 << 5;
        /// Replaced object (image-like): always renders final.
        const OBJECT = 1 << 6;
        /// Any table element (table through td).
        const TABLE_PART = 1 << 7;
        /// thead / tbody / tfoot.
        const ROW_GROUP = 1 << 8;
        /// Ruby sub-element (rbc, rb, rtc, rt, rp).
        const RUBY_PART = 1 << 9;
    }
}

/// Static definition of a built-in tag.
pub struct TagDef {
    pub name: &'static str,
    pub display: Display,
    pub flags: TagFlags,
}

macro_rules! tag {
    ($name:literal, $display:ident $(, $flag:ident)*) => {
        TagDef {
            name: $name,
            display: Display::$display,
            flags: TagFlags::empty() $(.union(TagFlags::$flag))*,
        }
    };
}

/// Built-in tags, in id order starting at 1. The boxing wrappers come
/// first so `is_boxing` stays a cheap range check even for documents
/// loaded from old caches.
pub static BUILTIN_TAGS: &[TagDef] = &[
    tag!("autoBoxing", Block, BOXING),
    tag!("tabularBox", Block, BOXING),
    tag!("rubyBox", Inline, BOXING, ALLOW_TEXT),
    tag!("floatBox", Block, BOXING),
    tag!("inlineBox", Inline, BOXING),
    tag!("pseudoElem", Inline, BOXING, ALLOW_TEXT),
    tag!("DocFragment", Block),
    tag!("stylesheet", None, ALLOW_TEXT),
    // Document structure
    tag!("html", Block, SPECIAL),
    tag!("head", None, SPECIAL, IN_HEAD),
    tag!("title", None, SPECIAL, IN_HEAD, ALLOW_TEXT),
    tag!("style", None, SPECIAL, IN_HEAD, ALLOW_TEXT),
    tag!("base", None, SPECIAL, IN_HEAD, SELF_CLOSING),
    tag!("link", None, SPECIAL, IN_HEAD, SELF_CLOSING),
    tag!("meta", None, SPECIAL, IN_HEAD, SELF_CLOSING),
    tag!("script", None, SPECIAL, IN_HEAD, ALLOW_TEXT),
    tag!("noscript", None, SPECIAL),
    tag!("body", Block, SPECIAL, ALLOW_TEXT),
    // Block-level elements (all close an open <p>)
    tag!("address", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("article", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("aside", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("blockquote", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("center", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("details", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("dir", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("div", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("dl", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("fieldset", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("figcaption", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("figure", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("footer", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("form", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h1", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h2", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h3", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h4", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h5", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("h6", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("header", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("hgroup", Block, SPECIAL, CLOSES_P),
    tag!("hr", Block, SPECIAL, CLOSES_P, SELF_CLOSING),
    tag!("main", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("menu", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("nav", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("ol", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("p", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("pre", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("section", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("summary", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("ul", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    tag!("xmp", Block, SPECIAL, CLOSES_P, ALLOW_TEXT),
    // Table elements; their relative order is relied on nowhere, the
    // TABLE_PART / ROW_GROUP flags are.
    tag!("table", Table, SPECIAL, CLOSES_P, TABLE_PART),
    tag!("caption", TableCaption, SPECIAL, TABLE_PART, ALLOW_TEXT),
    tag!("colgroup", TableColumnGroup, SPECIAL, TABLE_PART),
    tag!("col", TableColumn, SPECIAL, TABLE_PART, SELF_CLOSING),
    tag!("thead", TableHeaderGroup, SPECIAL, TABLE_PART, ROW_GROUP),
    tag!("tbody", TableRowGroup, SPECIAL, TABLE_PART, ROW_GROUP),
    tag!("tfoot", TableFooterGroup, SPECIAL, TABLE_PART, ROW_GROUP),
    tag!("tr", TableRow, SPECIAL, TABLE_PART),
    tag!("th", TableCell, SPECIAL, TABLE_PART, ALLOW_TEXT),
    tag!("td", TableCell, SPECIAL, TABLE_PART, ALLOW_TEXT),
    // List items and friends
    tag!("li", ListItem, SPECIAL, ALLOW_TEXT),
    tag!("dt", Block, SPECIAL, ALLOW_TEXT),
    tag!("dd", Block, SPECIAL, ALLOW_TEXT),
    // Form controls and legacy containers
    tag!("button", InlineBlock, SPECIAL, ALLOW_TEXT),
    tag!("select", Inline, SPECIAL),
    tag!("option", Block, ALLOW_TEXT),
    tag!("optgroup", Block, ALLOW_TEXT),
    tag!("applet", Block, SPECIAL),
    tag!("marquee", Block, SPECIAL),
    tag!("object", Inline, SPECIAL),
    tag!("template", None, SPECIAL),
    tag!("iframe", Inline, SPECIAL),
    tag!("frame", None, SPECIAL, SELF_CLOSING),
    tag!("frameset", None, SPECIAL),
    // Void elements not already listed
    tag!("area", Inline, SPECIAL, SELF_CLOSING),
    tag!("br", Inline, SPECIAL, SELF_CLOSING),
    tag!("embed", Inline, SPECIAL, SELF_CLOSING, OBJECT),
    tag!("img", Inline, SPECIAL, SELF_CLOSING, OBJECT),
    tag!("input", Inline, SPECIAL, SELF_CLOSING),
    tag!("param", None, SPECIAL, SELF_CLOSING),
    tag!("source", None, SPECIAL, SELF_CLOSING),
    tag!("track", None, SPECIAL, SELF_CLOSING),
    tag!("wbr", Inline, SPECIAL, SELF_CLOSING),
    tag!("image", Inline, OBJECT), // FB2 image element
    // Ruby; rbc before rb and rtc before rt mirrors the auto-close rules
    tag!("ruby", Ruby, ALLOW_TEXT),
    tag!("rbc", Inline, RUBY_PART, ALLOW_TEXT),
    tag!("rb", Inline, RUBY_PART, ALLOW_TEXT),
    tag!("rtc", Inline, RUBY_PART, ALLOW_TEXT),
    tag!("rt", Inline, RUBY_PART, ALLOW_TEXT),
    tag!("rp", Inline, RUBY_PART, ALLOW_TEXT),
    // Inline elements
    tag!("a", Inline, ALLOW_TEXT),
    tag!("abbr", Inline, ALLOW_TEXT),
    tag!("acronym", Inline, ALLOW_TEXT),
    tag!("b", Inline, ALLOW_TEXT),
    tag!("bdi", Inline, ALLOW_TEXT),
    tag!("bdo", Inline, ALLOW_TEXT),
    tag!("big", Inline, ALLOW_TEXT),
    tag!("cite", Inline, ALLOW_TEXT),
    tag!("code", Inline, ALLOW_TEXT),
    tag!("del", Inline, ALLOW_TEXT),
    tag!("dfn", Inline, ALLOW_TEXT),
    tag!("em", Inline, ALLOW_TEXT),
    tag!("font", Inline, ALLOW_TEXT),
    tag!("i", Inline, ALLOW_TEXT),
    tag!("ins", Inline, ALLOW_TEXT),
    tag!("kbd", Inline, ALLOW_TEXT),
    tag!("label", Inline, ALLOW_TEXT),
    tag!("mark", Inline, ALLOW_TEXT),
    tag!("q", Inline, ALLOW_TEXT),
    tag!("s", Inline, ALLOW_TEXT),
    tag!("samp", Inline, ALLOW_TEXT),
    tag!("small", Inline, ALLOW_TEXT),
    tag!("span", Inline, ALLOW_TEXT),
    tag!("strike", Inline, ALLOW_TEXT),
    tag!("strong", Inline, ALLOW_TEXT),
    tag!("sub", Inline, ALLOW_TEXT),
    tag!("sup", Inline, ALLOW_TEXT),
    tag!("tt", Inline, ALLOW_TEXT),
    tag!("u", Inline, ALLOW_TEXT),
    tag!("var", Inline, ALLOW_TEXT),
];

/// Well-known element ids (position in `BUILTIN_TAGS` + 1).
pub mod el {
    use super::ElemId;

    macro_rules! ids {
        ($($name:ident = $idx:expr;)*) => {
            $(pub const $name: ElemId = ElemId($idx);)*
        };
    }

    ids! {
        AUTO_BOXING = 1;
        TABULAR_BOX = 2;
        RUBY_BOX = 3;
        FLOAT_BOX = 4;
        INLINE_BOX = 5;
        PSEUDO_ELEM = 6;
        DOC_FRAGMENT = 7;
        STYLESHEET = 8;
        HTML = 9;
        HEAD = 10;
        TITLE = 11;
        STYLE = 12;
        BASE = 13;
        LINK = 14;
        META = 15;
        SCRIPT = 16;
        NOSCRIPT = 17;
        BODY = 18;
        ADDRESS = 19;
        BLOCKQUOTE = 22;
        DIV = 26;
        DL = 27;
        FORM = 32;
        H1 = 33;
        H2 = 34;
        H3 = 35;
        H4 = 36;
        H5 = 37;
        H6 = 38;
        HR = 41;
        OL = 45;
        P = 46;
        PRE = 47;
        SECTION = 48;
        UL = 50;
        TABLE = 52;
        CAPTION = 53;
        COLGROUP = 54;
        COL = 55;
        THEAD = 56;
        TBODY = 57;
        TFOOT = 58;
        TR = 59;
        TH = 60;
        TD = 61;
        LI = 62;
        DT = 63;
        DD = 64;
        BUTTON = 65;
        SELECT = 66;
        OPTION = 67;
        OPTGROUP = 68;
        APPLET = 69;
        MARQUEE = 70;
        OBJECT = 71;
        TEMPLATE = 72;
        BR = 77;
        IMG = 79;
        IMAGE = 85;
        RUBY = 86;
        RBC = 87;
        RB = 88;
        RTC = 89;
        RT = 90;
        RP = 91;
        A = 92;
        SPAN = 114;
    }
}

/// Well-known attribute ids (position in `BUILTIN_ATTRS` + 1).
pub mod attr {
    use super::AttrId;

    macro_rules! ids {
        ($($name:ident = $idx:expr;)*) => {
            $(pub const $name: AttrId = AttrId($idx);)*
        };
    }

    ids! {
        ID = 1;
        CLASS = 2;
        STYLE = 3;
        NAME = 4;
        HREF = 5;
        SRC = 6;
        REL = 7;
        TYPE = 8;
        TITLE = 9;
        ALIGN = 10;
        VALIGN = 11;
        WIDTH = 12;
        HEIGHT = 13;
        COLSPAN = 14;
        ROWSPAN = 15;
        RBSPAN = 16;
        T = 17;
        BEFORE = 18;
        AFTER = 19;
        PARSER_HINT = 20;
        NON_LINEAR = 21;
    }
}

pub static BUILTIN_ATTRS: &[&str] = &[
    "id", "class", "style", "name", "href", "src", "rel", "type", "title", "align", "valign",
    "width", "height", "colspan", "rowspan", "rbspan", "T", "Before", "After", "ParserHint",
    "NonLinear",
];

/// A bidirectional id ↔ string table with dense ids.
pub struct NameTable {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl NameTable {
    /// An empty table; id 0 is reserved and maps to the empty string.
    pub fn new() -> Self {
        Self {
            names: vec![String::new()],
            ids: HashMap::new(),
        }
    }

    pub fn with_builtins(builtins: impl IntoIterator<Item = &'static str>) -> Self {
        let mut table = Self::new();
        for name in builtins {
            table.intern(name);
        }
        table
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if name.is_empty() {
            return 0;
        }
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        if name.is_empty() {
            return Some(0);
        }
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }

    /// Serializes the table; ids are implicit in the order, so a
    /// re-serialized table is byte-identical.
    pub fn encode(&self, w: &mut SerialWriter) {
        w.put_u32(self.names.len() as u32);
        for name in &self.names[1..] {
            w.put_str(name);
        }
    }

    pub fn decode(r: &mut SerialReader) -> Result<Self> {
        let count = r.get_u32()? as usize;
        let mut table = Self::new();
        for _ in 1..count {
            let name = r.get_string()?;
            table.intern(&name);
        }
        Ok(table)
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The document's four intern tables plus tag classification.
pub struct NameRegistry {
    pub elements: NameTable,
    pub attributes: NameTable,
    pub namespaces: NameTable,
    pub values: NameTable,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            elements: NameTable::with_builtins(BUILTIN_TAGS.iter().map(|t| t.name)),
            attributes: NameTable::with_builtins(BUILTIN_ATTRS.iter().copied()),
            namespaces: NameTable::new(),
            values: NameTable::new(),
        }
    }

    pub fn elem_id(&mut self, name: &str) -> ElemId {
        ElemId(self.elements.intern(name) as u16)
    }

    pub fn attr_id(&mut self, name: &str) -> AttrId {
        AttrId(self.attributes.intern(name) as u16)
    }

    pub fn ns_id(&mut self, name: &str) -> NsId {
        NsId(self.namespaces.intern(name) as u16)
    }

    pub fn value_id(&mut self, value: &str) -> ValueId {
        ValueId(self.values.intern(value))
    }

    pub fn elem_name(&self, id: ElemId) -> &str {
        self.elements.name(id.0 as u32).unwrap_or("")
    }

    pub fn attr_name(&self, id: AttrId) -> &str {
        self.attributes.name(id.0 as u32).unwrap_or("")
    }

    pub fn ns_name(&self, id: NsId) -> &str {
        self.namespaces.name(id.0 as u32).unwrap_or("")
    }

    pub fn value(&self, id: ValueId) -> &str {
        self.values.name(id.0).unwrap_or("")
    }

    pub fn tag_def(&self, id: ElemId) -> Option<&'static TagDef> {
        if id.0 == 0 {
            return None;
        }
        BUILTIN_TAGS.get(id.0 as usize - 1)
    }

    pub fn tag_flags(&self, id: ElemId) -> TagFlags {
        self.tag_def(id).map(|t| t.flags).unwrap_or_default()
    }

    /// Default display for a tag; custom tags default to block, like the
    /// unknown-element fallback of the original engine.
    pub fn default_display(&self, id: ElemId) -> Display {
        self.tag_def(id).map(|t| t.display).unwrap_or(Display::Block)
    }

    pub fn is_boxing(&self, id: ElemId) -> bool {
        self.tag_flags(id).contains(TagFlags::BOXING)
    }

    pub fn allow_text(&self, id: ElemId) -> bool {
        // Custom (non-built-in) tags allow text, matching the default
        // for elements not described by the type table.
        self.tag_def(id).map(|t| t.flags.contains(TagFlags::ALLOW_TEXT)).unwrap_or(true)
    }

    pub fn encode(&self, w: &mut SerialWriter) {
        self.elements.encode(w);
        self.attributes.encode(w);
        self.namespaces.encode(w);
        self.values.encode(w);
    }

    pub fn decode(r: &mut SerialReader) -> Result<Self> {
        let elements = NameTable::decode(r)?;
        let attributes = NameTable::decode(r)?;
        let namespaces = NameTable::decode(r)?;
        let values = NameTable::decode(r)?;
        Ok(Self {
            elements,
            attributes,
            namespaces,
            values,
        })
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{SerialReader, SerialWriter};

    #[test]
    fn test_builtin_id_constants_match_table() {
        let reg = NameRegistry::new();
        for (id, name) in [
            (el::AUTO_BOXING, "autoBoxing"),
            (el::TABULAR_BOX, "tabularBox"),
            (el::RUBY_BOX, "rubyBox"),
            (el::FLOAT_BOX, "floatBox"),
            (el::INLINE_BOX, "inlineBox"),
            (el::PSEUDO_ELEM, "pseudoElem"),
            (el::HTML, "html"),
            (el::HEAD, "head"),
            (el::BODY, "body"),
            (el::DIV, "div"),
            (el::H1, "h1"),
            (el::H6, "h6"),
            (el::P, "p"),
            (el::PRE, "pre"),
            (el::TABLE, "table"),
            (el::CAPTION, "caption"),
            (el::COLGROUP, "colgroup"),
            (el::COL, "col"),
            (el::THEAD, "thead"),
            (el::TBODY, "tbody"),
            (el::TFOOT, "tfoot"),
            (el::TR, "tr"),
            (el::TH, "th"),
            (el::TD, "td"),
            (el::LI, "li"),
            (el::DT, "dt"),
            (el::DD, "dd"),
            (el::BUTTON, "button"),
            (el::SELECT, "select"),
            (el::OPTION, "option"),
            (el::OPTGROUP, "optgroup"),
            (el::APPLET, "applet"),
            (el::MARQUEE, "marquee"),
            (el::OBJECT, "object"),
            (el::TEMPLATE, "template"),
            (el::BR, "br"),
            (el::IMG, "img"),
            (el::IMAGE, "image"),
            (el::RUBY, "ruby"),
            (el::RBC, "rbc"),
            (el::RB, "rb"),
            (el::RTC, "rtc"),
            (el::RT, "rt"),
            (el::RP, "rp"),
            (el::A, "a"),
            (el::SPAN, "span"),
            (el::HR, "hr"),
            (el::OL, "ol"),
            (el::UL, "ul"),
            (el::FORM, "form"),
            (el::STYLESHEET, "stylesheet"),
            (el::SCRIPT, "script"),
            (el::TITLE, "title"),
            (el::STYLE, "style"),
            (el::LINK, "link"),
            (el::ADDRESS, "address"),
            (el::BLOCKQUOTE, "blockquote"),
            (el::SECTION, "section"),
            (el::DL, "dl"),
        ] {
            assert_eq!(reg.elem_name(id), name, "id {:?}", id);
        }
    }

    #[test]
    fn test_attr_id_constants_match_table() {
        let reg = NameRegistry::new();
        assert_eq!(reg.attr_name(attr::ID), "id");
        assert_eq!(reg.attr_name(attr::STYLE), "style");
        assert_eq!(reg.attr_name(attr::ALIGN), "align");
        assert_eq!(reg.attr_name(attr::T), "T");
        assert_eq!(reg.attr_name(attr::PARSER_HINT), "ParserHint");
        assert_eq!(reg.attr_name(attr::NON_LINEAR), "NonLinear");
    }

    #[test]
    fn test_custom_tags_intern_after_builtins() {
        let mut reg = NameRegistry::new();
        let a = reg.elem_id("FictionBook");
        let b = reg.elem_id("FictionBook");
        assert_eq!(a, b);
        assert!(a.0 as usize > BUILTIN_TAGS.len());
        assert!(!reg.is_boxing(a));
        assert!(reg.allow_text(a));
    }

    #[test]
    fn test_registry_round_trips_byte_identical() {
        let mut reg = NameRegistry::new();
        reg.elem_id("custom-tag");
        reg.attr_id("epub:type");
        reg.ns_id("xlink");
        reg.value_id("chapter one");

        let mut w = SerialWriter::new();
        reg.encode(&mut w);
        let bytes = w.into_vec();

        let mut r = SerialReader::new(&bytes);
        let back = NameRegistry::decode(&mut r).unwrap();
        let mut w2 = SerialWriter::new();
        back.encode(&mut w2);
        assert_eq!(bytes, w2.into_vec());
    }

    #[test]
    fn test_flags_classification() {
        let reg = NameRegistry::new();
        assert!(reg.tag_flags(el::TD).contains(TagFlags::TABLE_PART));
        assert!(reg.tag_flags(el::THEAD).contains(TagFlags::ROW_GROUP));
        assert!(reg.tag_flags(el::DIV).contains(TagFlags::CLOSES_P));
        assert!(reg.tag_flags(el::BR).contains(TagFlags::SELF_CLOSING));
        assert!(reg.tag_flags(el::META).contains(TagFlags::IN_HEAD));
        assert!(reg.tag_flags(el::RT).contains(TagFlags::RUBY_PART));
        assert!(!reg.tag_flags(el::SPAN).contains(TagFlags::SPECIAL));
        assert!(reg.is_boxing(el::INLINE_BOX));
        assert!(!reg.is_boxing(el::DIV));
    }
}
