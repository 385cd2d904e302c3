//! Node payloads: mutable heap forms and packed persistent records.
//!
//! A node exists either as a heap object (child/attribute vectors, owned
//! text) or as a flat record in the element/text arena. The tree decides
//! which form a node is in; this module only defines the two layouts and
//! the conversion codecs between them.

use crate::dom::handle::NodeHandle;
use crate::dom::names::{AttrId, ElemId, NsId, ValueId};
use crate::error::Result;
use crate::serial::{SerialReader, SerialWriter};

/// How an element participates in layout, derived bottom-up once its
/// subtree is complete. The ordering groups the table methods above
/// `Table`, which classification checks rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum RendMethod {
    Invisible = 0,
    /// Content that could not be placed (mis-nested table debris).
    Killed = 1,
    Inline = 2,
    #[default]
    Block = 3,
    /// Block whose children are laid out as one inline flow.
    Final = 4,
    Table = 5,
    TableRowGroup = 6,
    TableHeaderGroup = 7,
    TableFooterGroup = 8,
    TableRow = 9,
    TableColumnGroup = 10,
    TableColumn = 11,
    TableCell = 12,
}

impl RendMethod {
    pub fn from_u8(v: u8) -> Option<Self> {
        use RendMethod::*;
        Some(match v {
            0 => Invisible,
            1 => Killed,
            2 => Inline,
            3 => Block,
            4 => Final,
            5 => Table,
            6 => TableRowGroup,
            7 => TableHeaderGroup,
            8 => TableFooterGroup,
            9 => TableRow,
            10 => TableColumnGroup,
            11 => TableColumn,
            12 => TableCell,
            _ => return None,
        })
    }
}

/// One attribute: `(ns, name) → interned value`. Keys are unique within
/// an element; setting an existing key overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub ns: NsId,
    pub id: AttrId,
    pub value: ValueId,
}

/// Mutable element node.
#[derive(Debug, Clone)]
pub struct MutElement {
    pub parent: NodeHandle,
    pub ns: NsId,
    pub id: ElemId,
    pub rend_method: RendMethod,
    pub children: Vec<NodeHandle>,
    pub attrs: Vec<Attribute>,
}

impl MutElement {
    pub fn new(parent: NodeHandle, ns: NsId, id: ElemId) -> Self {
        Self {
            parent,
            ns,
            id,
            rend_method: RendMethod::default(),
            children: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn get_attr(&self, ns: NsId, id: AttrId) -> Option<ValueId> {
        self.attrs
            .iter()
            .find(|a| a.id == id && (a.ns == ns || ns == NsId::NONE))
            .map(|a| a.value)
    }

    pub fn set_attr(&mut self, ns: NsId, id: AttrId, value: ValueId) {
        if let Some(a) = self.attrs.iter_mut().find(|a| a.id == id && a.ns == ns) {
            a.value = value;
        } else {
            self.attrs.push(Attribute { ns, id, value });
        }
    }

    /// Packs the element into an arena payload (parent lives in the
    /// record header, not the payload).
    pub fn encode(&self) -> Vec<u8> {
        let mut w =
            SerialWriter::with_capacity(9 + self.children.len() * 4 + self.attrs.len() * 8);
        w.put_u16(self.ns.0);
        w.put_u16(self.id.0);
        w.put_u8(self.rend_method as u8);
        w.put_u16(self.children.len() as u16);
        w.put_u16(self.attrs.len() as u16);
        for child in &self.children {
            w.put_u32(child.0);
        }
        for attr in &self.attrs {
            w.put_u16(attr.ns.0);
            w.put_u16(attr.id.0);
            w.put_u32(attr.value.0);
        }
        w.into_vec()
    }

    pub fn decode(parent: NodeHandle, payload: &[u8]) -> Result<Self> {
        let mut r = SerialReader::new(payload);
        let ns = NsId(r.get_u16()?);
        let id = ElemId(r.get_u16()?);
        let rend_method = RendMethod::from_u8(r.get_u8()?).unwrap_or_default();
        let child_count = r.get_u16()? as usize;
        let attr_count = r.get_u16()? as usize;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            children.push(NodeHandle(r.get_u32()?));
        }
        let mut attrs = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            attrs.push(Attribute {
                ns: NsId(r.get_u16()?),
                id: AttrId(r.get_u16()?),
                value: ValueId(r.get_u32()?),
            });
        }
        Ok(Self {
            parent,
            ns,
            id,
            rend_method,
            children,
            attrs,
        })
    }
}

/// Mutable text node: parent plus owned UTF-8.
#[derive(Debug, Clone)]
pub struct MutText {
    pub parent: NodeHandle,
    pub text: String,
}

impl MutText {
    pub fn new(parent: NodeHandle, text: impl Into<String>) -> Self {
        Self {
            parent,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::handle::NodeKind;

    #[test]
    fn test_element_record_round_trip() {
        let parent = NodeHandle::new(NodeKind::MutableElement, 1);
        let mut el = MutElement::new(parent, NsId(2), ElemId(46));
        el.rend_method = RendMethod::Final;
        el.children = vec![
            NodeHandle::new(NodeKind::MutableText, 0),
            NodeHandle::new(NodeKind::MutableElement, 3),
        ];
        el.set_attr(NsId::NONE, AttrId(1), ValueId(9));
        el.set_attr(NsId(1), AttrId(3), ValueId(11));

        let payload = el.encode();
        let back = MutElement::decode(parent, &payload).unwrap();
        assert_eq!(back.ns, el.ns);
        assert_eq!(back.id, el.id);
        assert_eq!(back.rend_method, RendMethod::Final);
        assert_eq!(back.children, el.children);
        assert_eq!(back.attrs, el.attrs);
    }

    #[test]
    fn test_attr_overwrite_keeps_key_unique() {
        let mut el = MutElement::new(NodeHandle::NULL, NsId::NONE, ElemId(1));
        el.set_attr(NsId::NONE, AttrId(5), ValueId(1));
        el.set_attr(NsId::NONE, AttrId(5), ValueId(2));
        assert_eq!(el.attrs.len(), 1);
        assert_eq!(el.get_attr(NsId::NONE, AttrId(5)), Some(ValueId(2)));
    }

    #[test]
    fn test_attr_lookup_ignores_ns_when_unset() {
        let mut el = MutElement::new(NodeHandle::NULL, NsId::NONE, ElemId(1));
        el.set_attr(NsId(3), AttrId(5), ValueId(1));
        assert_eq!(el.get_attr(NsId::NONE, AttrId(5)), Some(ValueId(1)));
        assert_eq!(el.get_attr(NsId(3), AttrId(5)), Some(ValueId(1)));
        assert_eq!(el.get_attr(NsId(4), AttrId(5)), None);
    }
}
