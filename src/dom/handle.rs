//! Node handles: dense 32-bit identifiers with kind and mutability in
//! the low bits.
//!
//! Bit 0 distinguishes text from element, bit 1 mutable from persistent.
//! The upper 28 bits are a per-kind serial, so an element and a text
//! node may share upper bits; "same node" comparisons must keep bit 0.
//! Converting a node between its mutable and persistent forms rewrites
//! bit 1 in place and nothing else, which is what keeps handles stable
//! across conversions.

/// The four storage states a node can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    MutableText = 0b00,
    MutableElement = 0b01,
    PersistentText = 0b10,
    PersistentElement = 0b11,
}

const KIND_BITS: u32 = 4;
const KIND_MASK: u32 = (1 << KIND_BITS) - 1;
const ELEMENT_BIT: u32 = 0b01;
const PERSISTENT_BIT: u32 = 0b10;

/// A node's identity within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u32);

impl NodeHandle {
    pub const NULL: NodeHandle = NodeHandle(u32::MAX);

    pub fn new(kind: NodeKind, serial: u32) -> Self {
        debug_assert!(serial < (1 << (32 - KIND_BITS)));
        NodeHandle((serial << KIND_BITS) | kind as u32)
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Per-kind serial number (index into the element or text table).
    pub fn serial(self) -> u32 {
        self.0 >> KIND_BITS
    }

    pub fn is_element(self) -> bool {
        !self.is_null() && self.0 & ELEMENT_BIT != 0
    }

    pub fn is_text(self) -> bool {
        !self.is_null() && self.0 & ELEMENT_BIT == 0
    }

    pub fn is_persistent(self) -> bool {
        !self.is_null() && self.0 & PERSISTENT_BIT != 0
    }

    pub fn kind(self) -> NodeKind {
        match self.0 & KIND_MASK & (ELEMENT_BIT | PERSISTENT_BIT) {
            0b00 => NodeKind::MutableText,
            0b01 => NodeKind::MutableElement,
            0b10 => NodeKind::PersistentText,
            _ => NodeKind::PersistentElement,
        }
    }

    /// The same node with the persistent bit set.
    pub fn as_persistent(self) -> Self {
        NodeHandle(self.0 | PERSISTENT_BIT)
    }

    /// The same node with the persistent bit cleared.
    pub fn as_mutable(self) -> Self {
        NodeHandle(self.0 & !PERSISTENT_BIT)
    }

    /// Identity comparison ignoring mutability: same kind bit, same
    /// serial.
    pub fn same_node(self, other: NodeHandle) -> bool {
        if self.is_null() || other.is_null() {
            return self == other;
        }
        self.0 & !PERSISTENT_BIT == other.0 & !PERSISTENT_BIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bits() {
        let e = NodeHandle::new(NodeKind::MutableElement, 7);
        assert!(e.is_element());
        assert!(!e.is_text());
        assert!(!e.is_persistent());
        assert_eq!(e.serial(), 7);

        let t = NodeHandle::new(NodeKind::PersistentText, 7);
        assert!(t.is_text());
        assert!(t.is_persistent());
        assert_eq!(t.serial(), 7);

        // Same serial, different kind: not the same node.
        assert!(!e.same_node(t));
    }

    #[test]
    fn test_persistence_flip_preserves_identity() {
        let e = NodeHandle::new(NodeKind::MutableElement, 12);
        let p = e.as_persistent();
        assert!(p.is_persistent());
        assert!(p.is_element());
        assert_eq!(p.serial(), 12);
        assert!(e.same_node(p));
        assert_eq!(p.as_mutable(), e);
    }

    #[test]
    fn test_null_handle() {
        assert!(NodeHandle::NULL.is_null());
        assert!(!NodeHandle::NULL.is_element());
        assert!(!NodeHandle::NULL.is_text());
        assert!(NodeHandle::NULL.same_node(NodeHandle::NULL));
    }
}
