//! The document tree: handles, interned names, node forms, render
//! rectangles, boxing passes and XPointer addressing.

pub mod boxing;
pub mod dump;
mod handle;
pub mod names;
mod node;
mod rect;
mod tree;
pub mod xpointer;

pub use handle::{NodeHandle, NodeKind};
pub use names::{attr, el, AttrId, ElemId, NameRegistry, NameTable, NsId, TagFlags, ValueId};
pub use node::{Attribute, MutElement, MutText, RendMethod};
pub use rect::{RenderRect, RECT_RECORD_SIZE};
pub use tree::DomTree;
pub use xpointer::{
    create_xpointer, create_xpointer_dialect, xpointer_string, xpointer_string_dialect, XPointer,
    NORMALIZED_XPOINTERS_VERSION,
};
