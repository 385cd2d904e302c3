//! The document tree: dense-handle node graph over the four arenas.
//!
//! Every node is referenced by a [`NodeHandle`]; the tree maps element
//! serials and text serials to slots that are either heap objects
//! (mutable) or arena records (persistent). Stored references may carry
//! a stale persistence bit; resolution masks it, and the canonical bit
//! for a node always comes from its slot.

use crate::cache::{BlockType, CacheFile};
use crate::deadline::{Deadline, Progress};
use crate::dom::handle::{NodeHandle, NodeKind};
use crate::dom::names::{AttrId, ElemId, NameRegistry, NsId, TagFlags, ValueId};
use crate::dom::node::{MutElement, MutText, RendMethod};
use crate::dom::rect::{RenderRect, RECT_RECORD_SIZE};
use crate::error::{Error, Result};
use crate::serial::{SerialReader, SerialWriter};
use crate::storage::{
    ChunkedStorage, FixedStorage, RecordAddr, ELEM_CHUNK_SIZE, RECT_CHUNK_SIZE, STYLE_CHUNK_SIZE,
    TEXT_CHUNK_SIZE,
};
use crate::style::{ComputedStyle, FontPool, PoolId, StylePool};

/// Offsets into the packed element payload (see `MutElement::encode`).
const ELEM_REND_OFFSET: usize = 4;
const ELEM_CHILD_COUNT_OFFSET: usize = 5;
const ELEM_ATTR_COUNT_OFFSET: usize = 7;
const ELEM_CHILDREN_OFFSET: usize = 9;

enum ElemSlot {
    Empty,
    Mutable(Box<MutElement>),
    Persistent(RecordAddr),
}

enum TextSlot {
    Empty,
    Mutable(Box<MutText>),
    Persistent(RecordAddr),
}

pub struct DomTree {
    pub names: NameRegistry,
    pub style_pool: StylePool,
    pub font_pool: FontPool,
    pub(crate) cache: Option<CacheFile>,
    elems: Vec<ElemSlot>,
    texts: Vec<TextSlot>,
    free_elems: Vec<u32>,
    free_texts: Vec<u32>,
    elem_arena: ChunkedStorage,
    text_arena: ChunkedStorage,
    rect_arena: FixedStorage,
    style_arena: FixedStorage,
    root: NodeHandle,
    dom_version: u32,
}

impl DomTree {
    /// Creates an empty tree with its fixed root element. Arena budgets
    /// are the documented fractions of `buffer_size`.
    pub fn new(dom_version: u32, buffer_size: usize) -> Self {
        let mut tree = Self {
            names: NameRegistry::new(),
            style_pool: StylePool::new(),
            font_pool: FontPool::new(),
            cache: None,
            elems: Vec::new(),
            texts: Vec::new(),
            free_elems: Vec::new(),
            free_texts: Vec::new(),
            elem_arena: ChunkedStorage::new(
                BlockType::ElemData,
                ELEM_CHUNK_SIZE,
                buffer_size * 45 / 100,
            ),
            text_arena: ChunkedStorage::new(
                BlockType::TextData,
                TEXT_CHUNK_SIZE,
                buffer_size * 25 / 100,
            ),
            rect_arena: FixedStorage::new(
                BlockType::RectData,
                RECT_RECORD_SIZE,
                RECT_CHUNK_SIZE,
                buffer_size * 45 / 100,
            ),
            style_arena: FixedStorage::new(
                BlockType::ElemStyleData,
                4,
                STYLE_CHUNK_SIZE,
                buffer_size * 10 / 100,
            ),
            root: NodeHandle::NULL,
            dom_version,
        };
        let root = tree.new_element(NodeHandle::NULL, NsId::NONE, ElemId::NONE);
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn dom_version(&self) -> u32 {
        self.dom_version
    }

    pub fn attach_cache(&mut self, cache: CacheFile) {
        self.cache = Some(cache);
    }

    pub fn cache_mut(&mut self) -> Option<&mut CacheFile> {
        self.cache.as_mut()
    }

    pub fn elem_count(&self) -> usize {
        self.elems.len()
    }

    pub fn text_count(&self) -> usize {
        self.texts.len()
    }

    // --- slot management ---

    fn new_element(&mut self, parent: NodeHandle, ns: NsId, id: ElemId) -> NodeHandle {
        let node = Box::new(MutElement::new(parent, ns, id));
        let serial = match self.free_elems.pop() {
            Some(serial) => {
                self.elems[serial as usize] = ElemSlot::Mutable(node);
                serial
            }
            None => {
                self.elems.push(ElemSlot::Mutable(node));
                (self.elems.len() - 1) as u32
            }
        };
        NodeHandle::new(NodeKind::MutableElement, serial)
    }

    fn new_text(&mut self, parent: NodeHandle, text: &str) -> NodeHandle {
        let node = Box::new(MutText::new(parent, text));
        let serial = match self.free_texts.pop() {
            Some(serial) => {
                self.texts[serial as usize] = TextSlot::Mutable(node);
                serial
            }
            None => {
                self.texts.push(TextSlot::Mutable(node));
                (self.texts.len() - 1) as u32
            }
        };
        NodeHandle::new(NodeKind::MutableText, serial)
    }

    fn elem_slot(&self, h: NodeHandle) -> Result<&ElemSlot> {
        debug_assert!(h.is_element());
        self.elems
            .get(h.serial() as usize)
            .filter(|s| !matches!(s, ElemSlot::Empty))
            .ok_or_else(|| Error::Corrupted(format!("dangling element handle {:#x}", h.0)))
    }

    fn text_slot(&self, h: NodeHandle) -> Result<&TextSlot> {
        debug_assert!(h.is_text());
        self.texts
            .get(h.serial() as usize)
            .filter(|s| !matches!(s, TextSlot::Empty))
            .ok_or_else(|| Error::Corrupted(format!("dangling text handle {:#x}", h.0)))
    }

    /// The node's handle with the persistence bit reflecting its slot.
    pub fn canonical(&self, h: NodeHandle) -> NodeHandle {
        if self.is_persistent(h) {
            h.as_persistent()
        } else {
            h.as_mutable()
        }
    }

    pub fn is_persistent(&self, h: NodeHandle) -> bool {
        if h.is_element() {
            matches!(self.elem_slot(h), Ok(ElemSlot::Persistent(_)))
        } else {
            matches!(self.text_slot(h), Ok(TextSlot::Persistent(_)))
        }
    }

    pub fn is_root(&self, h: NodeHandle) -> bool {
        h.same_node(self.root)
    }

    // --- persistent payload access ---

    fn elem_payload(&mut self, addr: RecordAddr) -> Result<Vec<u8>> {
        Ok(self.elem_arena.get(addr, self.cache.as_mut())?.to_vec())
    }

    /// Runs `f` over the packed payload of a persistent element without
    /// copying it out.
    fn with_elem_payload<R>(
        &mut self,
        addr: RecordAddr,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let payload = self.elem_arena.get(addr, self.cache.as_mut())?;
        Ok(f(payload))
    }

    // --- core accessors ---

    pub fn parent(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        if h.is_element() {
            match self.elem_slot(h)? {
                ElemSlot::Mutable(el) => Ok(el.parent),
                ElemSlot::Persistent(addr) => {
                    let addr = *addr;
                    Ok(NodeHandle(
                        self.elem_arena.get_parent(addr, self.cache.as_mut())?,
                    ))
                }
                ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
            }
        } else {
            match self.text_slot(h)? {
                TextSlot::Mutable(t) => Ok(t.parent),
                TextSlot::Persistent(addr) => {
                    let addr = *addr;
                    Ok(NodeHandle(
                        self.text_arena.get_parent(addr, self.cache.as_mut())?,
                    ))
                }
                TextSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
            }
        }
    }

    fn set_parent(&mut self, h: NodeHandle, parent: NodeHandle) -> Result<()> {
        if h.is_element() {
            match self.elem_slot(h)? {
                ElemSlot::Mutable(_) => {
                    let ElemSlot::Mutable(el) = &mut self.elems[h.serial() as usize] else {
                        unreachable!();
                    };
                    el.parent = parent;
                    Ok(())
                }
                ElemSlot::Persistent(addr) => {
                    let addr = *addr;
                    self.elem_arena
                        .set_parent(addr, parent.0, self.cache.as_mut())
                }
                ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
            }
        } else {
            match self.text_slot(h)? {
                TextSlot::Mutable(_) => {
                    let TextSlot::Mutable(t) = &mut self.texts[h.serial() as usize] else {
                        unreachable!();
                    };
                    t.parent = parent;
                    Ok(())
                }
                TextSlot::Persistent(addr) => {
                    let addr = *addr;
                    self.text_arena
                        .set_parent(addr, parent.0, self.cache.as_mut())
                }
                TextSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
            }
        }
    }

    pub fn child_count(&mut self, h: NodeHandle) -> Result<usize> {
        if !h.is_element() {
            return Ok(0);
        }
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.children.len()),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    u16::from_le_bytes(
                        p[ELEM_CHILD_COUNT_OFFSET..ELEM_CHILD_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn child(&mut self, h: NodeHandle, index: usize) -> Result<NodeHandle> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => el
                .children
                .get(index)
                .copied()
                .ok_or_else(|| Error::Corrupted(format!("child index {index} out of range"))),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                let count = self.child_count(h)?;
                if index >= count {
                    return Err(Error::Corrupted(format!(
                        "child index {index} out of range ({count})"
                    )));
                }
                self.with_elem_payload(addr, |p| {
                    let at = ELEM_CHILDREN_OFFSET + index * 4;
                    NodeHandle(u32::from_le_bytes(p[at..at + 4].try_into().expect("4 bytes")))
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn children(&mut self, h: NodeHandle) -> Result<Vec<NodeHandle>> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.children.clone()),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    let count = u16::from_le_bytes(
                        p[ELEM_CHILD_COUNT_OFFSET..ELEM_CHILD_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize;
                    (0..count)
                        .map(|i| {
                            let at = ELEM_CHILDREN_OFFSET + i * 4;
                            NodeHandle(u32::from_le_bytes(
                                p[at..at + 4].try_into().expect("4 bytes"),
                            ))
                        })
                        .collect()
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn child_index_of(&mut self, h: NodeHandle, child: NodeHandle) -> Result<Option<usize>> {
        let children = self.children(h)?;
        Ok(children.iter().position(|c| c.same_node(child)))
    }

    pub fn node_id(&mut self, h: NodeHandle) -> Result<ElemId> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.id),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    ElemId(u16::from_le_bytes(p[2..4].try_into().expect("2 bytes")))
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn ns_id(&mut self, h: NodeHandle) -> Result<NsId> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.ns),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    NsId(u16::from_le_bytes(p[0..2].try_into().expect("2 bytes")))
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn set_node_id(&mut self, h: NodeHandle, id: ElemId) -> Result<()> {
        self.make_mutable(h)?;
        let ElemSlot::Mutable(el) = &mut self.elems[h.serial() as usize] else {
            unreachable!("just made mutable");
        };
        el.id = id;
        Ok(())
    }

    pub fn rend_method(&mut self, h: NodeHandle) -> Result<RendMethod> {
        if h.is_text() {
            return Ok(RendMethod::Inline);
        }
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.rend_method),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    RendMethod::from_u8(p[ELEM_REND_OFFSET]).unwrap_or_default()
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn set_rend_method(&mut self, h: NodeHandle, rm: RendMethod) -> Result<()> {
        if !h.is_element() {
            return Ok(()); // text is always inline content
        }
        match self.elem_slot(h)? {
            ElemSlot::Mutable(_) => {
                let ElemSlot::Mutable(el) = &mut self.elems[h.serial() as usize] else {
                    unreachable!();
                };
                el.rend_method = rm;
                Ok(())
            }
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                let mut payload = self.elem_payload(addr)?;
                if payload[ELEM_REND_OFFSET] == rm as u8 {
                    return Ok(());
                }
                payload[ELEM_REND_OFFSET] = rm as u8;
                let new_addr = self
                    .elem_arena
                    .modify(addr, &payload, self.cache.as_mut())?;
                debug_assert_eq!(new_addr, addr, "in-place patch must not relocate");
                Ok(())
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    // --- attributes ---

    pub fn attr_value_id(
        &mut self,
        h: NodeHandle,
        ns: NsId,
        id: AttrId,
    ) -> Result<Option<ValueId>> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => Ok(el.get_attr(ns, id)),
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    let child_count = u16::from_le_bytes(
                        p[ELEM_CHILD_COUNT_OFFSET..ELEM_CHILD_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize;
                    let attr_count = u16::from_le_bytes(
                        p[ELEM_ATTR_COUNT_OFFSET..ELEM_ATTR_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize;
                    let mut at = ELEM_CHILDREN_OFFSET + child_count * 4;
                    for _ in 0..attr_count {
                        let a_ns = u16::from_le_bytes(p[at..at + 2].try_into().expect("2 bytes"));
                        let a_id =
                            u16::from_le_bytes(p[at + 2..at + 4].try_into().expect("2 bytes"));
                        let a_val =
                            u32::from_le_bytes(p[at + 4..at + 8].try_into().expect("4 bytes"));
                        if AttrId(a_id) == id && (NsId(a_ns) == ns || ns == NsId::NONE) {
                            return Some(ValueId(a_val));
                        }
                        at += 8;
                    }
                    None
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    /// All attributes of an element in stored order.
    pub fn attrs_of(&mut self, h: NodeHandle) -> Result<Vec<(NsId, AttrId, ValueId)>> {
        match self.elem_slot(h)? {
            ElemSlot::Mutable(el) => {
                Ok(el.attrs.iter().map(|a| (a.ns, a.id, a.value)).collect())
            }
            ElemSlot::Persistent(addr) => {
                let addr = *addr;
                self.with_elem_payload(addr, |p| {
                    let child_count = u16::from_le_bytes(
                        p[ELEM_CHILD_COUNT_OFFSET..ELEM_CHILD_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize;
                    let attr_count = u16::from_le_bytes(
                        p[ELEM_ATTR_COUNT_OFFSET..ELEM_ATTR_COUNT_OFFSET + 2]
                            .try_into()
                            .expect("2 bytes"),
                    ) as usize;
                    let mut at = ELEM_CHILDREN_OFFSET + child_count * 4;
                    let mut out = Vec::with_capacity(attr_count);
                    for _ in 0..attr_count {
                        let a_ns = u16::from_le_bytes(p[at..at + 2].try_into().expect("2 bytes"));
                        let a_id =
                            u16::from_le_bytes(p[at + 2..at + 4].try_into().expect("2 bytes"));
                        let a_val =
                            u32::from_le_bytes(p[at + 4..at + 8].try_into().expect("4 bytes"));
                        out.push((NsId(a_ns), AttrId(a_id), ValueId(a_val)));
                        at += 8;
                    }
                    out
                })
            }
            ElemSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn has_attr(&mut self, h: NodeHandle, ns: NsId, id: AttrId) -> Result<bool> {
        Ok(self.attr_value_id(h, ns, id)?.is_some())
    }

    pub fn attr_str(&mut self, h: NodeHandle, ns: NsId, id: AttrId) -> Result<Option<&str>> {
        let value = self.attr_value_id(h, ns, id)?;
        Ok(value.map(|v| self.names.value(v)))
    }

    pub fn set_attr(&mut self, h: NodeHandle, ns: NsId, id: AttrId, value: &str) -> Result<()> {
        let value = self.names.value_id(value);
        self.make_mutable(h)?;
        let ElemSlot::Mutable(el) = &mut self.elems[h.serial() as usize] else {
            unreachable!("just made mutable");
        };
        el.set_attr(ns, id, value);
        Ok(())
    }

    // --- text ---

    pub fn text(&mut self, h: NodeHandle) -> Result<String> {
        match self.text_slot(h)? {
            TextSlot::Mutable(t) => Ok(t.text.clone()),
            TextSlot::Persistent(addr) => {
                let addr = *addr;
                let bytes = self.text_arena.get(addr, self.cache.as_mut())?.to_vec();
                String::from_utf8(bytes).map_err(Error::from)
            }
            TextSlot::Empty => unreachable!("elem_slot/text_slot excludes Empty"),
        }
    }

    pub fn set_text(&mut self, h: NodeHandle, text: &str) -> Result<()> {
        self.make_mutable(h)?;
        let TextSlot::Mutable(t) = &mut self.texts[h.serial() as usize] else {
            unreachable!("just made mutable");
        };
        t.text = text.to_string();
        Ok(())
    }

    // --- style / font / rect ---

    pub fn style_ids(&mut self, h: NodeHandle) -> Result<(PoolId, PoolId)> {
        let mut rec = [0u8; 4];
        self.style_arena
            .get(h.serial(), &mut rec, self.cache.as_mut())?;
        Ok((
            PoolId(u16::from_le_bytes([rec[0], rec[1]])),
            PoolId(u16::from_le_bytes([rec[2], rec[3]])),
        ))
    }

    pub fn set_style_ids(&mut self, h: NodeHandle, style: PoolId, font: PoolId) -> Result<()> {
        let (old_style, old_font) = self.style_ids(h)?;
        let mut rec = [0u8; 4];
        rec[0..2].copy_from_slice(&style.0.to_le_bytes());
        rec[2..4].copy_from_slice(&font.0.to_le_bytes());
        self.style_arena
            .set(h.serial(), &rec, self.cache.as_mut())?;
        if old_style != style {
            self.style_pool.release(old_style);
        }
        if old_font != font {
            self.font_pool.release(old_font);
        }
        Ok(())
    }

    /// Interns `style` and attaches it to the element.
    pub fn apply_style(&mut self, h: NodeHandle, style: ComputedStyle) -> Result<()> {
        let style_id = self.style_pool.acquire(style);
        let (_, font_id) = self.style_ids(h)?;
        self.set_style_ids(h, style_id, font_id)
    }

    /// The element's computed style record (default when never styled).
    pub fn style(&mut self, h: NodeHandle) -> Result<ComputedStyle> {
        let (style_id, _) = self.style_ids(h)?;
        Ok(self
            .style_pool
            .get(style_id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn render_rect(&mut self, h: NodeHandle) -> Result<RenderRect> {
        let mut rec = [0u8; RECT_RECORD_SIZE as usize];
        self.rect_arena
            .get(h.serial(), &mut rec, self.cache.as_mut())?;
        Ok(RenderRect::decode(&rec))
    }

    pub fn set_render_rect(&mut self, h: NodeHandle, rect: &RenderRect) -> Result<()> {
        self.rect_arena
            .set(h.serial(), &rect.encode(), self.cache.as_mut())
    }

    // --- mutations ---

    pub fn insert_child_element(
        &mut self,
        parent: NodeHandle,
        index: usize,
        ns: NsId,
        id: ElemId,
    ) -> Result<NodeHandle> {
        self.make_mutable(parent)?;
        let child = self.new_element(self.canonical(parent), ns, id);
        let ElemSlot::Mutable(el) = &mut self.elems[parent.serial() as usize] else {
            unreachable!("just made mutable");
        };
        let index = index.min(el.children.len());
        el.children.insert(index, child);
        Ok(child)
    }

    pub fn append_child_element(
        &mut self,
        parent: NodeHandle,
        ns: NsId,
        id: ElemId,
    ) -> Result<NodeHandle> {
        let count = self.child_count(parent)?;
        self.insert_child_element(parent, count, ns, id)
    }

    pub fn insert_child_text(
        &mut self,
        parent: NodeHandle,
        index: usize,
        text: &str,
    ) -> Result<NodeHandle> {
        self.make_mutable(parent)?;
        let child = self.new_text(self.canonical(parent), text);
        let ElemSlot::Mutable(el) = &mut self.elems[parent.serial() as usize] else {
            unreachable!("just made mutable");
        };
        let index = index.min(el.children.len());
        el.children.insert(index, child);
        Ok(child)
    }

    pub fn append_child_text(&mut self, parent: NodeHandle, text: &str) -> Result<NodeHandle> {
        let count = self.child_count(parent)?;
        self.insert_child_text(parent, count, text)
    }

    /// Detaches and returns the child at `index` without destroying it.
    pub fn remove_child(&mut self, parent: NodeHandle, index: usize) -> Result<NodeHandle> {
        self.make_mutable(parent)?;
        let ElemSlot::Mutable(el) = &mut self.elems[parent.serial() as usize] else {
            unreachable!("just made mutable");
        };
        if index >= el.children.len() {
            return Err(Error::Corrupted(format!(
                "remove_child index {index} out of range"
            )));
        }
        let child = el.children.remove(index);
        self.set_parent(child, NodeHandle::NULL)?;
        Ok(child)
    }

    /// Removes and destroys the children in `start..=end`.
    pub fn remove_children(&mut self, parent: NodeHandle, start: usize, end: usize) -> Result<()> {
        let mut i = end as isize;
        while i >= start as isize {
            let child = self.remove_child(parent, i as usize)?;
            self.destroy(child)?;
            i -= 1;
        }
        Ok(())
    }

    /// Moves children `start..=end` of `src` to the end of `dst`'s child
    /// list (source and target may be the same node).
    pub fn move_children(
        &mut self,
        src: NodeHandle,
        start: usize,
        end: usize,
        dst: NodeHandle,
    ) -> Result<()> {
        self.make_mutable(src)?;
        self.make_mutable(dst)?;
        let ElemSlot::Mutable(el) = &mut self.elems[src.serial() as usize] else {
            unreachable!("just made mutable");
        };
        if end >= el.children.len() || start > end {
            return Err(Error::Corrupted(format!(
                "move_children range {start}..={end} out of range"
            )));
        }
        let moved: Vec<NodeHandle> = el.children.drain(start..=end).collect();
        let dst_canonical = self.canonical(dst);
        for &child in &moved {
            self.set_parent(child, dst_canonical)?;
        }
        let ElemSlot::Mutable(el) = &mut self.elems[dst.serial() as usize] else {
            unreachable!("just made mutable");
        };
        el.children.extend(moved);
        Ok(())
    }

    /// Recursively frees a detached node, recycling serials and
    /// releasing style references.
    pub fn destroy(&mut self, h: NodeHandle) -> Result<()> {
        if h.is_element() {
            let children = self.children(h)?;
            for child in children {
                self.destroy(child)?;
            }
            let (style, font) = self.style_ids(h)?;
            self.style_pool.release(style);
            self.font_pool.release(font);
            self.set_style_ids_raw(h, PoolId::DEFAULT, PoolId::DEFAULT)?;
            let serial = h.serial();
            match std::mem::replace(&mut self.elems[serial as usize], ElemSlot::Empty) {
                ElemSlot::Persistent(addr) => self.elem_arena.free_record(addr)?,
                ElemSlot::Mutable(_) | ElemSlot::Empty => {}
            }
            self.free_elems.push(serial);
        } else {
            let serial = h.serial();
            match std::mem::replace(&mut self.texts[serial as usize], TextSlot::Empty) {
                TextSlot::Persistent(addr) => self.text_arena.free_record(addr)?,
                TextSlot::Mutable(_) | TextSlot::Empty => {}
            }
            self.free_texts.push(serial);
        }
        Ok(())
    }

    fn set_style_ids_raw(&mut self, h: NodeHandle, style: PoolId, font: PoolId) -> Result<()> {
        let mut rec = [0u8; 4];
        rec[0..2].copy_from_slice(&style.0.to_le_bytes());
        rec[2..4].copy_from_slice(&font.0.to_le_bytes());
        self.style_arena.set(h.serial(), &rec, self.cache.as_mut())
    }

    // --- persistence conversions ---

    /// Converts a node to its packed arena form. Idempotent.
    pub fn persist(&mut self, h: NodeHandle) -> Result<()> {
        if h.is_element() {
            let serial = h.serial() as usize;
            if !matches!(self.elems[serial], ElemSlot::Mutable(_)) {
                return Ok(());
            }
            let ElemSlot::Mutable(el) =
                std::mem::replace(&mut self.elems[serial], ElemSlot::Empty)
            else {
                unreachable!();
            };
            let payload = el.encode();
            let owner = h.as_persistent();
            let addr = self.elem_arena.alloc_record(
                owner.0,
                el.parent.0,
                &payload,
                self.cache.as_mut(),
            )?;
            self.elems[serial] = ElemSlot::Persistent(addr);
        } else {
            let serial = h.serial() as usize;
            if !matches!(self.texts[serial], TextSlot::Mutable(_)) {
                return Ok(());
            }
            let TextSlot::Mutable(t) =
                std::mem::replace(&mut self.texts[serial], TextSlot::Empty)
            else {
                unreachable!();
            };
            let owner = h.as_persistent();
            let addr = self.text_arena.alloc_record(
                owner.0,
                t.parent.0,
                t.text.as_bytes(),
                self.cache.as_mut(),
            )?;
            self.texts[serial] = TextSlot::Persistent(addr);
        }
        Ok(())
    }

    /// Converts a node back to its mutable heap form. Idempotent.
    pub fn make_mutable(&mut self, h: NodeHandle) -> Result<()> {
        if h.is_element() {
            let serial = h.serial() as usize;
            let addr = match &self.elems[serial] {
                ElemSlot::Persistent(addr) => *addr,
                _ => return Ok(()),
            };
            let parent = NodeHandle(self.elem_arena.get_parent(addr, self.cache.as_mut())?);
            let payload = self.elem_payload(addr)?;
            let el = MutElement::decode(parent, &payload)?;
            self.elem_arena.free_record(addr)?;
            self.elems[serial] = ElemSlot::Mutable(Box::new(el));
        } else {
            let serial = h.serial() as usize;
            let addr = match &self.texts[serial] {
                TextSlot::Persistent(addr) => *addr,
                _ => return Ok(()),
            };
            let parent = NodeHandle(self.text_arena.get_parent(addr, self.cache.as_mut())?);
            let bytes = self.text_arena.get(addr, self.cache.as_mut())?.to_vec();
            let text = String::from_utf8(bytes)?;
            self.text_arena.free_record(addr)?;
            self.texts[serial] = TextSlot::Mutable(Box::new(MutText { parent, text }));
        }
        Ok(())
    }

    /// Persists every still-mutable node; resumable under a deadline.
    /// Always makes progress: the deadline is polled per batch of
    /// conversions actually performed, so repeated calls with an
    /// already-expired deadline still converge.
    pub fn persist_all(&mut self, deadline: Deadline) -> Result<Progress> {
        let mut work = 0usize;
        for serial in 0..self.elems.len() {
            if matches!(self.elems[serial], ElemSlot::Mutable(_)) {
                self.persist(NodeHandle::new(NodeKind::MutableElement, serial as u32))?;
                work += 1;
                if work % 64 == 0 && deadline.expired() {
                    return Ok(Progress::Timeout);
                }
            }
        }
        for serial in 0..self.texts.len() {
            if matches!(self.texts[serial], TextSlot::Mutable(_)) {
                self.persist(NodeHandle::new(NodeKind::MutableText, serial as u32))?;
                work += 1;
                if work % 64 == 0 && deadline.expired() {
                    return Ok(Progress::Timeout);
                }
            }
        }
        Ok(Progress::Done)
    }

    // --- tag helpers ---

    pub fn is_boxing_node(&mut self, h: NodeHandle) -> Result<bool> {
        if !h.is_element() {
            return Ok(false);
        }
        let id = self.node_id(h)?;
        Ok(self.names.is_boxing(id))
    }

    pub fn tag_flags_of(&mut self, h: NodeHandle) -> Result<TagFlags> {
        let id = self.node_id(h)?;
        Ok(self.names.tag_flags(id))
    }

    // --- boxing-transparent navigation ---

    /// Nearest non-boxing ancestor element.
    pub fn unboxed_parent(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        let mut p = self.parent(h)?;
        while !p.is_null() && self.is_boxing_node(p)? {
            p = self.parent(p)?;
        }
        Ok(p)
    }

    /// Children of `h` with boxing wrappers flattened away and
    /// pseudo-elements dropped, in document order.
    pub fn unboxed_children(&mut self, h: NodeHandle) -> Result<Vec<NodeHandle>> {
        let mut out = Vec::new();
        self.collect_unboxed(h, &mut out)?;
        Ok(out)
    }

    fn collect_unboxed(&mut self, h: NodeHandle, out: &mut Vec<NodeHandle>) -> Result<()> {
        for child in self.children(h)? {
            if child.is_element() && self.is_boxing_node(child)? {
                if self.node_id(child)? == crate::dom::names::el::PSEUDO_ELEM {
                    continue; // no source counterpart at all
                }
                self.collect_unboxed(child, out)?;
            } else {
                out.push(child);
            }
        }
        Ok(())
    }

    pub fn unboxed_first_child(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        Ok(self
            .unboxed_children(h)?
            .first()
            .copied()
            .unwrap_or(NodeHandle::NULL))
    }

    pub fn unboxed_last_child(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        Ok(self
            .unboxed_children(h)?
            .last()
            .copied()
            .unwrap_or(NodeHandle::NULL))
    }

    pub fn unboxed_next_sibling(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        let parent = self.unboxed_parent(h)?;
        if parent.is_null() {
            return Ok(NodeHandle::NULL);
        }
        let siblings = self.unboxed_children(parent)?;
        let at = siblings.iter().position(|s| s.same_node(h));
        Ok(at
            .and_then(|i| siblings.get(i + 1).copied())
            .unwrap_or(NodeHandle::NULL))
    }

    pub fn unboxed_prev_sibling(&mut self, h: NodeHandle) -> Result<NodeHandle> {
        let parent = self.unboxed_parent(h)?;
        if parent.is_null() {
            return Ok(NodeHandle::NULL);
        }
        let siblings = self.unboxed_children(parent)?;
        let at = siblings.iter().position(|s| s.same_node(h));
        Ok(at
            .filter(|&i| i > 0)
            .and_then(|i| siblings.get(i - 1).copied())
            .unwrap_or(NodeHandle::NULL))
    }

    // --- node-table persistence ---

    /// Writes the node tables: `NodeIndex` holds the counts, `ElemNode`
    /// and `TextNode` the per-slot arena addresses. All nodes must be
    /// persistent (run `persist_all` first).
    pub fn save_node_tables(&mut self) -> Result<()> {
        let mut counts = SerialWriter::new();
        counts.put_u32(self.elems.len() as u32);
        counts.put_u32(self.texts.len() as u32);
        counts.put_u32(self.root.0);

        let mut elems = SerialWriter::with_capacity(self.elems.len() * 4);
        for slot in &self.elems {
            match slot {
                ElemSlot::Persistent(addr) => elems.put_u32(addr.0),
                ElemSlot::Empty => elems.put_u32(RecordAddr::NULL.0),
                ElemSlot::Mutable(_) => {
                    return Err(Error::Corrupted(
                        "saving node tables with mutable elements left".into(),
                    ));
                }
            }
        }
        let mut texts = SerialWriter::with_capacity(self.texts.len() * 4);
        for slot in &self.texts {
            match slot {
                TextSlot::Persistent(addr) => texts.put_u32(addr.0),
                TextSlot::Empty => texts.put_u32(RecordAddr::NULL.0),
                TextSlot::Mutable(_) => {
                    return Err(Error::Corrupted(
                        "saving node tables with mutable texts left".into(),
                    ));
                }
            }
        }
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        cache.write(BlockType::NodeIndex, 0, counts.as_slice(), false)?;
        cache.write(BlockType::ElemNode, 0, elems.as_slice(), true)?;
        cache.write(BlockType::TextNode, 0, texts.as_slice(), true)?;
        Ok(())
    }

    /// Rebuilds the slot tables from the cache file; every node comes
    /// back persistent.
    pub fn load_node_tables(&mut self) -> Result<()> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        let counts = cache.read(BlockType::NodeIndex, 0)?;
        let mut r = SerialReader::new(&counts);
        let elem_count = r.get_u32()? as usize;
        let text_count = r.get_u32()? as usize;
        let root = NodeHandle(r.get_u32()?);

        let elems_raw = cache.read(BlockType::ElemNode, 0)?;
        let texts_raw = cache.read(BlockType::TextNode, 0)?;
        if elems_raw.len() != elem_count * 4 || texts_raw.len() != text_count * 4 {
            return Err(Error::Corrupted("node table size mismatch".into()));
        }

        self.elem_arena.load(cache)?;
        self.text_arena.load(cache)?;
        self.rect_arena.load(cache)?;
        self.style_arena.load(cache)?;

        self.elems.clear();
        self.free_elems.clear();
        let mut r = SerialReader::new(&elems_raw);
        for serial in 0..elem_count {
            let addr = RecordAddr(r.get_u32()?);
            if addr.is_null() {
                self.elems.push(ElemSlot::Empty);
                self.free_elems.push(serial as u32);
            } else {
                self.elems.push(ElemSlot::Persistent(addr));
            }
        }
        self.texts.clear();
        self.free_texts.clear();
        let mut r = SerialReader::new(&texts_raw);
        for serial in 0..text_count {
            let addr = RecordAddr(r.get_u32()?);
            if addr.is_null() {
                self.texts.push(TextSlot::Empty);
                self.free_texts.push(serial as u32);
            } else {
                self.texts.push(TextSlot::Persistent(addr));
            }
        }
        self.root = root;
        Ok(())
    }

    pub fn save_elem_arena(&mut self, deadline: Deadline) -> Result<Progress> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        self.elem_arena.save(cache, deadline)
    }

    pub fn save_text_arena(&mut self, deadline: Deadline) -> Result<Progress> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        self.text_arena.save(cache, deadline)
    }

    pub fn save_rect_arena(&mut self, deadline: Deadline) -> Result<Progress> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        self.rect_arena.save(cache, deadline)
    }

    pub fn save_style_arena(&mut self, deadline: Deadline) -> Result<Progress> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Corrupted("no cache file attached".into()))?;
        self.style_arena.save(cache, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Compression;
    use crate::dom::names::{attr, el};
    use crate::io::MemStream;
    use crate::storage::DEFAULT_DOC_BUFFER_SIZE;

    fn tree() -> DomTree {
        DomTree::new(20200824, DEFAULT_DOC_BUFFER_SIZE)
    }

    #[test]
    fn test_parent_child_symmetry() {
        let mut t = tree();
        let root = t.root();
        let body = t.append_child_element(root, NsId::NONE, el::BODY).unwrap();
        let p = t.append_child_element(body, NsId::NONE, el::P).unwrap();
        let txt = t.append_child_text(p, "hello").unwrap();

        for h in [body, p, txt] {
            let parent = t.parent(h).unwrap();
            let idx = t.child_index_of(parent, h).unwrap().unwrap();
            assert!(t.child(parent, idx).unwrap().same_node(h));
        }
        assert_eq!(t.child_count(body).unwrap(), 1);
        assert_eq!(t.text(txt).unwrap(), "hello");
    }

    #[test]
    fn test_persist_then_modify_is_identity() {
        let mut t = tree();
        let root = t.root();
        let div = t.append_child_element(root, NsId::NONE, el::DIV).unwrap();
        t.set_attr(div, NsId::NONE, attr::ID, "main").unwrap();
        t.set_rend_method(div, RendMethod::Final).unwrap();
        let txt = t.append_child_text(div, "payload").unwrap();

        t.persist(txt).unwrap();
        t.persist(div).unwrap();
        assert!(t.is_persistent(div));
        assert!(t.is_persistent(txt));

        // Observable fields are unchanged in persistent form.
        assert_eq!(t.node_id(div).unwrap(), el::DIV);
        assert_eq!(t.attr_str(div, NsId::NONE, attr::ID).unwrap(), Some("main"));
        assert_eq!(t.rend_method(div).unwrap(), RendMethod::Final);
        assert_eq!(t.child_count(div).unwrap(), 1);
        assert_eq!(t.text(txt).unwrap(), "payload");

        t.make_mutable(div).unwrap();
        t.make_mutable(txt).unwrap();
        assert!(!t.is_persistent(div));
        assert_eq!(t.attr_str(div, NsId::NONE, attr::ID).unwrap(), Some("main"));
        assert_eq!(t.rend_method(div).unwrap(), RendMethod::Final);
        assert_eq!(t.text(txt).unwrap(), "payload");

        // Conversions are idempotent.
        t.make_mutable(div).unwrap();
        t.persist(div).unwrap();
        t.persist(div).unwrap();
        assert!(t.is_persistent(div));
    }

    #[test]
    fn test_set_rend_method_on_persistent_node() {
        let mut t = tree();
        let root = t.root();
        let p = t.append_child_element(root, NsId::NONE, el::P).unwrap();
        t.persist(p).unwrap();
        t.set_rend_method(p, RendMethod::Table).unwrap();
        assert!(t.is_persistent(p));
        assert_eq!(t.rend_method(p).unwrap(), RendMethod::Table);
    }

    #[test]
    fn test_destroy_recycles_serials() {
        let mut t = tree();
        let root = t.root();
        let div = t.append_child_element(root, NsId::NONE, el::DIV).unwrap();
        t.append_child_text(div, "a").unwrap();
        t.append_child_text(div, "b").unwrap();
        let idx = t.child_index_of(root, div).unwrap().unwrap();
        let detached = t.remove_child(root, idx).unwrap();
        t.destroy(detached).unwrap();
        assert_eq!(t.child_count(root).unwrap(), 0);

        // New nodes reuse the recycled serials.
        let div2 = t.append_child_element(root, NsId::NONE, el::DIV).unwrap();
        assert_eq!(div2.serial(), div.serial());
    }

    #[test]
    fn test_move_children() {
        let mut t = tree();
        let root = t.root();
        let a = t.append_child_element(root, NsId::NONE, el::DIV).unwrap();
        let b = t.append_child_element(root, NsId::NONE, el::DIV).unwrap();
        let t1 = t.append_child_text(a, "one").unwrap();
        let t2 = t.append_child_text(a, "two").unwrap();
        t.append_child_text(a, "three").unwrap();

        t.move_children(a, 0, 1, b).unwrap();
        assert_eq!(t.child_count(a).unwrap(), 1);
        assert_eq!(t.child_count(b).unwrap(), 2);
        assert!(t.parent(t1).unwrap().same_node(b));
        assert!(t.parent(t2).unwrap().same_node(b));
    }

    #[test]
    fn test_unboxed_navigation_skips_boxing() {
        let mut t = tree();
        let root = t.root();
        let body = t.append_child_element(root, NsId::NONE, el::BODY).unwrap();
        let p1 = t.append_child_element(body, NsId::NONE, el::P).unwrap();
        // Simulate an anonymous wrapper between body and its second child.
        let abox = t
            .append_child_element(body, NsId::NONE, el::AUTO_BOXING)
            .unwrap();
        let p2 = t.append_child_element(abox, NsId::NONE, el::P).unwrap();

        assert!(t.unboxed_parent(p2).unwrap().same_node(body));
        let kids = t.unboxed_children(body).unwrap();
        assert_eq!(kids.len(), 2);
        assert!(kids[0].same_node(p1));
        assert!(kids[1].same_node(p2));
        assert!(t.unboxed_next_sibling(p1).unwrap().same_node(p2));
        assert!(t.unboxed_prev_sibling(p2).unwrap().same_node(p1));
    }

    #[test]
    fn test_node_tables_round_trip_through_cache() {
        let mut t = tree();
        let root = t.root();
        let body = t.append_child_element(root, NsId::NONE, el::BODY).unwrap();
        let p = t.append_child_element(body, NsId::NONE, el::P).unwrap();
        t.set_attr(p, NsId::NONE, attr::CLASS, "lead").unwrap();
        t.append_child_text(p, "cached text").unwrap();

        let mut cache = CacheFile::new(20200824, Compression::Zlib);
        cache.create(Box::new(MemStream::new())).unwrap();
        t.attach_cache(cache);

        t.persist_all(Deadline::none()).unwrap();
        t.save_elem_arena(Deadline::none()).unwrap();
        t.save_text_arena(Deadline::none()).unwrap();
        t.save_rect_arena(Deadline::none()).unwrap();
        t.save_style_arena(Deadline::none()).unwrap();
        t.save_node_tables().unwrap();
        t.cache_mut().unwrap().flush(true, Deadline::none()).unwrap();

        let stream = t.cache.take().unwrap().into_stream();
        let mut cache2 = CacheFile::new(20200824, Compression::Zlib);
        cache2.open(stream).unwrap();

        let mut t2 = DomTree::new(20200824, DEFAULT_DOC_BUFFER_SIZE);
        t2.attach_cache(cache2);
        t2.load_node_tables().unwrap();

        let root2 = t2.root();
        assert_eq!(t2.child_count(root2).unwrap(), 1);
        let body2 = t2.child(root2, 0).unwrap();
        assert_eq!(t2.node_id(body2).unwrap(), el::BODY);
        let p2 = t2.child(body2, 0).unwrap();
        assert_eq!(
            t2.attr_str(p2, NsId::NONE, attr::CLASS).unwrap(),
            Some("lead")
        );
        let txt2 = t2.child(p2, 0).unwrap();
        assert!(txt2.is_text());
        assert_eq!(t2.text(txt2).unwrap(), "cached text");
    }
}
