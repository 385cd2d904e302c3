//! XPointers: textual paths naming a `(node, offset)` for bookmarks
//! and highlights.
//!
//! Two dialects exist. V1 walks the raw DOM, anonymous wrappers
//! included, so inserting an `autoBoxing` shifts every path under it.
//! V2 (the default for documents at or above
//! [`NORMALIZED_XPOINTERS_VERSION`]) walks the unboxed view, making
//! saved positions survive re-boxing. Serialisation is deterministic:
//! the same node yields the same string for the same DOM version.

use crate::dom::handle::NodeHandle;
use crate::dom::tree::DomTree;
use crate::error::{Error, Result};

/// Documents with `dom_version >=` this use V2 paths.
pub const NORMALIZED_XPOINTERS_VERSION: u32 = 20200223;

/// A resolved pointer: a node and a byte offset within it (for text
/// nodes) or a child position (for elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XPointer {
    pub node: NodeHandle,
    pub offset: usize,
}

fn uses_v2(tree: &DomTree) -> bool {
    tree.dom_version() >= NORMALIZED_XPOINTERS_VERSION
}

fn visible_children(tree: &mut DomTree, h: NodeHandle, v2: bool) -> Result<Vec<NodeHandle>> {
    if v2 {
        tree.unboxed_children(h)
    } else {
        tree.children(h)
    }
}

fn visible_parent(tree: &mut DomTree, h: NodeHandle, v2: bool) -> Result<NodeHandle> {
    if v2 {
        tree.unboxed_parent(h)
    } else {
        tree.parent(h)
    }
}

/// Serializes `(node, offset)` using the document's dialect.
pub fn xpointer_string(tree: &mut DomTree, ptr: XPointer) -> Result<String> {
    let v2 = uses_v2(tree);
    xpointer_string_dialect(tree, ptr, v2)
}

pub fn xpointer_string_dialect(
    tree: &mut DomTree,
    ptr: XPointer,
    v2: bool,
) -> Result<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut node = ptr.node;
    while !node.is_null() && !tree.is_root(node) {
        let parent = visible_parent(tree, node, v2)?;
        if parent.is_null() {
            return Err(Error::XPointer(
                "node is not reachable from the root".into(),
            ));
        }
        let siblings = visible_children(tree, parent, v2)?;
        let mut index = 0usize;
        let mut found = false;
        if node.is_text() {
            for sib in &siblings {
                if sib.is_text() {
                    index += 1;
                }
                if sib.same_node(node) {
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(Error::XPointer("text node lost from its parent".into()));
            }
            segments.push(format!("text()[{index}]"));
        } else {
            let id = tree.node_id(node)?;
            for sib in &siblings {
                if sib.is_element() && tree.node_id(*sib)? == id {
                    index += 1;
                }
                if sib.same_node(node) {
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(Error::XPointer("element lost from its parent".into()));
            }
            let name = tree.names.elem_name(id).to_string();
            segments.push(format!("{name}[{index}]"));
        }
        node = parent;
    }
    segments.reverse();
    let mut out = String::new();
    for seg in &segments {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    if ptr.offset > 0 {
        out.push('.');
        out.push_str(&ptr.offset.to_string());
    }
    Ok(out)
}

/// Parses a path into `(node, offset)`. Both dialects are accepted: the
/// document's own dialect is tried first, the other as a fallback, so
/// bookmarks written by older versions still resolve.
pub fn create_xpointer(tree: &mut DomTree, path: &str) -> Result<XPointer> {
    let v2 = uses_v2(tree);
    match resolve(tree, path, v2) {
        Ok(ptr) => Ok(ptr),
        Err(primary) => resolve(tree, path, !v2).map_err(|_| primary),
    }
}

pub fn create_xpointer_dialect(tree: &mut DomTree, path: &str, v2: bool) -> Result<XPointer> {
    resolve(tree, path, v2)
}

fn resolve(tree: &mut DomTree, path: &str, v2: bool) -> Result<XPointer> {
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::XPointer("empty path".into()));
    }
    // Split a trailing ".offset" (only digits after the last dot).
    let (body, offset) = match path.rsplit_once('.') {
        Some((body, digits))
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (body, digits.parse::<usize>().unwrap_or(0))
        }
        _ => (path, 0),
    };

    let mut node = tree.root();
    for segment in body.split('/').filter(|s| !s.is_empty()) {
        let (name, index) = parse_segment(segment)?;
        let children = visible_children(tree, node, v2)?;
        let mut seen = 0usize;
        let mut next = NodeHandle::NULL;
        if name == "text()" {
            for child in children {
                if child.is_text() {
                    seen += 1;
                    if seen == index {
                        next = child;
                        break;
                    }
                }
            }
        } else {
            let Some(id) = tree.names.elements.lookup(name) else {
                return Err(Error::XPointer(format!("unknown element '{name}'")));
            };
            for child in children {
                if child.is_element() && tree.node_id(child)?.0 as u32 == id {
                    seen += 1;
                    if seen == index {
                        next = child;
                        break;
                    }
                }
            }
        }
        if next.is_null() {
            return Err(Error::XPointer(format!(
                "segment '{segment}' does not resolve"
            )));
        }
        node = next;
    }
    Ok(XPointer { node, offset })
}

/// Splits `name[3]` into `("name", 3)`; a missing index means 1.
fn parse_segment(segment: &str) -> Result<(&str, usize)> {
    match segment.split_once('[') {
        Some((name, rest)) => {
            let digits = rest
                .strip_suffix(']')
                .ok_or_else(|| Error::XPointer(format!("malformed segment '{segment}'")))?;
            let index: usize = digits
                .parse()
                .map_err(|_| Error::XPointer(format!("malformed index in '{segment}'")))?;
            if index == 0 {
                return Err(Error::XPointer("indexes are 1-based".into()));
            }
            Ok((name, index))
        }
        None => Ok((segment, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::names::{el, NsId};
    use crate::storage::DEFAULT_DOC_BUFFER_SIZE;

    fn sample_tree(dom_version: u32) -> (DomTree, NodeHandle, NodeHandle) {
        let mut t = DomTree::new(dom_version, DEFAULT_DOC_BUFFER_SIZE);
        let root = t.root();
        let html = t.append_child_element(root, NsId::NONE, el::HTML).unwrap();
        let body = t.append_child_element(html, NsId::NONE, el::BODY).unwrap();
        for i in 0..3 {
            let p = t.append_child_element(body, NsId::NONE, el::P).unwrap();
            t.append_child_text(p, &format!("paragraph {i}")).unwrap();
        }
        let p3 = t.child(body, 2).unwrap();
        (t, body, p3)
    }

    #[test]
    fn test_round_trip_every_node() {
        let (mut t, body, _) = sample_tree(20200824);
        let mut nodes = vec![body];
        for p in t.children(body).unwrap() {
            nodes.push(p);
            nodes.extend(t.children(p).unwrap());
        }
        for node in nodes {
            let s = xpointer_string(&mut t, XPointer { node, offset: 0 }).unwrap();
            let back = create_xpointer(&mut t, &s).unwrap();
            assert!(back.node.same_node(node), "path {s}");
        }
    }

    #[test]
    fn test_text_offset_round_trip() {
        let (mut t, body, p3) = sample_tree(20200824);
        let _ = body;
        let txt = t.child(p3, 0).unwrap();
        let ptr = XPointer {
            node: txt,
            offset: 7,
        };
        let s = xpointer_string(&mut t, ptr).unwrap();
        assert!(s.ends_with(".7"), "path {s}");
        assert_eq!(create_xpointer(&mut t, &s).unwrap(), ptr);
    }

    #[test]
    fn test_missing_index_means_first() {
        let (mut t, _, _) = sample_tree(20200824);
        let found = create_xpointer(&mut t, "/html/body/p").unwrap();
        let explicit = create_xpointer(&mut t, "/html[1]/body[1]/p[1]").unwrap();
        assert_eq!(found.node, explicit.node);
    }

    #[test]
    fn test_v2_survives_boxing_insertion_v1_does_not() {
        let (mut t, body, p3) = sample_tree(20200824);
        let s_v2 = xpointer_string_dialect(&mut t, XPointer { node: p3, offset: 0 }, true).unwrap();
        let s_v1 =
            xpointer_string_dialect(&mut t, XPointer { node: p3, offset: 0 }, false).unwrap();

        // Wrap the first two paragraphs in an anonymous box.
        let abox = t
            .insert_child_element(body, 0, NsId::NONE, el::AUTO_BOXING)
            .unwrap();
        t.move_children(body, 1, 2, abox).unwrap();

        let via_v2 = create_xpointer_dialect(&mut t, &s_v2, true).unwrap();
        assert!(via_v2.node.same_node(p3));
        // The V1 path now resolves elsewhere (or not at all).
        match create_xpointer_dialect(&mut t, &s_v1, false) {
            Ok(ptr) => assert!(!ptr.node.same_node(p3)),
            Err(_) => {}
        }
    }

    #[test]
    fn test_malformed_paths_rejected() {
        let (mut t, _, _) = sample_tree(20200824);
        assert!(create_xpointer(&mut t, "/html/body/p[0]").is_err());
        assert!(create_xpointer(&mut t, "/html/body/p[9]").is_err());
        assert!(create_xpointer(&mut t, "/nosuchtag").is_err());
        assert!(create_xpointer(&mut t, "").is_err());
    }
}
