//! Anonymous-box generation at the document level: table completion
//! and ruby wrapping as seen after a full parse.

use lectern::dom::{attr, el, NsId};
use lectern::{Document, NodeHandle, RendMethod};

fn parse(markup: &str) -> Document {
    let mut doc = Document::new();
    doc.parse_html(markup).unwrap();
    doc
}

fn body_of(doc: &mut Document) -> NodeHandle {
    let root = doc.tree.root();
    let html = doc.tree.child(root, 0).unwrap();
    let count = doc.tree.child_count(html).unwrap();
    for i in 0..count {
        let child = doc.tree.child(html, i).unwrap();
        if doc.tree.node_id(child).unwrap() == el::BODY {
            return child;
        }
    }
    panic!("no body element");
}

#[test]
fn test_display_table_div_completes_to_table() {
    let mut doc = parse(
        "<div style=\"display:table\"><div style=\"display:table-cell\">c</div></div>",
    );
    let body = body_of(&mut doc);
    let outer = doc.tree.child(body, 0).unwrap();
    assert_eq!(doc.tree.rend_method(outer).unwrap(), RendMethod::Table);

    // A synthesized tabularBox row wraps the cell.
    let row = doc.tree.child(outer, 0).unwrap();
    assert_eq!(doc.tree.node_id(row).unwrap(), el::TABULAR_BOX);
    assert_eq!(doc.tree.rend_method(row).unwrap(), RendMethod::TableRow);
    let cell = doc.tree.child(row, 0).unwrap();
    assert_eq!(doc.tree.rend_method(cell).unwrap(), RendMethod::Final);
    let text = doc.tree.child(cell, 0).unwrap();
    assert_eq!(doc.tree.text(text).unwrap(), "c");
}

#[test]
fn test_real_table_needs_no_boxes() {
    let mut doc = parse("<table><tr><td>x</td><td>y</td></tr></table>");
    let body = body_of(&mut doc);
    let table = doc.tree.child(body, 0).unwrap();
    assert_eq!(doc.tree.rend_method(table).unwrap(), RendMethod::Table);
    let tbody = doc.tree.child(table, 0).unwrap();
    assert_eq!(
        doc.tree.rend_method(tbody).unwrap(),
        RendMethod::TableRowGroup
    );
    let tr = doc.tree.child(tbody, 0).unwrap();
    assert_eq!(doc.tree.rend_method(tr).unwrap(), RendMethod::TableRow);
    assert_eq!(doc.tree.child_count(tr).unwrap(), 2);
}

#[test]
fn test_ruby_segments_build_inline_tables() {
    let mut doc = parse("<ruby>\u{6f22}<rt>kan</rt>\u{5b57}<rt>ji</rt></ruby>");
    let body = body_of(&mut doc);
    // The ruby sits inside the autoBoxing/final structure of body; find it.
    let ruby = find_tag(&mut doc, body, el::RUBY).expect("ruby element");
    assert_eq!(doc.tree.rend_method(ruby).unwrap(), RendMethod::Inline);

    let segments: Vec<NodeHandle> = doc
        .tree
        .children(ruby)
        .unwrap()
        .into_iter()
        .filter(|c| c.is_element() && doc.tree.node_id(*c).unwrap() == el::INLINE_BOX)
        .collect();
    assert_eq!(segments.len(), 2, "one segment per base/annotation pair");

    for seg in segments {
        let rbox = doc.tree.child(seg, 0).unwrap();
        assert_eq!(doc.tree.node_id(rbox).unwrap(), el::RUBY_BOX);
        assert_eq!(doc.tree.rend_method(rbox).unwrap(), RendMethod::Table);
        let rows = doc.tree.children(rbox).unwrap();
        assert_eq!(rows.len(), 2);
        // Base row then annotation row, tagged for styling.
        assert_eq!(
            doc.tree.attr_str(rows[0], NsId::NONE, attr::T).unwrap(),
            Some("rbc")
        );
        assert_eq!(
            doc.tree.rend_method(rows[0]).unwrap(),
            RendMethod::TableRow
        );
        assert_eq!(
            doc.tree.rend_method(rows[1]).unwrap(),
            RendMethod::TableRow
        );
    }
}

#[test]
fn test_annotation_only_ruby_gets_empty_base() {
    let mut doc = parse("<ruby><rt>solo</rt></ruby>");
    let body = body_of(&mut doc);
    let ruby = find_tag(&mut doc, body, el::RUBY).expect("ruby element");
    let seg = doc
        .tree
        .children(ruby)
        .unwrap()
        .into_iter()
        .find(|c| c.is_element() && doc.tree.node_id(*c).unwrap() == el::INLINE_BOX)
        .expect("segment");
    let rbox = doc.tree.child(seg, 0).unwrap();
    let rows = doc.tree.children(rbox).unwrap();
    // Synthesized empty base row before the annotation row.
    assert_eq!(
        doc.tree.attr_str(rows[0], NsId::NONE, attr::T).unwrap(),
        Some("rbc")
    );
    // The empty base cell holds a zero-width space to keep row height.
    let base_cell = doc.tree.child(rows[0], 0).unwrap();
    let pad = doc.tree.child(base_cell, 0).unwrap();
    assert_eq!(doc.tree.text(pad).unwrap(), "\u{200B}");
}

#[test]
fn test_boxing_nodes_are_transparent_to_unboxed_navigation() {
    let mut doc = parse("<div>loose<p>para</p></div>");
    let body = body_of(&mut doc);
    let div = doc.tree.child(body, 0).unwrap();
    // Mixed content: the loose text was autoboxed.
    let raw_children = doc.tree.children(div).unwrap();
    assert!(raw_children
        .iter()
        .any(|c| c.is_element() && doc.tree.node_id(*c).unwrap() == el::AUTO_BOXING));
    // The unboxed view hides the wrapper.
    let unboxed = doc.tree.unboxed_children(div).unwrap();
    assert_eq!(unboxed.len(), 2);
    assert!(unboxed[0].is_text());
    assert_eq!(doc.tree.node_id(unboxed[1]).unwrap(), el::P);
}

fn find_tag(doc: &mut Document, from: NodeHandle, tag: lectern::dom::ElemId) -> Option<NodeHandle> {
    let mut stack = vec![from];
    while let Some(h) = stack.pop() {
        if h.is_element() {
            if doc.tree.node_id(h).unwrap() == tag {
                return Some(h);
            }
            let mut children = doc.tree.children(h).unwrap();
            children.reverse();
            stack.extend(children);
        }
    }
    None
}
