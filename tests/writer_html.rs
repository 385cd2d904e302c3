//! Lossy-HTML writer scenarios: auto-close, foster parenting, implicit
//! containers, stylesheet injection and attribute translation.

use lectern::dom::dump::{dump_subtree, DumpOptions};
use lectern::dom::{attr, el, NsId};
use lectern::{Document, NodeHandle};

fn parse(markup: &str) -> Document {
    let mut doc = Document::new();
    doc.parse_html(markup).unwrap();
    doc
}

/// The <body> element of a parsed document.
fn body_of(doc: &mut Document) -> NodeHandle {
    let root = doc.tree.root();
    let html = doc.tree.child(root, 0).unwrap();
    assert_eq!(doc.tree.node_id(html).unwrap(), el::HTML);
    let count = doc.tree.child_count(html).unwrap();
    for i in 0..count {
        let child = doc.tree.child(html, i).unwrap();
        if doc.tree.node_id(child).unwrap() == el::BODY {
            return child;
        }
    }
    panic!("no body element");
}

fn shape(doc: &mut Document, h: NodeHandle) -> String {
    dump_subtree(&mut doc.tree, h, DumpOptions::default()).unwrap()
}

// ============================================================================
// Tag auto-close
// ============================================================================

#[test]
fn test_p_auto_close_makes_siblings() {
    let mut doc = parse("<p>a<p>b<p>c");
    let body = body_of(&mut doc);
    assert_eq!(doc.tree.child_count(body).unwrap(), 3);
    for i in 0..3 {
        let p = doc.tree.child(body, i).unwrap();
        assert_eq!(doc.tree.node_id(p).unwrap(), el::P);
        assert!(doc.tree.parent(p).unwrap().same_node(body));
    }
    assert_eq!(shape(&mut doc, body), "<body><p>a</p><p>b</p><p>c</p></body>");
}

#[test]
fn test_li_closes_previous_li_but_not_nested_list() {
    let mut doc = parse("<ul><li>one<li>two<ul><li>deep</ul><li>three</ul>");
    let body = body_of(&mut doc);
    let ul = doc.tree.child(body, 0).unwrap();
    assert_eq!(doc.tree.node_id(ul).unwrap(), el::UL);
    // one, two (holding the nested list), three
    let lis: Vec<_> = doc.tree.children(ul).unwrap();
    assert_eq!(lis.len(), 3);
    let nested = doc.tree.child(lis[1], 1).unwrap();
    assert_eq!(doc.tree.node_id(nested).unwrap(), el::UL);
    assert_eq!(doc.tree.child_count(nested).unwrap(), 1);
}

#[test]
fn test_heading_closes_heading() {
    let mut doc = parse("<h2>alpha<h3>beta");
    let body = body_of(&mut doc);
    assert_eq!(doc.tree.child_count(body).unwrap(), 2);
    let first = doc.tree.child(body, 0).unwrap();
    assert_eq!(doc.tree.node_id(first).unwrap(), el::H2);
    let second = doc.tree.child(body, 1).unwrap();
    assert_eq!(doc.tree.node_id(second).unwrap(), el::H3);
}

#[test]
fn test_standalone_closing_br_inserts_br() {
    let mut doc = parse("<p>a</br>b</p>");
    let body = body_of(&mut doc);
    let p = doc.tree.child(body, 0).unwrap();
    let kinds: Vec<_> = doc
        .tree
        .children(p)
        .unwrap()
        .into_iter()
        .map(|c| {
            if c.is_text() {
                "text".to_string()
            } else {
                let id = doc.tree.node_id(c).unwrap();
                doc.tree.names.elem_name(id).to_string()
            }
        })
        .collect();
    assert_eq!(kinds, vec!["text", "br", "text"]);
}

#[test]
fn test_stray_closing_p_emits_empty_paragraph() {
    let mut doc = parse("<div>x</p>y</div>");
    let body = body_of(&mut doc);
    let div = doc.tree.child(body, 0).unwrap();
    let has_empty_p = doc
        .tree
        .children(div)
        .unwrap()
        .into_iter()
        .any(|c| c.is_element() && doc.tree.node_id(c).unwrap() == el::P);
    assert!(has_empty_p, "stray </p> should materialize <p></p>");
}

// ============================================================================
// Foster parenting
// ============================================================================

#[test]
fn test_foster_parenting_moves_div_before_table() {
    let mut doc = parse("<table><div>x</div><tr><td>y</td></tr></table>");
    let body = body_of(&mut doc);

    // The div was reparented as the previous sibling of the table.
    let children = doc.tree.children(body).unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(doc.tree.node_id(children[0]).unwrap(), el::DIV);
    assert_eq!(doc.tree.node_id(children[1]).unwrap(), el::TABLE);
    assert_eq!(
        shape(&mut doc, children[0]),
        "<div>x</div>"
    );

    // The table still holds its (auto-completed) row with the cell.
    let table = children[1];
    let tbody = doc.tree.child(table, 0).unwrap();
    assert_eq!(doc.tree.node_id(tbody).unwrap(), el::TBODY);
    let tr = doc.tree.child(tbody, 0).unwrap();
    assert_eq!(doc.tree.node_id(tr).unwrap(), el::TR);
    let td = doc.tree.child(tr, 0).unwrap();
    assert_eq!(doc.tree.node_id(td).unwrap(), el::TD);
    let text = doc.tree.child(td, 0).unwrap();
    assert_eq!(doc.tree.text(text).unwrap(), "y");
}

#[test]
fn test_foster_parented_text() {
    let mut doc = parse("<table>loose<tr><td>y</td></tr></table>");
    let body = body_of(&mut doc);
    let children = doc.tree.children(body).unwrap();
    assert_eq!(children.len(), 2);
    assert!(children[0].is_text());
    assert_eq!(doc.tree.text(children[0]).unwrap(), "loose");
    assert_eq!(doc.tree.node_id(children[1]).unwrap(), el::TABLE);
}

#[test]
fn test_stray_cell_outside_table_is_ignored() {
    let mut doc = parse("<div><td>orphan</td>ok</div>");
    let body = body_of(&mut doc);
    let div = doc.tree.child(body, 0).unwrap();
    for child in doc.tree.children(div).unwrap() {
        if child.is_element() {
            assert_ne!(doc.tree.node_id(child).unwrap(), el::TD);
        }
    }
}

// ============================================================================
// Implicit containers
// ============================================================================

#[test]
fn test_bare_text_gets_html_body() {
    let mut doc = parse("just some text");
    let body = body_of(&mut doc);
    let text = doc.tree.child(body, 0).unwrap();
    assert!(text.is_text());
    assert_eq!(doc.tree.text(text).unwrap(), "just some text");
}

#[test]
fn test_head_content_gets_head_then_body_opens() {
    let mut doc = parse("<title>T</title><p>content</p>");
    let root = doc.tree.root();
    let html = doc.tree.child(root, 0).unwrap();
    let head = doc.tree.child(html, 0).unwrap();
    assert_eq!(doc.tree.node_id(head).unwrap(), el::HEAD);
    let title = doc.tree.child(head, 0).unwrap();
    assert_eq!(doc.tree.node_id(title).unwrap(), el::TITLE);
    let body = doc.tree.child(html, 1).unwrap();
    assert_eq!(doc.tree.node_id(body).unwrap(), el::BODY);
}

// ============================================================================
// Head styles and links
// ============================================================================

#[test]
fn test_head_style_and_links_injected_into_body() {
    let mut doc = parse(
        "<html><head>\
         <link rel=\"stylesheet\" type=\"text/css\" href=\"main.css\"></link>\
         <style>p { color: red }</style>\
         </head><body><p>text</p></body></html>",
    );
    let body = body_of(&mut doc);
    let first = doc.tree.child(body, 0).unwrap();
    assert_eq!(doc.tree.node_id(first).unwrap(), el::STYLESHEET);
    let css_node = doc.tree.child(first, 0).unwrap();
    let css = doc.tree.text(css_node).unwrap();
    assert!(css.contains("@import url(\"main.css\");"), "css: {css}");
    assert!(css.contains("color: red"), "css: {css}");
}

// ============================================================================
// Presentational attributes
// ============================================================================

#[test]
fn test_align_becomes_text_align_style() {
    let mut doc = parse("<div align=\"center\">x</div>");
    let body = body_of(&mut doc);
    let div = doc.tree.child(body, 0).unwrap();
    let style = doc
        .tree
        .attr_str(div, NsId::NONE, attr::STYLE)
        .unwrap()
        .unwrap_or("")
        .to_string();
    assert!(style.contains("text-align: center"), "style: {style}");
}

#[test]
fn test_width_on_table_becomes_style() {
    let mut doc = parse("<table width=\"50%\"><tr><td width=\"120\">x</td></tr></table>");
    let body = body_of(&mut doc);
    let table = doc.tree.child(body, 0).unwrap();
    let style = doc
        .tree
        .attr_str(table, NsId::NONE, attr::STYLE)
        .unwrap()
        .unwrap_or("")
        .to_string();
    assert!(style.contains("width: 50%"), "style: {style}");
}

// ============================================================================
// lib.ru plaintext-in-HTML heuristic
// ============================================================================

#[test]
fn test_libru_pre_becomes_paragraph_stream() {
    let mut doc = parse(
        "<div align=\"center\"><form>nav</form></div>\
         <pre>   First paragraph line.\n   Second paragraph line.\n----------\nTHE END</pre>",
    );
    let body = body_of(&mut doc);
    // The pre was re-tagged as a div with a parser hint.
    let mut found_div = None;
    for child in doc.tree.children(body).unwrap() {
        if child.is_element()
            && doc.tree.node_id(child).unwrap() == el::DIV
            && doc
                .tree
                .attr_str(child, NsId::NONE, attr::PARSER_HINT)
                .unwrap()
                == Some("ParseAsPre")
        {
            found_div = Some(child);
        }
    }
    let div = found_div.expect("re-tagged pre should be present");
    let tags: Vec<String> = doc
        .tree
        .children(div)
        .unwrap()
        .into_iter()
        .filter(|c| c.is_element())
        .map(|c| {
            let id = doc.tree.node_id(c).unwrap();
            doc.tree.names.elem_name(id).to_string()
        })
        .collect();
    assert!(tags.contains(&"p".to_string()), "tags: {tags:?}");
    assert!(tags.contains(&"hr".to_string()), "tags: {tags:?}");
    assert!(tags.contains(&"h2".to_string()), "tags: {tags:?}");
}
