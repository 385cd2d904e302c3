//! Whole-document save/load round-trips and XPointer stability.

use lectern::dom::dump::{dump_subtree, DumpOptions};
use lectern::dom::{el, xpointer, NsId};
use lectern::{
    create_xpointer, xpointer_string, Deadline, Document, FileStream, NullProgress, Progress,
    XPointer,
};
use std::time::Duration;
use tempfile::TempDir;

const BOOK: &str = "<html><head><title>Round Trip</title>\
<style>p { text-indent: 1em }</style></head>\
<body><div class=\"chapter\"><h1>One</h1><p>First paragraph with <b>bold</b> text.</p>\
<p style=\"text-align: center\">Centered.</p></div>\
<div class=\"chapter\"><h1>Two</h1><table><tr><td>cell</td></tr></table></div></body></html>";

fn parse_and_cache(path: &std::path::Path) -> Document {
    let mut doc = Document::new();
    doc.parse_html(BOOK).unwrap();
    doc.props.set("doc.format", "html");
    doc.props.set("doc.title", "Round Trip");
    doc.add_blob("font1.ttf", vec![0xF0u8; 256]);
    doc.create_cache(Box::new(FileStream::create(path).unwrap()))
        .unwrap();
    assert_eq!(
        doc.save_changes(Deadline::none(), &mut NullProgress).unwrap(),
        Progress::Done
    );
    doc
}

fn reload(path: &std::path::Path) -> Document {
    let mut doc = Document::new();
    doc.open_cache(Box::new(FileStream::open(path).unwrap()))
        .unwrap();
    assert!(doc.load_from_cache(None, &mut NullProgress));
    doc
}

#[test]
fn test_dom_structure_survives_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.cache");
    let mut original = parse_and_cache(&path);
    let mut reloaded = reload(&path);

    let opts = DumpOptions {
        pretty: true,
        ..Default::default()
    };
    let original_root = original.tree.root();
    let before = dump_subtree(&mut original.tree, original_root, opts).unwrap();
    let reloaded_root = reloaded.tree.root();
    let after = dump_subtree(&mut reloaded.tree, reloaded_root, opts).unwrap();
    assert_eq!(before, after, "tree shape, names, attrs and text must match");
}

#[test]
fn test_rend_methods_and_styles_survive_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.cache");
    let mut original = parse_and_cache(&path);
    let mut reloaded = reload(&path);

    fn walk(doc: &mut Document, h: lectern::NodeHandle, out: &mut Vec<(u16, u8, u16)>) {
        if h.is_element() {
            let id = doc.tree.node_id(h).unwrap().0;
            let rm = doc.tree.rend_method(h).unwrap() as u8;
            let (style, _) = doc.tree.style_ids(h).unwrap();
            out.push((id, rm, style.0));
            for child in doc.tree.children(h).unwrap() {
                walk(doc, child, out);
            }
        }
    }
    let mut before = Vec::new();
    let root = original.tree.root();
    walk(&mut original, root, &mut before);
    let mut after = Vec::new();
    let root = reloaded.tree.root();
    walk(&mut reloaded, root, &mut after);
    assert_eq!(before, after);
}

#[test]
fn test_props_toc_and_blobs_survive_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.cache");
    let original = parse_and_cache(&path);
    let mut reloaded = reload(&path);

    assert_eq!(reloaded.props.get("doc.title"), Some("Round Trip"));
    assert_eq!(reloaded.props.get("doc.format"), Some("html"));
    assert_eq!(
        reloaded.get_blob("font1.ttf").unwrap(),
        Some(vec![0xF0u8; 256])
    );
    assert_eq!(original.toc, reloaded.toc);
}

#[test]
fn test_xpointers_resolve_identically_after_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.cache");
    let mut original = parse_and_cache(&path);

    // Record a pointer to every text node.
    let mut paths = Vec::new();
    let mut stack = vec![original.tree.root()];
    while let Some(h) = stack.pop() {
        if h.is_text() {
            let s = xpointer_string(&mut original.tree, XPointer { node: h, offset: 0 }).unwrap();
            let text = original.tree.text(h).unwrap();
            paths.push((s, text));
        } else {
            stack.extend(original.tree.children(h).unwrap());
        }
    }
    assert!(!paths.is_empty());

    let mut reloaded = reload(&path);
    for (path_str, text) in paths {
        let ptr = create_xpointer(&mut reloaded.tree, &path_str).unwrap();
        assert_eq!(
            reloaded.tree.text(ptr.node).unwrap(),
            text,
            "pointer {path_str} must find the same text"
        );
    }
}

#[test]
fn test_xpointer_v2_survives_new_boxing_v1_does_not() {
    let mut doc = Document::new();
    doc.parse_html("<div><p>one</p><p>two</p><p>three</p></div>").unwrap();
    let root = doc.tree.root();
    let html = doc.tree.child(root, 0).unwrap();
    let body = doc.tree.child(html, 0).unwrap();
    let div = doc.tree.child(body, 0).unwrap();
    let p3 = doc.tree.child(div, 2).unwrap();

    let ptr = XPointer { node: p3, offset: 0 };
    let v2 = xpointer::xpointer_string_dialect(&mut doc.tree, ptr, true).unwrap();
    let v1 = xpointer::xpointer_string_dialect(&mut doc.tree, ptr, false).unwrap();

    // A later re-render wraps the first two paragraphs in a tabularBox.
    let tbox = doc
        .tree
        .insert_child_element(div, 0, NsId::NONE, el::TABULAR_BOX)
        .unwrap();
    doc.tree.move_children(div, 1, 2, tbox).unwrap();

    let via_v2 = xpointer::create_xpointer_dialect(&mut doc.tree, &v2, true).unwrap();
    assert!(via_v2.node.same_node(p3), "V2 ignores anonymous wrappers");

    match xpointer::create_xpointer_dialect(&mut doc.tree, &v1, false) {
        Ok(found) => assert!(!found.node.same_node(p3), "V1 path must have shifted"),
        Err(_) => {} // or stopped resolving entirely
    }
}

#[test]
fn test_timed_save_resumes_until_done() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.cache");
    let mut doc = Document::new();
    doc.parse_html(BOOK).unwrap();
    doc.create_cache(Box::new(FileStream::create(&path).unwrap()))
        .unwrap();

    // Zero-budget deadlines force a Timeout at every stage boundary;
    // the save still completes across repeated calls.
    let mut rounds = 0;
    loop {
        rounds += 1;
        assert!(rounds < 100, "save must make progress");
        match doc
            .save_changes(Deadline::after(Duration::ZERO), &mut NullProgress)
            .unwrap()
        {
            Progress::Done => break,
            Progress::Timeout => continue,
        }
    }
    assert!(rounds > 1, "zero budget must have timed out at least once");
    drop(doc);

    let mut reloaded = reload(&path);
    let body = {
        let root = reloaded.tree.root();
        let html = reloaded.tree.child(root, 0).unwrap();
        reloaded.tree.child(html, 1).unwrap()
    };
    assert_eq!(reloaded.tree.node_id(body).unwrap(), el::BODY);
}
