//! Subtree serialization back to XHTML text.
//!
//! A diagnostic facility: the output mirrors the in-memory tree
//! (anonymous boxes included) rather than the original source markup.
//! Tests lean on it to assert whole-tree shapes in one comparison.

use crate::dom::handle::NodeHandle;
use crate::dom::tree::DomTree;
use crate::error::Result;

/// Serialization options; defaults produce compact single-line output.
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Indent with two spaces per depth and newlines between nodes.
    pub pretty: bool,
    /// Skip anonymous boxing elements, splicing their children inline.
    pub skip_boxing: bool,
}

pub fn dump_subtree(tree: &mut DomTree, h: NodeHandle, opts: DumpOptions) -> Result<String> {
    let mut out = String::new();
    dump_node(tree, h, opts, 0, &mut out)?;
    Ok(out)
}

fn dump_node(
    tree: &mut DomTree,
    h: NodeHandle,
    opts: DumpOptions,
    depth: usize,
    out: &mut String,
) -> Result<()> {
    if h.is_text() {
        indent(opts, depth, out);
        escape_into(&tree.text(h)?, out);
        newline(opts, out);
        return Ok(());
    }
    if opts.skip_boxing && tree.is_boxing_node(h)? {
        for child in tree.children(h)? {
            dump_node(tree, child, opts, depth, out)?;
        }
        return Ok(());
    }
    let id = tree.node_id(h)?;
    let name = if tree.is_root(h) {
        "#root".to_string()
    } else {
        tree.names.elem_name(id).to_string()
    };
    indent(opts, depth, out);
    out.push('<');
    out.push_str(&name);
    // Attributes in stored order, values escaped.
    let attrs = collect_attrs(tree, h)?;
    for (attr_name, value) in attrs {
        out.push(' ');
        out.push_str(&attr_name);
        out.push_str("=\"");
        escape_into(&value, out);
        out.push('"');
    }
    if tree.child_count(h)? == 0 {
        out.push_str("/>");
        newline(opts, out);
        return Ok(());
    }
    out.push('>');
    newline(opts, out);
    for child in tree.children(h)? {
        dump_node(tree, child, opts, depth + 1, out)?;
    }
    indent(opts, depth, out);
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
    newline(opts, out);
    Ok(())
}

fn collect_attrs(tree: &mut DomTree, h: NodeHandle) -> Result<Vec<(String, String)>> {
    // Works on both node forms: the accessor reads through the packed
    // payload for persistent elements.
    let mut out = Vec::new();
    let attrs = tree.attrs_of(h)?;
    for (ns, id, value) in attrs {
        let mut name = String::new();
        if ns.0 != 0 {
            name.push_str(tree.names.ns_name(ns));
            name.push(':');
        }
        name.push_str(tree.names.attr_name(id));
        out.push((name, tree.names.value(value).to_string()));
    }
    Ok(out)
}

fn indent(opts: DumpOptions, depth: usize, out: &mut String) {
    if opts.pretty {
        for _ in 0..depth {
            out.push_str("  ");
        }
    }
}

fn newline(opts: DumpOptions, out: &mut String) {
    if opts.pretty {
        out.push('\n');
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
