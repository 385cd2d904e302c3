//! Render-method derivation and anonymous-box generation.
//!
//! Runs bottom-up once an element's subtree is complete (the writers
//! call it from their element-close path, re-renders walk deep-first).
//! Decides how each element will be laid out and inserts the anonymous
//! wrappers CSS requires: `autoBoxing` around inline runs inside mixed
//! content, `tabularBox` to complete partial tables, `inlineBox` around
//! blocks embedded in inline context, and the `rubyBox` lattice that
//! turns ruby annotations into a small inline table.

use crate::dom::handle::NodeHandle;
use crate::dom::names::{el, TagFlags};
use crate::dom::node::RendMethod;
use crate::dom::tree::DomTree;
use crate::error::Result;
use crate::style::{ComputedStyle, Display, Float};

/// Whitespace-only check used when deciding whether a text node matters
/// for box generation.
pub fn is_empty_space(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace())
}

fn is_inline_node(tree: &mut DomTree, h: NodeHandle) -> Result<bool> {
    if h.is_text() {
        return Ok(true);
    }
    Ok(tree.rend_method(h)? == RendMethod::Inline)
}

fn is_floating(tree: &mut DomTree, h: NodeHandle) -> Result<bool> {
    if !h.is_element() {
        return Ok(false);
    }
    Ok(tree.style(h)?.float != Float::None)
}

fn has_invisible_parent(tree: &mut DomTree, h: NodeHandle) -> Result<bool> {
    let mut node = h;
    while !node.is_null() && !tree.is_root(node) {
        if tree.style(node)?.display == Display::None {
            return Ok(true);
        }
        node = tree.parent(node)?;
    }
    Ok(false)
}

fn reset_rend_method_to_inline(tree: &mut DomTree, h: NodeHandle) -> Result<()> {
    if h.is_element() {
        tree.set_rend_method(h, RendMethod::Inline)?;
        for child in tree.children(h)? {
            reset_rend_method_to_inline(tree, child)?;
        }
    }
    Ok(())
}

struct ChildKinds {
    has_block: bool,
    has_inline: bool,
    has_internal_table: bool,
    has_floating: bool,
}

fn detect_child_types(tree: &mut DomTree, parent: NodeHandle) -> Result<ChildKinds> {
    let mut kinds = ChildKinds {
        has_block: false,
        has_inline: false,
        has_internal_table: false,
        has_floating: false,
    };
    if tree.node_id(parent)? == el::PSEUDO_ELEM {
        // Generated content: plain text only, no children to inspect.
        kinds.has_inline = true;
        return Ok(kinds);
    }
    for child in tree.children(parent)? {
        if child.is_text() {
            kinds.has_inline = true;
            continue;
        }
        if is_floating(tree, child)? {
            kinds.has_floating = true;
            continue;
        }
        let d = tree.style(child)?.display;
        let m = tree.rend_method(child)?;
        if d == Display::None || m == RendMethod::Invisible {
            continue;
        }
        if m == RendMethod::Inline {
            kinds.has_inline = true;
        } else {
            kinds.has_block = true;
            if d.is_table_internal() || m > RendMethod::Table {
                kinds.has_internal_table = true;
            }
        }
    }
    Ok(kinds)
}

/// Wraps children `start..=end` (trimmed of empty-space text at both
/// ends) into a fresh `wrapper` element. Returns the wrapper, or `None`
/// when the range was all empty space (then it is just removed).
fn box_wrap_children(
    tree: &mut DomTree,
    parent: NodeHandle,
    start: usize,
    end: usize,
    wrapper: crate::dom::names::ElemId,
) -> Result<Option<NodeHandle>> {
    let mut first = start;
    let mut last = end;
    while first <= end {
        let child = tree.child(parent, first)?;
        if !child.is_text() || !is_empty_space(&tree.text(child)?) {
            break;
        }
        first += 1;
    }
    while last >= first && last >= start {
        let child = tree.child(parent, last)?;
        if !child.is_text() || !is_empty_space(&tree.text(child)?) {
            break;
        }
        if last == 0 {
            break;
        }
        last -= 1;
    }
    if first > last {
        tree.remove_children(parent, start, end)?;
        return Ok(None);
    }
    // Trailing empties first so earlier indices stay valid.
    if last < end {
        tree.remove_children(parent, last + 1, end)?;
    }
    let ns = tree.ns_id(parent)?;
    let boxed = tree.insert_child_element(parent, first, ns, wrapper)?;
    tree.move_children(parent, first + 1, last + 1, boxed)?;
    if first > start {
        tree.remove_children(parent, start, first - 1)?;
    }
    Ok(Some(boxed))
}

/// Inherits style onto a freshly inserted anonymous box.
fn init_box_style(tree: &mut DomTree, boxed: NodeHandle, display: Display) -> Result<()> {
    let parent = tree.parent(boxed)?;
    let mut style = if parent.is_null() {
        ComputedStyle::default()
    } else {
        tree.style(parent)?
    };
    style.display = display;
    style.float = Float::None;
    tree.apply_style(boxed, style)
}

/// The `autoBoxing` pass: wraps an inline run found among block
/// siblings, dropping empty-space edges, so the parent can stay a block
/// container.
fn autobox_children(
    tree: &mut DomTree,
    parent: NodeHandle,
    start: usize,
    end: usize,
    handle_floating: bool,
) -> Result<()> {
    let pre = tree.style(parent)?.white_space.is_pre();
    let mut has_inline = pre;
    let mut has_non_empty_inline = pre;
    let mut has_floating = false;
    if !pre {
        for i in start..=end {
            let child = tree.child(parent, i)?;
            if is_inline_node(tree, child)? {
                has_inline = true;
                if child.is_text() {
                    if !is_empty_space(&tree.text(child)?) {
                        has_non_empty_inline = true;
                    }
                } else if !(handle_floating && is_floating(tree, child)?) {
                    has_non_empty_inline = true;
                }
            }
            if handle_floating && is_floating(tree, child)? {
                has_floating = true;
            }
            if has_non_empty_inline && has_floating {
                break;
            }
        }
    }

    if has_floating && !has_non_empty_inline {
        // Only floats separated by empty space: drop the spaces and let
        // the floats stand as blocks.
        let mut i = end as isize;
        while i >= start as isize {
            let child = tree.child(parent, i as usize)?;
            if !is_floating(tree, child)? {
                tree.remove_children(parent, i as usize, i as usize)?;
            }
            i -= 1;
        }
    } else if has_inline {
        if let Some(abox) = box_wrap_children(tree, parent, start, end, el::AUTO_BOXING)? {
            init_box_style(tree, abox, Display::Block)?;
            tree.set_rend_method(abox, RendMethod::Final)?;
        }
    } else {
        // Only empty items: remove them instead of boxing.
        tree.remove_children(parent, start, end)?;
    }
    Ok(())
}

/// When a container holds only whitespace text (plus possible floats),
/// drop the text so the floats can live in a plain block. Returns true
/// if that cleanup applied.
fn clean_if_only_empty_text_inline(tree: &mut DomTree, h: NodeHandle) -> Result<bool> {
    if tree.style(h)?.white_space >= crate::style::WhiteSpace::Pre {
        return Ok(false);
    }
    for child in tree.children(h)? {
        if child.is_text() {
            if !is_empty_space(&tree.text(child)?) {
                return Ok(false);
            }
        } else if !is_floating(tree, child)? {
            return Ok(false);
        }
    }
    let mut i = tree.child_count(h)? as isize - 1;
    while i >= 0 {
        let child = tree.child(h, i as usize)?;
        if child.is_text() {
            tree.remove_children(h, i as usize, i as usize)?;
        }
        i -= 1;
    }
    Ok(true)
}

/// CSS 2.2 "generate missing child wrappers" for tables. `state`: 0 =
/// in table, 1 = in colgroup, 2 = in row group, 3 = in row.
fn init_table_rend_methods(tree: &mut DomTree, enode: NodeHandle, state: u8) -> Result<usize> {
    if state == 0 {
        tree.set_rend_method(enode, RendMethod::Table)?;
    }
    let mut cell_count = 0;
    let mut i = 0usize;
    let mut first_unproper: Option<usize> = None;
    let mut last_unproper = 0usize;
    loop {
        let cnt = tree.child_count(enode)?;
        if i >= cnt {
            break;
        }
        let child = tree.child(enode, i)?;
        let d = if child.is_element() {
            tree.style(child)?.display
        } else {
            Display::Inline
        };
        let is_last = i == cnt - 1;
        let mut is_proper = false;
        match state {
            0 => match d {
                Display::TableRow => {
                    tree.set_rend_method(child, RendMethod::TableRow)?;
                    cell_count += init_table_rend_methods(tree, child, 3)?;
                    is_proper = true;
                }
                Display::TableRowGroup => {
                    tree.set_rend_method(child, RendMethod::TableRowGroup)?;
                    cell_count += init_table_rend_methods(tree, child, 2)?;
                    is_proper = true;
                }
                Display::TableHeaderGroup => {
                    tree.set_rend_method(child, RendMethod::TableHeaderGroup)?;
                    cell_count += init_table_rend_methods(tree, child, 2)?;
                    is_proper = true;
                }
                Display::TableFooterGroup => {
                    tree.set_rend_method(child, RendMethod::TableFooterGroup)?;
                    cell_count += init_table_rend_methods(tree, child, 2)?;
                    is_proper = true;
                }
                Display::TableColumnGroup => {
                    tree.set_rend_method(child, RendMethod::TableColumnGroup)?;
                    cell_count += init_table_rend_methods(tree, child, 1)?;
                    is_proper = true;
                }
                Display::TableColumn => {
                    tree.set_rend_method(child, RendMethod::TableColumn)?;
                    is_proper = true;
                }
                Display::TableCaption => {
                    tree.set_rend_method(child, RendMethod::Final)?;
                    is_proper = true;
                }
                Display::None => {
                    tree.set_rend_method(child, RendMethod::Invisible)?;
                    is_proper = true;
                }
                _ if child.is_element() && tree.node_id(child)? == el::TABULAR_BOX => {
                    // Inserted by us on a previous rendering: reuse.
                    tree.set_rend_method(child, RendMethod::TableRow)?;
                    cell_count += init_table_rend_methods(tree, child, 3)?;
                    is_proper = true;
                }
                _ => {}
            },
            2 => match d {
                Display::TableRow => {
                    tree.set_rend_method(child, RendMethod::TableRow)?;
                    cell_count += init_table_rend_methods(tree, child, 3)?;
                    is_proper = true;
                }
                Display::None => {
                    tree.set_rend_method(child, RendMethod::Invisible)?;
                    is_proper = true;
                }
                _ if child.is_element() && tree.node_id(child)? == el::TABULAR_BOX => {
                    tree.set_rend_method(child, RendMethod::TableRow)?;
                    cell_count += init_table_rend_methods(tree, child, 3)?;
                    is_proper = true;
                }
                _ => {}
            },
            3 => match d {
                Display::TableCell => {
                    init_rend_method_recursive(tree, child)?;
                    let rm = cell_rend_method(tree, child)?;
                    tree.set_rend_method(child, rm)?;
                    cell_count += 1;
                    is_proper = true;
                }
                Display::None => {
                    tree.set_rend_method(child, RendMethod::Invisible)?;
                    is_proper = true;
                }
                _ if child.is_element() && tree.node_id(child)? == el::TABULAR_BOX => {
                    init_rend_method_recursive(tree, child)?;
                    let rm = cell_rend_method(tree, child)?;
                    tree.set_rend_method(child, rm)?;
                    cell_count += 1;
                    is_proper = true;
                }
                _ => {}
            },
            1 => {
                // Invalid colgroup children are simply not rendered.
                if child.is_element() {
                    if d == Display::TableColumn {
                        tree.set_rend_method(child, RendMethod::TableColumn)?;
                    } else {
                        tree.set_rend_method(child, RendMethod::Invisible)?;
                    }
                }
                is_proper = true;
            }
            _ => unreachable!("table wrapping state"),
        }

        if !is_proper {
            last_unproper = i;
            if first_unproper.is_none() {
                first_unproper = Some(i);
            }
        }
        if let Some(first) = first_unproper {
            if is_proper || is_last {
                let upper = if is_proper { last_unproper } else { i.max(last_unproper) };
                let removed_before = tree.child_count(enode)?;
                let tbox = box_wrap_children(tree, enode, first, upper, el::TABULAR_BOX)?;
                if let Some(tbox) = tbox {
                    match state {
                        0 | 2 => {
                            init_box_style(tree, tbox, Display::TableRow)?;
                            tree.set_rend_method(tbox, RendMethod::TableRow)?;
                            cell_count += init_table_rend_methods(tree, tbox, 3)?;
                        }
                        3 => {
                            init_box_style(tree, tbox, Display::TableCell)?;
                            init_rend_method_recursive(tree, tbox)?;
                            let rm = cell_rend_method(tree, tbox)?;
                            tree.set_rend_method(tbox, rm)?;
                            cell_count += 1;
                        }
                        _ => {
                            init_box_style(tree, tbox, Display::TableColumn)?;
                            tree.set_rend_method(tbox, RendMethod::TableColumn)?;
                        }
                    }
                }
                let removed = removed_before - tree.child_count(enode)?;
                first_unproper = None;
                if is_last {
                    break;
                }
                i -= removed.min(i);
            }
        }
        tree.persist(child)?;
        i += 1;
    }
    Ok(cell_count)
}

/// A completed cell renders as `Final` when its content is inline,
/// `Block` otherwise.
fn cell_rend_method(tree: &mut DomTree, cell: NodeHandle) -> Result<RendMethod> {
    let kinds = detect_child_types(tree, cell)?;
    Ok(if kinds.has_block && !kinds.has_inline {
        RendMethod::Block
    } else {
        RendMethod::Final
    })
}

/// Deep-first derivation over a subtree (used on re-render and for
/// content moved under a fresh wrapper).
pub fn init_rend_method_recursive(tree: &mut DomTree, h: NodeHandle) -> Result<()> {
    if !h.is_element() {
        return Ok(());
    }
    for child in tree.children(h)? {
        init_rend_method_recursive(tree, child)?;
    }
    init_rend_method(tree, h)
}

/// Derives this element's rendering method, assuming children have had
/// theirs derived already.
pub fn init_rend_method(tree: &mut DomTree, h: NodeHandle) -> Result<()> {
    if !h.is_element() {
        return Ok(());
    }
    if tree.is_root(h) {
        tree.set_rend_method(h, RendMethod::Block)?;
        return Ok(());
    }

    let d = tree.style(h)?.display;
    let flags = tree.tag_flags_of(h)?;

    if has_invisible_parent(tree, h)? {
        tree.set_rend_method(h, RendMethod::Invisible)?;
        return Ok(());
    }

    if d == Display::Inline {
        init_inline_rend_method(tree, h)?;
    } else if d == Display::Ruby {
        tree.set_rend_method(h, RendMethod::Inline)?;
        init_ruby_wrapping(tree, h)?;
    } else if d == Display::RunIn {
        reset_rend_method_to_inline(tree, h)?;
        tree.set_rend_method(h, RendMethod::Inline)?;
    } else if d == Display::Table || d == Display::InlineTable {
        // "Generate missing child wrappers".
        init_table_rend_methods(tree, h, 0)?;
    } else if flags.contains(TagFlags::OBJECT) {
        // Replaced content is always a final block (or inlined later by
        // its parent).
        tree.set_rend_method(h, RendMethod::Final)?;
    } else {
        init_block_rend_method(tree, h)?;
    }

    // "Generate missing parents": wrap stray internal-table children.
    let kinds = detect_child_types(tree, h)?;
    if kinds.has_internal_table && tree.rend_method(h)? == RendMethod::Block {
        generate_missing_table_parents(tree, h, d)?;
    }
    Ok(())
}

fn init_inline_rend_method(tree: &mut DomTree, h: NodeHandle) -> Result<()> {
    let id = tree.node_id(h)?;
    if id == el::FLOAT_BOX || id == el::INLINE_BOX {
        tree.set_rend_method(h, RendMethod::Inline)?;
        return Ok(());
    }
    tree.set_rend_method(h, RendMethod::Inline)?;

    let mut has_block = false;
    let mut has_inline = false;
    for child in tree.children(h)? {
        if child.is_text() {
            continue;
        }
        match tree.rend_method(child)? {
            RendMethod::Inline => has_inline = true,
            RendMethod::Invisible | RendMethod::Killed => {}
            _ => {
                if tree.node_id(child)? != el::FLOAT_BOX && tree.node_id(child)? != el::INLINE_BOX
                {
                    has_block = true;
                }
            }
        }
        if has_block && has_inline {
            break;
        }
    }
    if !has_block {
        return Ok(());
    }

    if !has_inline {
        let mut has_real_text = false;
        for child in tree.children(h)? {
            if child.is_text() && !is_empty_space(&tree.text(child)?) {
                has_real_text = true;
                break;
            }
        }
        if !has_real_text {
            // Pure block content inside an inline tag: the tag itself
            // can act as the block wrapper.
            tree.set_rend_method(h, RendMethod::Block)?;
            return Ok(());
        }
    }

    // Mixed inline and block content: box every block child so it can
    // flow as an embedded block line.
    let mut i = tree.child_count(h)?;
    while i > 0 {
        i -= 1;
        let child = tree.child(h, i)?;
        if child.is_text() {
            continue;
        }
        match tree.rend_method(child)? {
            RendMethod::Inline | RendMethod::Invisible | RendMethod::Killed => continue,
            _ => {}
        }
        let child_id = tree.node_id(child)?;
        if child_id == el::FLOAT_BOX || child_id == el::INLINE_BOX {
            continue;
        }
        // Drop empty-space neighbours so the embedded block doesn't
        // produce spurious blank lines.
        if i + 1 < tree.child_count(h)? {
            let next = tree.child(h, i + 1)?;
            if next.is_text() && is_empty_space(&tree.text(next)?) {
                tree.remove_children(h, i + 1, i + 1)?;
            }
        }
        if i > 0 {
            let prev = tree.child(h, i - 1)?;
            if prev.is_text() && is_empty_space(&tree.text(prev)?) {
                tree.remove_children(h, i - 1, i - 1)?;
                i -= 1;
            }
        }
        let ns = tree.ns_id(h)?;
        let ibox = tree.insert_child_element(h, i, ns, el::INLINE_BOX)?;
        tree.move_children(h, i + 1, i + 1, ibox)?;
        tree.set_attr(ibox, crate::dom::names::NsId::NONE, crate::dom::names::attr::T, "EmbeddedBlock")?;
        let style = tree.style(h)?;
        tree.apply_style(ibox, style)?;
        tree.set_rend_method(ibox, RendMethod::Inline)?;
    }
    Ok(())
}

fn init_block_rend_method(tree: &mut DomTree, h: NodeHandle) -> Result<()> {
    let kinds = detect_child_types(tree, h)?;
    if kinds.has_block && !kinds.has_inline {
        tree.set_rend_method(h, RendMethod::Block)?;
    } else if !kinds.has_block && kinds.has_inline {
        if kinds.has_floating && clean_if_only_empty_text_inline(tree, h)? {
            tree.set_rend_method(h, RendMethod::Block)?;
        } else {
            tree.set_rend_method(h, RendMethod::Final)?;
        }
    } else if !kinds.has_block && !kinds.has_inline {
        // Empty container; may still paint borders (an <hr>).
        tree.set_rend_method(h, RendMethod::Block)?;
    } else {
        // Mixed content: wrap consecutive inline runs in autoBoxing
        // elements, then the container is a plain block.
        let parent = tree.parent(h)?;
        if tree.node_id(parent)? == el::AUTO_BOXING {
            tree.set_rend_method(h, RendMethod::Final)?;
            return Ok(());
        }
        let mut i = tree.child_count(h)? as isize - 1;
        while i >= 0 {
            let child = tree.child(h, i as usize)?;
            if is_inline_node(tree, child)? || is_floating(tree, child)? {
                let mut j = i - 1;
                while j >= 0 {
                    let node = tree.child(h, j as usize)?;
                    if !is_inline_node(tree, node)? && !is_floating(tree, node)? {
                        break;
                    }
                    j -= 1;
                }
                let run_start = (j + 1) as usize;
                let run_end = i as usize;
                if run_start > 0 || run_end < tree.child_count(h)? - 1 {
                    autobox_children(tree, h, run_start, run_end, true)?;
                }
                i = j;
            } else {
                i -= 1;
            }
        }
        let kinds = detect_child_types(tree, h)?;
        if kinds.has_inline {
            // Couldn't box everything: render all children inline.
            tree.set_rend_method(h, RendMethod::Final)?;
        } else {
            tree.set_rend_method(h, RendMethod::Block)?;
        }
    }
    Ok(())
}

/// CSS 2.2 "generate missing parents" around stray table-internal
/// children of a non-table container.
fn generate_missing_table_parents(
    tree: &mut DomTree,
    h: NodeHandle,
    d: Display,
) -> Result<()> {
    // A run of cells whose parent is not a row gets one tabularBox row.
    if d != Display::TableRow {
        let mut i = tree.child_count(h)? as isize - 1;
        while i >= 0 {
            let child = tree.child(h, i as usize)?;
            let is_cell = child.is_element() && tree.style(child)?.display == Display::TableCell;
            if is_cell {
                let mut j = i - 1;
                while j >= 0 {
                    let node = tree.child(h, j as usize)?;
                    if !(node.is_element()
                        && (tree.style(node)?.display == Display::TableCell
                            || tree.node_id(node)? == el::TABULAR_BOX))
                    {
                        break;
                    }
                    j -= 1;
                }
                let start = (j + 1) as usize;
                if let Some(tbox) =
                    box_wrap_children(tree, h, start, i as usize, el::TABULAR_BOX)?
                {
                    init_box_style(tree, tbox, Display::TableRow)?;
                    tree.set_rend_method(tbox, RendMethod::TableRow)?;
                    init_table_rend_methods(tree, tbox, 3)?;
                }
                i = j;
            } else {
                i -= 1;
            }
        }
    }
    // A run of rows / row groups / captions / columns whose parent is
    // not a table gets one tabularBox table.
    if d != Display::Table && d != Display::InlineTable && !d.is_row_group() {
        let mut i = tree.child_count(h)? as isize - 1;
        while i >= 0 {
            let child = tree.child(h, i as usize)?;
            let is_rowish = child.is_element() && {
                let cd = tree.style(child)?.display;
                cd == Display::TableRow
                    || cd.is_row_group()
                    || cd == Display::TableCaption
                    || cd == Display::TableColumnGroup
                    || cd == Display::TableColumn
                    || (tree.node_id(child)? == el::TABULAR_BOX
                        && tree.rend_method(child)? == RendMethod::TableRow)
            };
            if is_rowish {
                let mut j = i - 1;
                while j >= 0 {
                    let node = tree.child(h, j as usize)?;
                    let keep = node.is_element() && {
                        let nd = tree.style(node)?.display;
                        nd == Display::TableRow
                            || nd.is_row_group()
                            || nd == Display::TableCaption
                            || nd == Display::TableColumnGroup
                            || nd == Display::TableColumn
                            || tree.node_id(node)? == el::TABULAR_BOX
                    };
                    if !keep {
                        break;
                    }
                    j -= 1;
                }
                let start = (j + 1) as usize;
                if let Some(tbox) =
                    box_wrap_children(tree, h, start, i as usize, el::TABULAR_BOX)?
                {
                    init_box_style(tree, tbox, Display::Table)?;
                    init_table_rend_methods(tree, tbox, 0)?;
                }
                i = j;
            } else {
                i -= 1;
            }
        }
    }
    Ok(())
}

// --- ruby ---

/// Builds the rubyBox lattice under a `display: ruby` element:
/// segments become `inlineBox > rubyBox` inline-tables, each with a base
/// row and annotation rows, each row holding cells.
fn init_ruby_wrapping(tree: &mut DomTree, ruby: NodeHandle) -> Result<()> {
    // Already wrapped on a previous rendering?
    let mut needs_wrapping = tree.child_count(ruby)? > 0;
    for child in tree.children(ruby)? {
        if child.is_element()
            && tree.node_id(child)? == el::INLINE_BOX
            && tree.child_count(child)? > 0
            && {
                let first = tree.child(child, 0)?;
                tree.node_id(first)? == el::RUBY_BOX
            }
        {
            needs_wrapping = false;
            break;
        }
    }
    if needs_wrapping {
        wrap_ruby_segments(tree, ruby)?;
        let count = tree.child_count(ruby)?;
        for i in 0..count {
            let ibox = tree.child(ruby, i)?;
            if !ibox.is_element() || tree.node_id(ibox)? != el::INLINE_BOX {
                continue;
            }
            if tree.child_count(ibox)? == 0 {
                continue;
            }
            let rbox1 = tree.child(ibox, 0)?;
            if !rbox1.is_element() || tree.node_id(rbox1)? != el::RUBY_BOX {
                continue;
            }
            wrap_ruby_rows(tree, rbox1)?;
            wrap_ruby_cells(tree, rbox1)?;
        }
    }
    // Set the table rendering methods over the (new or reused) lattice.
    for child in tree.children(ruby)? {
        if !child.is_element() || tree.node_id(child)? != el::INLINE_BOX {
            continue;
        }
        tree.set_rend_method(child, RendMethod::Inline)?;
        if tree.child_count(child)? == 0 {
            continue;
        }
        let rbox1 = tree.child(child, 0)?;
        if !rbox1.is_element() || tree.node_id(rbox1)? != el::RUBY_BOX {
            continue;
        }
        tree.set_rend_method(rbox1, RendMethod::Table)?;
        for row in tree.children(rbox1)? {
            if !row.is_element() {
                continue;
            }
            let row_id = tree.node_id(row)?;
            if row_id == el::RUBY_BOX || row_id == el::RBC || row_id == el::RTC {
                tree.set_rend_method(row, RendMethod::TableRow)?;
                for cell in tree.children(row)? {
                    if !cell.is_element() {
                        continue;
                    }
                    let cell_id = tree.node_id(cell)?;
                    if cell_id == el::RUBY_BOX || cell_id == el::RB || cell_id == el::RT {
                        let rm = cell_rend_method(tree, cell)?;
                        tree.set_rend_method(cell, rm)?;
                    } else {
                        tree.set_rend_method(cell, RendMethod::Invisible)?;
                    }
                }
            } else {
                tree.set_rend_method(row, RendMethod::Invisible)?;
            }
        }
    }
    Ok(())
}

/// Phase 1: split the ruby's children into segments, each ending after
/// a run of rt/rtc/rp, and wrap every segment in `inlineBox > rubyBox`.
fn wrap_ruby_segments(tree: &mut DomTree, ruby: NodeHandle) -> Result<()> {
    let ns = tree.ns_id(ruby)?;
    let mut first_to_wrap: Option<usize> = None;
    let mut last_to_wrap: Option<usize> = None;
    let mut i = 0usize;
    loop {
        let len = tree.child_count(ruby)?;
        let eoc = i >= len;
        // -1 non-empty text, -2 empty text, otherwise the element id.
        let code: i32 = if eoc {
            0
        } else {
            let child = tree.child(ruby, i)?;
            if child.is_element() {
                tree.node_id(child)?.0 as i32
            } else if is_empty_space(&tree.text(child)?) {
                -2
            } else {
                -1
            }
        };
        let is_annotation = code == el::RT.0 as i32 || code == el::RTC.0 as i32 || code == el::RP.0 as i32;
        if let Some(last) = last_to_wrap {
            if eoc || (!is_annotation && code != -2) {
                let first = first_to_wrap.unwrap_or(0);
                if let Some(rbox) = box_wrap_children(tree, ruby, first, last, el::RUBY_BOX)? {
                    tree.set_attr(rbox, crate::dom::names::NsId::NONE, crate::dom::names::attr::T, "rseg")?;
                    init_box_style(tree, rbox, Display::Inline)?;
                    let at = tree.child_index_of(ruby, rbox)?.unwrap_or(first);
                    let ibox = tree.insert_child_element(ruby, at, ns, el::INLINE_BOX)?;
                    tree.move_children(ruby, at + 1, at + 1, ibox)?;
                    init_box_style(tree, ibox, Display::Inline)?;
                    i = at + 1;
                } else {
                    i = first;
                }
                first_to_wrap = None;
                last_to_wrap = None;
                continue;
            }
        }
        if eoc {
            break;
        }
        if code == -1 {
            if first_to_wrap.is_none() {
                first_to_wrap = Some(i);
            }
        } else if code != -2 {
            if first_to_wrap.is_none() {
                first_to_wrap = Some(i);
            }
            if is_annotation {
                last_to_wrap = Some(i);
            }
        }
        i += 1;
    }
    Ok(())
}

/// Phase 2: inside one segment rubyBox, wrap base content and
/// annotation runs into row-level rubyBoxes (tagged rbc / rtc).
fn wrap_ruby_rows(tree: &mut DomTree, rbox1: NodeHandle) -> Result<()> {
    let mut first_to_wrap: Option<usize> = None;
    let mut base_wrap_done = false;
    let mut base_present = false;
    let mut i = 0usize;
    loop {
        let len = tree.child_count(rbox1)?;
        let eoc = i >= len;
        let code: i32 = if eoc {
            0
        } else {
            let child = tree.child(rbox1, i)?;
            if child.is_element() {
                tree.node_id(child)?.0 as i32
            } else if is_empty_space(&tree.text(child)?) {
                -2
            } else {
                -1
            }
        };
        let starts_annotation =
            code == el::RT.0 as i32 || code == el::RP.0 as i32 || code == el::RTC.0 as i32;
        if let Some(first) = first_to_wrap {
            if eoc || (!base_wrap_done && starts_annotation) || (base_wrap_done && code == el::RTC.0 as i32) {
                if i > first {
                    if let Some(rbox2) =
                        box_wrap_children(tree, rbox1, first, i - 1, el::RUBY_BOX)?
                    {
                        tree.set_attr(
                            rbox2,
                            crate::dom::names::NsId::NONE,
                            crate::dom::names::attr::T,
                            if base_wrap_done { "rtc" } else { "rbc" },
                        )?;
                        init_box_style(tree, rbox2, Display::Inline)?;
                        let at = tree.child_index_of(rbox1, rbox2)?.unwrap_or(first);
                        i = at + 1;
                    }
                }
                first_to_wrap = None;
                if !eoc && !base_wrap_done {
                    base_present = true;
                }
                if eoc {
                    break;
                }
                continue;
            }
        }
        if eoc {
            break;
        }
        if code == -1 {
            if first_to_wrap.is_none() {
                first_to_wrap = Some(i);
            }
        } else if code != -2 {
            if code == el::RBC.0 as i32 || code == el::RTC.0 as i32 {
                first_to_wrap = None;
                base_wrap_done = true;
                if code == el::RBC.0 as i32 {
                    base_present = true;
                }
            } else if first_to_wrap.is_none() {
                first_to_wrap = Some(i);
                if code == el::RT.0 as i32 || code == el::RP.0 as i32 {
                    base_wrap_done = true;
                }
            }
        }
        i += 1;
    }
    if !base_present {
        // Annotation-only ruby: synthesize an empty base row.
        let ns = tree.ns_id(rbox1)?;
        let rbox2 = tree.insert_child_element(rbox1, 0, ns, el::RUBY_BOX)?;
        tree.set_attr(rbox2, crate::dom::names::NsId::NONE, crate::dom::names::attr::T, "rbc")?;
        init_box_style(tree, rbox2, Display::Inline)?;
    }
    Ok(())
}

/// Phase 3: inside each row container, ensure the content is proper
/// cells (rb / rt), wrapping or synthesizing a rubyBox cell otherwise.
fn wrap_ruby_cells(tree: &mut DomTree, rbox1: NodeHandle) -> Result<()> {
    let mut base_seen = false;
    let len = tree.child_count(rbox1)?;
    for i in 0..len {
        let rbox2 = tree.child(rbox1, i)?;
        if !rbox2.is_element() {
            continue;
        }
        let row_id = tree.node_id(rbox2)?;
        let expected = if row_id == el::RBC {
            el::RB
        } else if row_id == el::RTC {
            el::RT
        } else if row_id == el::RUBY_BOX {
            if base_seen {
                el::RT
            } else {
                el::RB
            }
        } else {
            continue;
        };
        base_seen = true;
        let mut has_expected = false;
        for cell in tree.children(rbox2)? {
            if cell.is_element() && tree.node_id(cell)? == expected {
                has_expected = true;
                break;
            }
        }
        if has_expected {
            continue;
        }
        let len2 = tree.child_count(rbox2)?;
        let kind = if expected == el::RB { "rb" } else { "rt" };
        if len2 > 0 {
            if let Some(rbox3) = box_wrap_children(tree, rbox2, 0, len2 - 1, el::RUBY_BOX)? {
                tree.set_attr(rbox3, crate::dom::names::NsId::NONE, crate::dom::names::attr::T, kind)?;
                if row_id == el::RTC {
                    // A bare <rtc> annotation spans the whole base.
                    tree.set_attr(
                        rbox3,
                        crate::dom::names::NsId::NONE,
                        crate::dom::names::attr::RBSPAN,
                        "99",
                    )?;
                }
                init_box_style(tree, rbox3, Display::Inline)?;
            }
        } else {
            // Synthesize an empty cell; the zero-width space keeps its
            // row height from collapsing.
            let ns = tree.ns_id(rbox2)?;
            let rbox3 = tree.insert_child_element(rbox2, 0, ns, el::RUBY_BOX)?;
            tree.set_attr(rbox3, crate::dom::names::NsId::NONE, crate::dom::names::attr::T, kind)?;
            init_box_style(tree, rbox3, Display::Inline)?;
            tree.insert_child_text(rbox3, 0, "\u{200B}")?;
        }
    }
    Ok(())
}
