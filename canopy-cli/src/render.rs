//! Indented text rendering of the visible tree.

use std::fmt::Write;

use canopy_lib::Tree;
use canopy_lib::adapter::RecordingAdapter;
use canopy_lib::adapter::TreeAdapter;
use canopy_lib::model::Node;
use canopy_lib::model::NodeKind;

/// Renders every visible node, one per line.
///
/// Labels come from the adapter's mirror so the output shows what a
/// widget would have been told; expansion state comes from the tree.
pub fn render(tree: &Tree, adapter: &RecordingAdapter) -> String {
    let mut out = String::new();
    for (id, depth) in tree.visible() {
        let Some(shown) = adapter.get_node(&id) else {
            continue;
        };
        let marker = match tree.get(&id) {
            Some(node) if node.is_leaf() => " ",
            Some(node) if node.flags().expanded => "-",
            _ => "+",
        };
        let selected = if adapter.is_selected(&id) { "*" } else { " " };
        let _ = writeln!(
            out,
            "{}{}{} {}{}",
            "  ".repeat(depth),
            selected,
            marker,
            shown.label(),
            suffix(&shown)
        );
    }
    out
}

fn suffix(node: &Node) -> String {
    match node.kind() {
        NodeKind::SeeMorePlaceholder => format!("  ({})", node.id()),
        NodeKind::Step { status } | NodeKind::Task { status, .. } => {
            let state = if status.failed { " failed" } else { "" };
            format!("  [{}%{}]", status.progress, state)
        }
        _ => match node.kind().reference_code() {
            Some(code) => format!("  <{}>", code),
            None => String::new(),
        },
    }
}
