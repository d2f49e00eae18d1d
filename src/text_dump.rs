//! Human-readable tree dump (spec §4.9, §6 `*.ptree.txt`): indented
//! pre-order listing, `[total, self] name (library) [file:line]` per node.

use std::fmt::Write as _;

use pflow_tree::{TreeArena, ROOT};

pub fn render(arena: &TreeArena) -> String {
    let mut out = String::new();
    pflow_tree::pre_order(arena, None, &mut |id, node, depth| {
        if id == ROOT {
            return true;
        }
        let indent = "  ".repeat(depth.saturating_sub(1));
        let location = match (&node.frame.file, node.frame.line) {
            (Some(file), Some(line)) => format!(" [{file}:{line}]"),
            (Some(file), None) => format!(" [{file}]"),
            (None, _) => String::new(),
        };
        writeln!(
            out,
            "{indent}[{}, {}] {} ({}){location}",
            node.total_samples,
            node.self_samples,
            node.frame.display_name(),
            node.frame.library,
        )
        .unwrap();
        true
    });
    out
}
