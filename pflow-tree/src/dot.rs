//! GraphViz `.dot` text emitter (spec §6 lists `*.dot` as an on-disk
//! format, nodes colored by one of three schemes normalized to the tree's
//! `total_samples`). Produces plain text only; invoking the `dot` binary
//! to rasterize it is out of scope (spec §1 Non-goals) — the coloring
//! itself is part of the required text output, not the excluded
//! rasterization step.

use std::fmt::Write as _;

use crate::arena::{TreeArena, ROOT};
use crate::traversal::pre_order;

/// Which gradient node `fillcolor`s are drawn from, normalized against the
/// root's `total_samples` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScheme {
    /// Light gray (cold) to black (hot).
    Grayscale,
    /// Blue -> yellow -> red, the conventional profiler heat gradient.
    Heatmap,
    /// Full hue sweep, blue (cold) through red (hot).
    Rainbow,
}

/// Renders `arena` as a GraphViz digraph, one node per tree node labeled
/// with its function name and total/self sample counts and filled
/// according to `scheme`, one edge per parent-child link labeled with the
/// edge weight.
pub fn to_dot(arena: &TreeArena, scheme: ColorScheme) -> String {
    let mut out = String::new();
    writeln!(out, "digraph performance_tree {{").unwrap();
    writeln!(out, "  node [style=filled];").unwrap();

    let root_total = arena.node(ROOT).total_samples.max(1) as f64;

    pre_order(arena, None, &mut |id, node, _depth| {
        let label = if id == ROOT {
            node.frame.display_name()
        } else {
            format!(
                "{}\\n[{}, {}]",
                node.frame.display_name(),
                node.total_samples,
                node.self_samples
            )
        };
        let ratio = node.total_samples as f64 / root_total;
        let color = fillcolor(ratio, scheme);
        writeln!(
            out,
            "  n{id} [label=\"{}\", fillcolor=\"{color}\"];",
            escape(&label)
        )
        .unwrap();
        for &child in node.children.values() {
            let weight = arena.node(child).edge_weight();
            writeln!(out, "  n{id} -> n{child} [label=\"{weight}\"];").unwrap();
        }
        true
    });

    writeln!(out, "}}").unwrap();
    out
}

fn fillcolor(ratio: f64, scheme: ColorScheme) -> String {
    let ratio = ratio.clamp(0.0, 1.0);
    let (r, g, b) = match scheme {
        ColorScheme::Grayscale => {
            let v = lerp(255.0, 64.0, ratio) as u8;
            (v, v, v)
        }
        ColorScheme::Heatmap => {
            if ratio < 0.5 {
                let t = ratio * 2.0;
                (lerp(0.0, 255.0, t) as u8, lerp(0.0, 255.0, t) as u8, lerp(255.0, 0.0, t) as u8)
            } else {
                let t = (ratio - 0.5) * 2.0;
                (255, lerp(255.0, 0.0, t) as u8, 0)
            }
        }
        ColorScheme::Rainbow => hsv_to_rgb((1.0 - ratio) * 240.0, 1.0, 1.0),
    };
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// `h` in `[0, 360)`, `s`/`v` in `[0, 1]`.
fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (u8, u8, u8) {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
    let (r1, g1, b1) = match hp as i64 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (
        ((r1 + m) * 255.0).round() as u8,
        ((g1 + m) * 255.0).round() as u8,
        ((b1 + m) * 255.0).round() as u8,
    )
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{BuildMode, ResolvedFrame, SampleCountMode};

    fn frame(name: &str) -> ResolvedFrame {
        ResolvedFrame {
            raw_address: 0,
            library: "app".to_string(),
            offset: 0,
            function: Some(name.to_string()),
            file: None,
            line: None,
        }
    }

    #[test]
    fn emits_one_node_and_edge_per_tree_node() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("work")], 0, 3, 1.0);

        let dot = to_dot(&arena, ColorScheme::Grayscale);
        assert!(dot.starts_with("digraph performance_tree {"));
        assert!(dot.contains("n0 -> n1"));
        assert!(dot.contains("n1 -> n2"));
        assert!(dot.contains("label=\"work\\n[3, 3]\""));
    }

    #[test]
    fn quotes_in_function_names_are_escaped() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        let mut f = frame("weird\"name");
        f.function = Some("weird\"name".to_string());
        arena.insert(&[f], 0, 1, 1.0);
        let dot = to_dot(&arena, ColorScheme::Grayscale);
        assert!(dot.contains("weird\\\"name"));
    }

    #[test]
    fn every_node_gets_a_fillcolor_attribute() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("work")], 0, 3, 1.0);

        for scheme in [ColorScheme::Grayscale, ColorScheme::Heatmap, ColorScheme::Rainbow] {
            let dot = to_dot(&arena, scheme);
            assert_eq!(dot.matches("fillcolor=\"#").count(), 3, "{scheme:?}");
        }
    }

    #[test]
    fn hotter_nodes_get_a_distinct_color_from_the_root_under_every_scheme() {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("hot")], 0, 10, 1.0);
        arena.insert(&[frame("main"), frame("cold")], 0, 1, 1.0);

        for scheme in [ColorScheme::Grayscale, ColorScheme::Heatmap, ColorScheme::Rainbow] {
            assert_eq!(fillcolor(1.0, scheme) == fillcolor(0.0, scheme), false, "{scheme:?}");
        }
    }
}
