//! Traversal API over a settled [`TreeArena`] (spec §4.7 "Traversal API"):
//! depth-first pre-order, depth-first post-order, and breadth-first, each
//! with an optional max depth, and a visitor predicate that halts
//! traversal by returning `false`.

use std::collections::VecDeque;

use crate::arena::{ArenaNode, NodeId, TreeArena, ROOT};

/// Visits `(node_id, node, depth)`; return `false` to stop traversal.
pub type Visitor<'a> = dyn FnMut(NodeId, &ArenaNode, usize) -> bool + 'a;

pub fn pre_order(arena: &TreeArena, max_depth: Option<usize>, visitor: &mut Visitor) {
    pre_order_from(arena, ROOT, 0, max_depth, visitor);
}

fn pre_order_from(
    arena: &TreeArena,
    id: NodeId,
    depth: usize,
    max_depth: Option<usize>,
    visitor: &mut Visitor,
) -> bool {
    let node = arena.node(id);
    if !visitor(id, node, depth) {
        return false;
    }
    if max_depth.is_some_and(|max| depth >= max) {
        return true;
    }
    for &child in node.children.values() {
        if !pre_order_from(arena, child, depth + 1, max_depth, visitor) {
            return false;
        }
    }
    true
}

pub fn post_order(arena: &TreeArena, max_depth: Option<usize>, visitor: &mut Visitor) {
    post_order_from(arena, ROOT, 0, max_depth, visitor);
}

fn post_order_from(
    arena: &TreeArena,
    id: NodeId,
    depth: usize,
    max_depth: Option<usize>,
    visitor: &mut Visitor,
) -> bool {
    let node = arena.node(id);
    if max_depth.is_none_or(|max| depth < max) {
        for &child in node.children.values() {
            if !post_order_from(arena, child, depth + 1, max_depth, visitor) {
                return false;
            }
        }
    }
    visitor(id, node, depth)
}

pub fn breadth_first(arena: &TreeArena, max_depth: Option<usize>, visitor: &mut Visitor) {
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
    queue.push_back((ROOT, 0));
    while let Some((id, depth)) = queue.pop_front() {
        let node = arena.node(id);
        if !visitor(id, node, depth) {
            return;
        }
        if max_depth.is_some_and(|max| depth >= max) {
            continue;
        }
        for &child in node.children.values() {
            queue.push_back((child, depth + 1));
        }
    }
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

    fn sample_tree() -> TreeArena {
        let mut arena = TreeArena::new(BuildMode::ContextFree, SampleCountMode::Inclusive);
        arena.insert(&[frame("main"), frame("foo")], 0, 1, 1.0);
        arena.insert(&[frame("main"), frame("bar")], 0, 1, 1.0);
        arena
    }

    #[test]
    fn pre_order_visits_parent_before_children() {
        let arena = sample_tree();
        let mut order = Vec::new();
        pre_order(&arena, None, &mut |id, _node, _depth| {
            order.push(id);
            true
        });
        assert_eq!(order[0], ROOT);
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn post_order_visits_children_before_parent() {
        let arena = sample_tree();
        let mut order = Vec::new();
        post_order(&arena, None, &mut |id, _node, _depth| {
            order.push(id);
            true
        });
        assert_eq!(*order.last().unwrap(), ROOT);
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn breadth_first_visits_shallower_depths_first() {
        let arena = sample_tree();
        let mut depths = Vec::new();
        breadth_first(&arena, None, &mut |_id, _node, depth| {
            depths.push(depth);
            true
        });
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn max_depth_limits_descent() {
        let arena = sample_tree();
        let mut visited = 0;
        pre_order(&arena, Some(1), &mut |_id, _node, _depth| {
            visited += 1;
            true
        });
        assert_eq!(visited, 2); // root + "main" only
    }

    #[test]
    fn visitor_returning_false_halts_traversal() {
        let arena = sample_tree();
        let mut visited = 0;
        pre_order(&arena, None, &mut |_id, _node, _depth| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }
}
