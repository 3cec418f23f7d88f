//! Rebuilds reply trees from the flat, parent-referencing comment lists the
//! remote hands out.
//!
//! Nothing here mutates its input. Ordering is first-seen input order at
//! every level; callers who want chronological threads sort the flat list
//! first.

use feed_msg::Comment;
use feed_ref::CommentId;
use std::collections::{HashMap, HashSet};

/// Turns a flat comment list into its forest of top-level comments, each
/// with `replies` filled in recursively.
///
/// - a repeated id keeps its first occurrence
/// - a comment whose parent is not in the list is promoted to a root
/// - a comment caught in a parent cycle is promoted to a root, which breaks
///   the cycle at the first member in input order
pub fn build_forest(flat: &[Comment]) -> Vec<Comment> {
    let mut index: HashMap<&CommentId, usize> = HashMap::new();
    let mut nodes: Vec<&Comment> = Vec::new();
    for comment in flat {
        if !index.contains_key(&comment.id) {
            index.insert(&comment.id, nodes.len());
            nodes.push(comment);
        }
    }

    let mut parents: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots: Vec<usize> = Vec::new();
    let mut placed: Vec<bool> = vec![false; nodes.len()];

    for comment in flat {
        let node = index[&comment.id];
        if placed[node] {
            continue;
        }
        placed[node] = true;

        match comment
            .parent_comment_id
            .as_ref()
            .and_then(|parent_id| index.get(parent_id))
        {
            Some(&parent) if parent != node => {
                parents[node] = Some(parent);
                children[parent].push(node);
            }
            // top-level, orphan, or its own parent
            _ => roots.push(node),
        }
    }

    // Anything unreachable from a root sits on a cycle, or hangs off one.
    let mut reachable = mark_reachable(&roots, &children, nodes.len());
    for node in 0..nodes.len() {
        if reachable[node] {
            continue;
        }
        let promoted = first_on_cycle(node, &parents);
        if let Some(parent) = parents[promoted].take() {
            children[parent].retain(|child| *child != promoted);
        }
        roots.push(promoted);
        reachable = mark_reachable(&roots, &children, nodes.len());
    }
    // node indices are first-seen positions
    roots.sort_unstable();

    assemble(&nodes, &roots, &children)
}

// Follows parent links from an unreachable node until they loop back, and
// returns the earliest node on that loop.
fn first_on_cycle(start: usize, parents: &[Option<usize>]) -> usize {
    let mut path: Vec<usize> = Vec::new();
    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut current = start;
    loop {
        if let Some(&position) = seen.get(&current) {
            return path[position..].iter().copied().min().unwrap_or(current);
        }
        seen.insert(current, path.len());
        path.push(current);
        match parents[current] {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

fn mark_reachable(roots: &[usize], children: &[Vec<usize>], len: usize) -> Vec<bool> {
    let mut reachable = vec![false; len];
    let mut stack: Vec<usize> = roots.to_vec();
    while let Some(node) = stack.pop() {
        if reachable[node] {
            continue;
        }
        reachable[node] = true;
        stack.extend(children[node].iter().copied());
    }
    reachable
}

// Builds bottom-up without recursion so long reply chains can't blow the stack.
fn assemble(nodes: &[&Comment], roots: &[usize], children: &[Vec<usize>]) -> Vec<Comment> {
    let mut order: Vec<usize> = Vec::with_capacity(nodes.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        order.push(node);
        stack.extend(children[node].iter().rev().copied());
    }

    let mut built: Vec<Option<Comment>> = vec![None; nodes.len()];
    for &node in order.iter().rev() {
        let mut comment = nodes[node].shallow();
        comment.replies = children[node]
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        built[node] = Some(comment);
    }

    roots
        .iter()
        .filter_map(|root| built[*root].take())
        .collect()
}

/// Pre-order walk over a forest.
pub fn flatten(forest: &[Comment]) -> Vec<&Comment> {
    let mut out = Vec::new();
    let mut stack: Vec<&Comment> = forest.iter().rev().collect();
    while let Some(comment) = stack.pop() {
        out.push(comment);
        stack.extend(comment.replies.iter().rev());
    }
    out
}

pub fn count_nodes(forest: &[Comment]) -> usize {
    flatten(forest).len()
}

/// Ids of every transitive reply to `id` in a flat list, in discovery order.
pub fn descendant_ids(flat: &[Comment], id: &CommentId) -> Vec<CommentId> {
    let mut by_parent: HashMap<&CommentId, Vec<&CommentId>> = HashMap::new();
    for comment in flat {
        if let Some(parent_id) = &comment.parent_comment_id {
            by_parent.entry(parent_id).or_default().push(&comment.id);
        }
    }

    let mut seen: HashSet<&CommentId> = HashSet::new();
    seen.insert(id);
    let mut out = Vec::new();
    let mut queue: Vec<&CommentId> = vec![id];
    let mut cursor = 0;
    while cursor < queue.len() {
        let current = queue[cursor];
        cursor += 1;
        for &child in by_parent.get(current).into_iter().flatten() {
            if seen.insert(child) {
                out.push(child.clone());
                queue.push(child);
            }
        }
    }
    out
}

/// Nesting depth of a comment, 0 for top-level. Orphans count as top-level.
/// `None` if the id is absent or its parent chain loops.
pub fn depth_of(flat: &[Comment], id: &CommentId) -> Option<usize> {
    let by_id: HashMap<&CommentId, &Comment> = flat
        .iter()
        .rev()
        .map(|comment| (&comment.id, comment))
        .collect();

    let mut current = *by_id.get(id)?;
    let mut depth = 0;
    while let Some(parent) = current
        .parent_comment_id
        .as_ref()
        .and_then(|parent_id| by_id.get(parent_id).copied())
    {
        depth += 1;
        if depth > by_id.len() {
            return None;
        }
        current = parent;
    }
    Some(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use feed_msg::{ReactionCounts, ReactionState};
    use feed_ref::{ActorId, PostId};
    use proptest::prelude::*;

    fn comment(id: &str, parent: Option<&str>) -> Comment {
        Comment {
            id: CommentId::try_from(id).unwrap(),
            post_id: PostId::try_from("p1").unwrap(),
            author_id: ActorId::try_from("u1").unwrap(),
            parent_comment_id: parent.map(|p| CommentId::try_from(p).unwrap()),
            content: format!("comment {}", id),
            image: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            reaction_counts: ReactionCounts::new(),
            current_actor_reaction: ReactionState::NoReaction,
            replies: Vec::new(),
        }
    }

    fn ids(comments: &[Comment]) -> Vec<&str> {
        comments.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_orphan_promoted_to_root() {
        let flat = vec![
            comment("1", None),
            comment("2", Some("1")),
            comment("3", None),
            comment("4", Some("99")),
        ];
        let forest = build_forest(&flat);
        assert_eq!(ids(&forest), vec!["1", "3", "4"]);
        assert_eq!(ids(&forest[0].replies), vec!["2"]);
        assert!(forest[1].replies.is_empty());
        assert!(forest[2].replies.is_empty());
    }

    #[test]
    fn test_reply_before_parent_in_input() {
        let flat = vec![
            comment("2", Some("1")),
            comment("3", Some("1")),
            comment("1", None),
        ];
        let forest = build_forest(&flat);
        assert_eq!(ids(&forest), vec!["1"]);
        assert_eq!(ids(&forest[0].replies), vec!["2", "3"]);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let mut second = comment("1", None);
        second.content = "edited copy".into();
        let flat = vec![comment("1", None), comment("2", Some("1")), second, comment("2", Some("1"))];
        let forest = build_forest(&flat);
        assert_eq!(count_nodes(&forest), 2);
        assert_eq!(forest[0].content, "comment 1");
        assert_eq!(ids(&forest[0].replies), vec!["2"]);
    }

    #[test]
    fn test_deep_chain() {
        let mut flat = vec![comment("0", None)];
        for n in 1..1000 {
            flat.push(comment(&n.to_string(), Some(&(n - 1).to_string())));
        }
        let forest = build_forest(&flat);
        assert_eq!(forest.len(), 1);
        assert_eq!(count_nodes(&forest), 1000);
        assert_eq!(depth_of(&flat, &CommentId::try_from("999").unwrap()), Some(999));
    }

    #[test]
    fn test_cycles_are_broken() {
        let flat = vec![
            comment("a", Some("b")),
            comment("b", Some("a")),
            comment("self", Some("self")),
            comment("c", Some("a")),
        ];
        let forest = build_forest(&flat);
        assert_eq!(ids(&forest), vec!["a", "self"]);
        assert_eq!(ids(&forest[0].replies), vec!["b", "c"]);
        assert_eq!(count_nodes(&forest), 4);
        assert_eq!(depth_of(&flat, &CommentId::try_from("a").unwrap()), None);
    }

    #[test]
    fn test_reply_hanging_off_a_cycle_keeps_its_parent() {
        let flat = vec![
            comment("c", Some("a")),
            comment("a", Some("b")),
            comment("b", Some("a")),
        ];
        let forest = build_forest(&flat);
        assert_eq!(ids(&forest), vec!["a"]);
        assert_eq!(ids(&forest[0].replies), vec!["c", "b"]);
        assert_eq!(count_nodes(&forest), 3);
    }

    #[test]
    fn test_does_not_touch_input() {
        let flat = vec![comment("1", None), comment("2", Some("1"))];
        let before = flat.clone();
        let _ = build_forest(&flat);
        assert_eq!(flat, before);
    }

    #[test]
    fn test_descendants() {
        let flat = vec![
            comment("1", None),
            comment("2", Some("1")),
            comment("3", Some("2")),
            comment("4", None),
            comment("5", Some("1")),
        ];
        let found = descendant_ids(&flat, &CommentId::try_from("1").unwrap());
        let found: Vec<&str> = found.iter().map(|id| id.as_str()).collect();
        assert_eq!(found, vec!["2", "5", "3"]);
        assert!(descendant_ids(&flat, &CommentId::try_from("4").unwrap()).is_empty());
    }

    #[test]
    fn test_depth() {
        let flat = vec![comment("1", None), comment("2", Some("1")), comment("9", Some("x"))];
        assert_eq!(depth_of(&flat, &CommentId::try_from("1").unwrap()), Some(0));
        assert_eq!(depth_of(&flat, &CommentId::try_from("2").unwrap()), Some(1));
        assert_eq!(depth_of(&flat, &CommentId::try_from("9").unwrap()), Some(0));
        assert_eq!(depth_of(&flat, &CommentId::try_from("nope").unwrap()), None);
    }

    fn flat_strategy() -> impl Strategy<Value = Vec<Comment>> {
        // small id space so duplicates, orphans and cycles all show up
        proptest::collection::vec((0u8..12, proptest::option::of(0u8..14)), 0..30).prop_map(
            |pairs| {
                pairs
                    .into_iter()
                    .map(|(id, parent)| {
                        let parent = parent.map(|p| p.to_string());
                        comment(&id.to_string(), parent.as_deref())
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn test_forest_is_complete_and_unique(flat in flat_strategy()) {
            let forest = build_forest(&flat);
            let distinct: HashSet<&CommentId> = flat.iter().map(|c| &c.id).collect();
            let walked = flatten(&forest);
            prop_assert_eq!(walked.len(), distinct.len());
            let unique: HashSet<&CommentId> = walked.iter().map(|c| &c.id).collect();
            prop_assert_eq!(unique.len(), walked.len());
        }

        #[test]
        fn test_levels_keep_first_seen_order(flat in flat_strategy()) {
            let mut first_seen: HashMap<&CommentId, usize> = HashMap::new();
            for (position, c) in flat.iter().enumerate() {
                first_seen.entry(&c.id).or_insert(position);
            }
            let forest = build_forest(&flat);
            let mut levels: Vec<&[Comment]> = vec![forest.as_slice()];
            while let Some(level) = levels.pop() {
                let positions: Vec<usize> = level.iter().map(|c| first_seen[&c.id]).collect();
                let mut sorted = positions.clone();
                sorted.sort_unstable();
                prop_assert_eq!(positions, sorted);
                for c in level {
                    levels.push(c.replies.as_slice());
                }
            }
        }
    }
}
