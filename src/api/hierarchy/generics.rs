use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A flat row that can be arranged into a parent/child forest.
pub trait TreeItem {
    fn id(&self) -> i32;
    fn parent_id(&self) -> Option<i32>;
    fn order_num(&self) -> i32;

    /// Derived usage count. Items without one are treated as empty by
    /// [`filter_empty`].
    fn question_count(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub data: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn leaf(data: T) -> Self {
        Self {
            data,
            children: Vec::new(),
        }
    }
}

// The derived drop would recurse once per level
impl<T> Drop for TreeNode<T> {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

// Builds a forest from flat rows.
//
// Rows whose parent is null, missing from `items` or the row itself become
// roots. Siblings are ordered by `order_num`, keeping input order on ties.
// Every row appears exactly once in the output, even when the stored parent
// links form a cycle.
pub fn build_tree<T: TreeItem>(items: Vec<T>) -> Vec<TreeNode<T>> {
    let ids: HashSet<i32> = items.iter().map(TreeItem::id).collect();

    // Create a map of parent_id to children (indices into `items`)
    let mut parent_to_children: HashMap<i32, Vec<usize>> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match item.parent_id() {
            Some(pid) if pid == item.id() => {
                warn!("Node {} is its own parent; promoting it to root", pid);
                roots.push(index);
            }
            Some(pid) if ids.contains(&pid) => {
                parent_to_children.entry(pid).or_default().push(index);
            }
            _ => roots.push(index),
        }
    }

    // sort_by_key is stable
    roots.sort_by_key(|&index| items[index].order_num());
    for children in parent_to_children.values_mut() {
        children.sort_by_key(|&index| items[index].order_num());
    }

    // A slot is emptied once its node is placed, so no node is visited twice
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();

    let mut tree: Vec<TreeNode<T>> = roots
        .iter()
        .filter_map(|&index| assemble(index, &mut slots, &parent_to_children))
        .collect();

    // Whatever is left is only reachable through a parent cycle
    for index in 0..slots.len() {
        if let Some(item) = slots[index].as_ref() {
            warn!(
                "Parent cycle detected at node {} (parent {:?}); promoting it to root",
                item.id(),
                item.parent_id()
            );
            if let Some(node) = assemble(index, &mut slots, &parent_to_children) {
                tree.push(node);
            }
        }
    }

    tree
}

// Depth-first assembly of the subtree under `root` with an explicit stack of
// (node, index of its next child).
fn assemble<T: TreeItem>(
    root: usize,
    slots: &mut [Option<T>],
    parent_to_children: &HashMap<i32, Vec<usize>>,
) -> Option<TreeNode<T>> {
    let data = slots[root].take()?;
    let mut stack: Vec<(TreeNode<T>, usize)> = vec![(TreeNode::leaf(data), 0)];

    while let Some((node, next)) = stack.last_mut() {
        let children = parent_to_children
            .get(&node.data.id())
            .map_or(&[][..], Vec::as_slice);

        if let Some(&child) = children.get(*next) {
            *next += 1;
            if let Some(data) = slots[child].take() {
                stack.push((TreeNode::leaf(data), 0));
            }
            continue;
        }

        let (done, _) = stack.pop()?;
        match stack.last_mut() {
            Some((parent, _)) => parent.children.push(done),
            None => return Some(done),
        }
    }

    None
}

/// Drops every node with no questions whose children were all dropped too.
/// Children are filtered before their parent is judged.
pub fn filter_empty<T: TreeItem>(nodes: Vec<TreeNode<T>>) -> Vec<TreeNode<T>> {
    // Each frame holds a node whose children are still being filtered: the
    // unvisited children (reversed, so `pop` yields them in order) and the
    // survivors so far.
    struct Frame<T> {
        node: TreeNode<T>,
        pending: Vec<TreeNode<T>>,
        kept: Vec<TreeNode<T>>,
    }

    fn open<T>(mut node: TreeNode<T>) -> Frame<T> {
        let mut pending = std::mem::take(&mut node.children);
        pending.reverse();
        Frame {
            node,
            pending,
            kept: Vec::new(),
        }
    }

    let mut roots = nodes;
    roots.reverse();
    let mut kept_roots = Vec::new();
    let mut stack: Vec<Frame<T>> = Vec::new();

    loop {
        let next = match stack.last_mut() {
            Some(frame) => frame.pending.pop(),
            None => roots.pop(),
        };

        if let Some(node) = next {
            stack.push(open(node));
            continue;
        }

        let Some(frame) = stack.pop() else {
            break;
        };
        let mut node = frame.node;
        node.children = frame.kept;

        let has_questions = node.data.question_count().unwrap_or(0) > 0;
        if has_questions || !node.children.is_empty() {
            match stack.last_mut() {
                Some(parent) => parent.kept.push(node),
                None => kept_roots.push(node),
            }
        }
    }

    kept_roots
}

pub fn count_nodes<T>(nodes: &[TreeNode<T>]) -> usize {
    let mut stack: Vec<&TreeNode<T>> = nodes.iter().collect();
    let mut count = 0;
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.children.iter());
    }
    count
}

/// Ids of every item below `root_id` (not including `root_id` itself).
pub fn descendant_ids<T: TreeItem>(items: &[T], root_id: i32) -> HashSet<i32> {
    let mut parent_to_children: HashMap<i32, Vec<i32>> = HashMap::new();
    for item in items {
        if let Some(pid) = item.parent_id() {
            parent_to_children.entry(pid).or_default().push(item.id());
        }
    }

    let mut descendants = HashSet::new();
    let mut stack = vec![root_id];
    while let Some(current) = stack.pop() {
        for &child in parent_to_children.get(&current).into_iter().flatten() {
            if child != root_id && descendants.insert(child) {
                stack.push(child);
            }
        }
    }
    descendants
}

// Would making `potential_parent_id` the parent of `child_id` close a loop?
// Walks up from the potential parent with `get_parent_fn`. A chain that
// revisits a node without reaching `child_id` is already corrupt and is
// reported as circular too.
pub fn is_circular_reference<F, E>(
    child_id: i32,
    potential_parent_id: Option<i32>,
    mut get_parent_fn: F,
) -> Result<bool, E>
where
    F: FnMut(i32) -> Result<Option<i32>, E>,
{
    let mut seen = HashSet::new();
    let mut current_parent_id = potential_parent_id;
    while let Some(pid) = current_parent_id {
        if pid == child_id || !seen.insert(pid) {
            return Ok(true);
        }
        current_parent_id = get_parent_fn(pid)?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Counts `warn!` events emitted while it is the active subscriber.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings<R>(f: impl FnOnce() -> R) -> (R, usize) {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, warnings.load(Ordering::SeqCst))
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: i32,
        parent_id: Option<i32>,
        order_num: i32,
        count: Option<i64>,
    }

    impl TreeItem for Item {
        fn id(&self) -> i32 {
            self.id
        }
        fn parent_id(&self) -> Option<i32> {
            self.parent_id
        }
        fn order_num(&self) -> i32 {
            self.order_num
        }
        fn question_count(&self) -> Option<i64> {
            self.count
        }
    }

    fn item(id: i32, parent_id: Option<i32>, order_num: i32) -> Item {
        Item {
            id,
            parent_id,
            order_num,
            count: None,
        }
    }

    fn counted(id: i32, parent_id: Option<i32>, count: i64) -> Item {
        Item {
            id,
            parent_id,
            order_num: id,
            count: Some(count),
        }
    }

    fn ids<T: TreeItem>(nodes: &[TreeNode<T>]) -> Vec<i32> {
        nodes.iter().map(|node| node.data.id()).collect()
    }

    #[test]
    fn test_every_node_is_placed() {
        let items = vec![
            item(1, None, 1),
            item(2, Some(1), 1),
            item(3, Some(1), 2),
            item(4, Some(3), 1),
            item(5, Some(4), 1),
            item(6, None, 2),
            item(7, Some(6), 1),
        ];
        let tree = build_tree(items);

        assert_eq!(count_nodes(&tree), 7);
        assert_eq!(ids(&tree), vec![1, 6]);
        assert_eq!(ids(&tree[0].children), vec![2, 3]);
        assert_eq!(ids(&tree[0].children[1].children), vec![4]);
        assert_eq!(ids(&tree[0].children[1].children[0].children), vec![5]);
    }

    #[test]
    fn test_missing_parent_promotes_to_root() {
        let tree = build_tree(vec![item(1, None, 1), item(2, Some(1), 1), item(3, Some(999), 2)]);

        assert_eq!(ids(&tree), vec![1, 3]);
        assert_eq!(ids(&tree[0].children), vec![2]);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn test_promoted_orphan_keeps_its_subtree() {
        // 2 was filtered out; 3 hangs off it and 4 off 3
        let tree = build_tree(vec![item(1, None, 1), item(3, Some(2), 1), item(4, Some(3), 1)]);

        assert_eq!(count_nodes(&tree), 3);
        assert_eq!(ids(&tree), vec![1, 3]);
        assert_eq!(ids(&tree[1].children), vec![4]);
    }

    #[test]
    fn test_siblings_sorted_by_order_num() {
        let tree = build_tree(vec![
            item(1, None, 1),
            item(10, Some(1), 3),
            item(11, Some(1), 1),
            item(12, Some(1), 2),
        ]);

        let orders: Vec<i32> = tree[0].children.iter().map(|n| n.data.order_num).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn test_equal_order_num_keeps_input_order() {
        let tree = build_tree(vec![item(5, None, 1), item(3, None, 1), item(4, None, 0)]);
        assert_eq!(ids(&tree), vec![4, 5, 3]);
    }

    #[test]
    fn test_self_parent_is_root() {
        let (tree, warnings) = count_warnings(|| build_tree(vec![item(1, Some(1), 1), item(2, Some(1), 1)]));

        assert_eq!(ids(&tree), vec![1]);
        assert_eq!(ids(&tree[0].children), vec![2]);
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_cycle_terminates_and_keeps_all_nodes() {
        let (tree, warnings) = count_warnings(|| {
            build_tree(vec![
                item(1, None, 1),
                item(2, Some(3), 1),
                item(3, Some(2), 1),
            ])
        });

        assert_eq!(warnings, 1);
        assert_eq!(count_nodes(&tree), 3);
        assert_eq!(ids(&tree), vec![1, 2]);
        assert_eq!(ids(&tree[1].children), vec![3]);
    }

    #[test]
    fn test_deep_chain() {
        const DEPTH: i32 = 20_000;
        let items: Vec<Item> = (1..=DEPTH)
            .map(|id| counted(id, (id > 1).then(|| id - 1), i64::from(id == DEPTH)))
            .collect();

        let tree = build_tree(items);
        assert_eq!(ids(&tree), vec![1]);
        assert_eq!(count_nodes(&tree), DEPTH as usize);

        let filtered = filter_empty(tree);
        assert_eq!(count_nodes(&filtered), DEPTH as usize);

        let mut node = &filtered[0];
        let mut depth = 1;
        while let Some(child) = node.children.first() {
            assert_eq!(child.data.parent_id, Some(node.data.id));
            node = child;
            depth += 1;
        }
        assert_eq!(depth, DEPTH);
        assert_eq!(node.data.count, Some(1));
    }

    #[test]
    fn test_deep_empty_chain_is_dropped() {
        let items: Vec<Item> = (1..=20_000)
            .map(|id| counted(id, (id > 1).then(|| id - 1), 0))
            .collect();
        assert!(filter_empty(build_tree(items)).is_empty());
    }

    #[test]
    fn test_empty_input() {
        let tree: Vec<TreeNode<Item>> = build_tree(Vec::new());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_filter_keeps_ancestor_of_nonempty_child() {
        let tree = build_tree(vec![counted(1, None, 0), counted(2, Some(1), 5)]);
        let filtered = filter_empty(tree);

        assert_eq!(ids(&filtered), vec![1]);
        assert_eq!(ids(&filtered[0].children), vec![2]);
    }

    #[test]
    fn test_filter_drops_fully_empty_subtree() {
        let tree = build_tree(vec![counted(1, None, 0), counted(2, Some(1), 0)]);
        assert!(filter_empty(tree).is_empty());
    }

    #[test]
    fn test_filter_prunes_only_empty_siblings() {
        let tree = build_tree(vec![
            counted(1, None, 2),
            counted(2, Some(1), 0),
            counted(3, Some(1), 0),
            counted(4, Some(3), 1),
            counted(5, None, 0),
        ]);
        let filtered = filter_empty(tree);

        assert_eq!(ids(&filtered), vec![1]);
        assert_eq!(ids(&filtered[0].children), vec![3]);
        assert_eq!(ids(&filtered[0].children[0].children), vec![4]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let tree = build_tree(vec![
            counted(1, None, 0),
            counted(2, Some(1), 3),
            counted(3, Some(1), 0),
            counted(4, None, 0),
            counted(5, Some(4), 0),
            counted(6, None, 1),
        ]);
        let once = filter_empty(tree);
        let twice = filter_empty(once.clone());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_count_is_empty() {
        let tree = build_tree(vec![item(1, None, 1)]);
        assert!(filter_empty(tree).is_empty());
    }

    #[test]
    fn test_descendant_ids() {
        let items = vec![
            item(1, None, 1),
            item(2, Some(1), 1),
            item(3, Some(2), 1),
            item(4, None, 2),
        ];

        assert_eq!(descendant_ids(&items, 1), HashSet::from([2, 3]));
        assert!(descendant_ids(&items, 4).is_empty());
    }

    #[test]
    fn test_descendant_ids_with_cycle() {
        let items = vec![item(1, Some(2), 1), item(2, Some(1), 1)];
        assert_eq!(descendant_ids(&items, 1), HashSet::from([2]));
    }

    #[test]
    fn test_is_circular_reference() {
        // 1 <- 2 <- 3
        let parents = HashMap::from([(1, None), (2, Some(1)), (3, Some(2))]);
        let lookup = |id: i32| Ok::<_, ()>(parents.get(&id).copied().flatten());

        assert_eq!(is_circular_reference(1, Some(3), lookup), Ok(true));
        assert_eq!(is_circular_reference(3, Some(1), lookup), Ok(false));
        assert_eq!(is_circular_reference(2, Some(2), lookup), Ok(true));
        assert_eq!(is_circular_reference(2, None, lookup), Ok(false));
    }

    #[test]
    fn test_tree_node_serializes_flat() {
        #[derive(Serialize)]
        struct Named {
            id: i32,
            name: &'static str,
        }

        let node = TreeNode {
            data: Named { id: 1, name: "stack" },
            children: vec![TreeNode::leaf(Named {
                id: 2,
                name: "basic-stack",
            })],
        };
        let value = serde_json::to_value(&node).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "id": 1,
                "name": "stack",
                "children": [{"id": 2, "name": "basic-stack", "children": []}]
            })
        );
    }
}
