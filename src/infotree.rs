//! A tree mirroring the bisection recursion, modeled per the "cyclic data
//! shape" design note: an arena owned by the diff invocation, with workers
//! carrying an index rather than a reference.
//!
//! Writes are localized: the task that owns node `n` is the only writer to
//! `n` after `add_node` hands back its index. The one piece that genuinely
//! needs synchronization is the append itself, since sibling workers append
//! children concurrently during the recursion; every other field access is
//! single-writer and needs no lock.

use parking_lot::Mutex;

use crate::keyvalue::Row;

/// Index into an [`InfoTree`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Whether a node's segment pair has been determined to differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDecision {
    Unknown,
    Equal,
    Differs,
}

/// Per-node bisection bookkeeping.
#[derive(Debug, Default)]
pub struct SegmentInfo {
    pub rowcounts: Option<(u64, u64)>,
    pub is_diff: Option<bool>,
    pub leaf_diff: Option<Vec<Row>>,
    pub max_rows: Option<u128>,
}

impl SegmentInfo {
    pub fn decision(&self) -> DiffDecision {
        match self.is_diff {
            None => DiffDecision::Unknown,
            Some(false) => DiffDecision::Equal,
            Some(true) => DiffDecision::Differs,
        }
    }
}

struct InfoNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    info: SegmentInfo,
}

/// A single-arena tree mirroring the recursive bisection, owned by one
/// `HashBisectDiffer::diff` invocation.
pub struct InfoTree {
    nodes: Mutex<Vec<InfoNode>>,
}

impl InfoTree {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(vec![InfoNode {
                parent: None,
                children: Vec::new(),
                info: SegmentInfo::default(),
            }]),
        }
    }

    /// The implicit root node, created when the tree is constructed.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Allocates a new child node under `parent` and returns its id. This
    /// is the only operation that locks the arena.
    pub fn add_node(&self, parent: NodeId) -> NodeId {
        let mut nodes = self.nodes.lock();
        let id = NodeId(nodes.len());
        nodes.push(InfoNode {
            parent: Some(parent),
            children: Vec::new(),
            info: SegmentInfo::default(),
        });
        nodes[parent.0].children.push(id);
        id
    }

    /// Usually set once, when `count_and_checksum` returns for this node.
    /// A node that falls through to a local leaf comparison after a
    /// checksum check sets it a second time with the downloaded row
    /// counts, overwriting the checksum-query counts (the two should
    /// agree; this mirrors the one path in the original algorithm where
    /// the same node is touched by both a segment-level count query and a
    /// leaf `get_values`).
    pub fn set_rowcounts(&self, node: NodeId, a: u64, b: u64) {
        let mut nodes = self.nodes.lock();
        nodes[node.0].info.rowcounts = Some((a, b));
    }

    pub fn set_is_diff(&self, node: NodeId, is_diff: bool) {
        let mut nodes = self.nodes.lock();
        nodes[node.0].info.is_diff = Some(is_diff);
    }

    pub fn set_leaf_diff(&self, node: NodeId, diff: Vec<Row>) {
        let mut nodes = self.nodes.lock();
        nodes[node.0].info.leaf_diff = Some(diff);
    }

    pub fn set_max_rows(&self, node: NodeId, max_rows: u128) {
        let mut nodes = self.nodes.lock();
        nodes[node.0].info.max_rows = Some(max_rows);
    }

    pub fn rowcounts(&self, node: NodeId) -> Option<(u64, u64)> {
        self.nodes.lock()[node.0].info.rowcounts
    }

    pub fn decision(&self, node: NodeId) -> DiffDecision {
        self.nodes.lock()[node.0].info.decision()
    }

    /// Total number of nodes allocated, including the root.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Post-order aggregation: counts leaves whose decision is `Differs`,
    /// called only after the diff stream has been fully drained (so no
    /// other writer can still be mutating a node).
    pub fn count_differing_subtrees(&self) -> usize {
        let nodes = self.nodes.lock();
        nodes.iter().filter(|n| matches!(n.info.is_diff, Some(true))).count()
    }

    /// Total row counts on each side, summed over true leaves only
    /// (`children.is_empty()`). A split node's own rowcounts may hold a
    /// stale pre-split checksum-query count once its region has been
    /// pushed down into finer children, so only leaves carry an authoritative
    /// count; called only after the diff stream has been fully drained, per
    /// `diff_tables.py`'s own post-generator read of `info_tree.info.rowcounts`.
    pub fn total_rowcounts(&self) -> (u64, u64) {
        let nodes = self.nodes.lock();
        nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .fold((0u64, 0u64), |(a, b), n| {
                let (ra, rb) = n.info.rowcounts.unwrap_or((0, 0));
                (a + ra, b + rb)
            })
    }
}

impl Default for InfoTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_links_parent_and_child() {
        let tree = InfoTree::new();
        let root = tree.root();
        let child = tree.add_node(root);
        assert_eq!(tree.len(), 2);
        tree.set_rowcounts(child, 3, 4);
        assert_eq!(tree.rowcounts(child), Some((3, 4)));
    }

    #[test]
    fn rowcounts_can_be_overwritten_by_a_later_leaf_comparison() {
        let tree = InfoTree::new();
        let node = tree.root();
        tree.set_rowcounts(node, 1, 1);
        tree.set_rowcounts(node, 2, 2);
        assert_eq!(tree.rowcounts(node), Some((2, 2)));
    }

    #[test]
    fn decision_starts_unknown() {
        let tree = InfoTree::new();
        assert_eq!(tree.decision(tree.root()), DiffDecision::Unknown);
        tree.set_is_diff(tree.root(), true);
        assert_eq!(tree.decision(tree.root()), DiffDecision::Differs);
    }

    #[test]
    fn aggregation_counts_differing_nodes() {
        let tree = InfoTree::new();
        let root = tree.root();
        let a = tree.add_node(root);
        let b = tree.add_node(root);
        tree.set_is_diff(a, true);
        tree.set_is_diff(b, false);
        assert_eq!(tree.count_differing_subtrees(), 1);
    }

    #[test]
    fn total_rowcounts_sums_leaves_only_not_stale_split_parents() {
        let tree = InfoTree::new();
        let root = tree.root();
        // Root gets a checksum-query count, then splits further: its own
        // rowcounts go stale and must not be double-counted alongside its
        // children's finer, authoritative counts.
        tree.set_rowcounts(root, 10, 12);
        let a = tree.add_node(root);
        let b = tree.add_node(root);
        tree.set_rowcounts(a, 4, 5);
        tree.set_rowcounts(b, 6, 7);
        assert_eq!(tree.total_rowcounts(), (10, 12));
    }
}
