//! Channel tree
//!
//! Nodes live in an arena indexed by [`NodeId`]. A parent owns its children
//! through a `segment -> NodeId` map; each node keeps a plain `parent` id for
//! upward walks (lock checks, prune cascades). Children are kept in a
//! `BTreeMap` so every traversal is path-lexicographic.

use crate::error::{PathError, Result, TreeError};
use crate::path::{validate_segment, ChannelPath};
use crate::types::{PanelState, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// Arena index of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The synthetic root
    pub const ROOT: Self = Self(0);

    /// Raw arena slot
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Runtime representation of a node in the channel tree
#[derive(Debug, Clone)]
pub struct ChannelNode {
    pub(crate) path: ChannelPath,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: BTreeMap<String, NodeId>,
    pub(crate) weight: f64,
    pub(crate) last_message_at: Option<Timestamp>,
    pub(crate) holding_messages: bool,
    pub(crate) locked: bool,
    pub(crate) state: PanelState,
    pub(crate) fade_deadline: Option<Timestamp>,
}

impl ChannelNode {
    fn new(path: ChannelPath, parent: Option<NodeId>) -> Self {
        Self {
            path,
            parent,
            children: BTreeMap::new(),
            weight: 0.0,
            last_message_at: None,
            holding_messages: false,
            locked: false,
            state: PanelState::Active,
            fade_deadline: None,
        }
    }

    /// Full channel path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// `None` only for the root
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Current weight in `[0, 1]`
    #[inline]
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Current lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> PanelState {
        self.state
    }

    /// Whether decay is frozen
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Newest own-message timestamp
    #[inline]
    #[must_use]
    pub fn last_message_at(&self) -> Option<Timestamp> {
        self.last_message_at
    }

    /// When the node reaches `Removed` absent new messages
    #[inline]
    #[must_use]
    pub fn fade_deadline(&self) -> Option<Timestamp> {
        self.fade_deadline
    }

    /// Has at least one live message addressed exactly to this node
    #[inline]
    #[must_use]
    pub fn holds_messages(&self) -> bool {
        self.holding_messages
    }

    /// Number of direct children
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Direct children in segment order
    #[inline]
    pub fn child_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    /// Owned, read-only copy for callers outside the tree lock
    #[must_use]
    pub fn view(&self) -> NodeView {
        NodeView {
            path: self.path.clone(),
            weight: self.weight,
            state: self.state,
            locked: self.locked,
            holds_messages: self.holding_messages,
            last_message_at: self.last_message_at,
            fade_deadline: self.fade_deadline,
            children: self.children.len(),
        }
    }
}

/// Detached copy of a node's observable state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    /// Full channel path
    pub path: ChannelPath,
    /// Weight at the time of the view
    pub weight: f64,
    /// Lifecycle state
    pub state: PanelState,
    /// Decay frozen
    pub locked: bool,
    /// Has a live own message
    pub holds_messages: bool,
    /// Newest own-message timestamp
    pub last_message_at: Option<Timestamp>,
    /// When the node reaches `Removed` absent new messages
    pub fade_deadline: Option<Timestamp>,
    /// Number of direct children
    pub children: usize,
}

/// Outcome of [`ChannelTree::delete_subtree`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The target plus all of its descendants
    pub removed: usize,
    /// Ancestors pruned because the deletion left them empty
    pub pruned_ancestors: usize,
}

/// Canonical hierarchical channel structure
#[derive(Debug, Clone)]
pub struct ChannelTree {
    nodes: Vec<Option<ChannelNode>>,
    free: Vec<usize>,
    len: usize,
    max_depth: usize,
}

impl ChannelTree {
    /// Create an empty tree holding only the synthetic root
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            nodes: vec![Some(ChannelNode::new(ChannelPath::root(), None))],
            free: Vec::new(),
            len: 0,
            max_depth,
        }
    }

    /// Deepest accepted path
    #[inline]
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of nodes, root excluded
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Only the root is present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The synthetic root node
    #[inline]
    #[must_use]
    pub fn root(&self) -> &ChannelNode {
        self.node(NodeId::ROOT)
            .unwrap_or_else(|| unreachable!("root is never freed"))
    }

    /// Node at `id`, if still allocated
    #[inline]
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&ChannelNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut ChannelNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Resolve a path to its node id
    #[must_use]
    pub fn lookup(&self, path: &ChannelPath) -> Option<NodeId> {
        let mut current = NodeId::ROOT;
        for segment in path.iter() {
            current = *self.node(current)?.children.get(segment)?;
        }
        Some(current)
    }

    /// Node at `path`
    #[inline]
    #[must_use]
    pub fn get(&self, path: &ChannelPath) -> Option<&ChannelNode> {
        self.lookup(path).and_then(|id| self.node(id))
    }

    /// Whether `path` is in the tree
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &ChannelPath) -> bool {
        self.lookup(path).is_some()
    }

    /// Walk from the root, creating every missing segment node
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`] for the root path, a segment outside
    /// `[A-Za-z0-9_-]` or a path deeper than the configured maximum; nothing
    /// is created in that case
    pub fn ensure_path(&mut self, path: &ChannelPath) -> Result<NodeId> {
        if path.is_empty() {
            return Err(PathError::Empty.into());
        }
        if path.len() > self.max_depth {
            return Err(PathError::TooDeep {
                depth: path.len(),
                max: self.max_depth,
            }
            .into());
        }
        for segment in path.iter() {
            validate_segment(segment)?;
        }

        let mut current = NodeId::ROOT;
        let mut walked = ChannelPath::root();
        for segment in path.iter() {
            walked = walked.child(segment)?;
            let existing = self
                .node(current)
                .and_then(|node| node.children.get(segment).copied());
            current = match existing {
                Some(id) => id,
                None => {
                    let id = self.insert(ChannelNode::new(walked.clone(), Some(current)));
                    if let Some(parent) = self.node_mut(current) {
                        parent.children.insert(segment.to_string(), id);
                    }
                    tracing::trace!(channel = %walked, "created channel node");
                    id
                }
            };
        }
        Ok(current)
    }

    /// Register a message addressed exactly to `path`
    ///
    /// Resets the node to `Active` at full weight, unless it is locked, in
    /// which case its frozen weight is kept. Decay restarts from the newest
    /// own-message timestamp.
    ///
    /// # Errors
    /// Same as [`ensure_path`](Self::ensure_path)
    pub fn record_message(&mut self, path: &ChannelPath, timestamp: Timestamp) -> Result<NodeId> {
        let id = self.ensure_path(path)?;
        if let Some(node) = self.node_mut(id) {
            node.last_message_at =
                Some(node.last_message_at.map_or(timestamp, |t| t.max(timestamp)));
            node.holding_messages = true;
            node.state = PanelState::Active;
            node.fade_deadline = None;
            if !node.locked {
                node.weight = 1.0;
            }
        }
        Ok(id)
    }

    /// Toggle the decay lock on an existing node
    ///
    /// # Errors
    /// [`TreeError::NotFound`] when `path` is not in the tree
    pub fn set_lock(&mut self, path: &ChannelPath, locked: bool) -> Result<NodeId> {
        let id = self
            .lookup(path)
            .filter(|id| *id != NodeId::ROOT)
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
        if let Some(node) = self.node_mut(id) {
            node.locked = locked;
        }
        Ok(id)
    }

    /// Remove the node at `path` together with its whole subtree, then prune
    /// any ancestor the removal left empty
    ///
    /// Message history is not touched here; the caller owns that store.
    ///
    /// # Errors
    /// [`TreeError::NotFound`] when `path` is not in the tree
    pub fn delete_subtree(&mut self, path: &ChannelPath, now: Timestamp) -> Result<DeleteOutcome> {
        let id = self
            .lookup(path)
            .filter(|id| *id != NodeId::ROOT)
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;

        let parent = self.node(id).and_then(ChannelNode::parent);
        let removed = self.detach_subtree(id);
        let pruned_ancestors = parent.map_or(0, |p| self.prune_if_eligible(p, now));

        Ok(DeleteOutcome {
            removed,
            pruned_ancestors,
        })
    }

    /// Whether `id` may be removed right now
    ///
    /// Childless, unlocked, holding no live message, and either message-less
    /// or past its fade deadline.
    #[must_use]
    pub fn is_prunable(&self, id: NodeId, now: Timestamp) -> bool {
        if id == NodeId::ROOT {
            return false;
        }
        self.node(id).is_some_and(|node| {
            node.children.is_empty()
                && !node.locked
                && !node.holding_messages
                && (node.last_message_at.is_none()
                    || node.state == PanelState::Removed
                    || node.fade_deadline.is_some_and(|deadline| now > deadline))
        })
    }

    /// Prune `id` if eligible and keep going up while parents become eligible
    ///
    /// Returns the number of nodes removed.
    pub fn prune_if_eligible(&mut self, id: NodeId, now: Timestamp) -> usize {
        let mut pruned = 0;
        let mut current = Some(id);
        while let Some(candidate) = current {
            if !self.is_prunable(candidate, now) {
                break;
            }
            current = self.node(candidate).and_then(ChannelNode::parent);
            if let Some(node) = self.node(candidate) {
                tracing::debug!(channel = %node.path, "pruning channel node");
            }
            pruned += self.detach_subtree(candidate);
        }
        pruned
    }

    /// Node ids depth-first, parents before children, lexicographic siblings,
    /// root excluded
    #[must_use]
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len);
        let mut stack: Vec<NodeId> = self.root().children.values().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.values().rev().copied());
            }
        }
        order
    }

    /// Node ids with every child before its parent, root excluded
    #[must_use]
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }

    /// Nodes depth-first in path-lexicographic order, root excluded
    pub fn iter(&self) -> impl Iterator<Item = &ChannelNode> + '_ {
        self.pre_order().into_iter().filter_map(move |id| self.node(id))
    }

    /// Read-only copy for the layout generator and other readers
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut nodes = Vec::with_capacity(self.len + 1);
        let mut stack = vec![(NodeId::ROOT, None::<usize>)];
        while let Some((id, parent_slot)) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            let slot = nodes.len();
            nodes.push(SnapshotNode {
                path: node.path.clone(),
                weight: node.weight,
                state: node.state,
                locked: node.locked,
                holds_messages: node.holding_messages,
                children: Vec::with_capacity(node.children.len()),
            });
            if let Some(p) = parent_slot {
                nodes[p].children.push(slot);
            }
            for child in node.children.values().rev() {
                stack.push((*child, Some(slot)));
            }
        }
        TreeSnapshot { nodes }
    }

    fn insert(&mut self, node: ChannelNode) -> NodeId {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            NodeId(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    /// Unlink `id` from its parent and free it and all descendants
    pub(crate) fn detach_subtree(&mut self, id: NodeId) -> usize {
        let (parent, segment) = match self.node(id) {
            Some(node) => (node.parent, node.path.last().map(str::to_string)),
            None => return 0,
        };
        if let (Some(parent), Some(segment)) = (parent, segment) {
            if let Some(parent) = self.node_mut(parent) {
                parent.children.remove(&segment);
            }
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                stack.extend(node.children.values().copied());
                self.free.push(next.0);
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }
}

/// Snapshot entry; `children` index into [`TreeSnapshot::nodes`]
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotNode {
    /// Full channel path
    pub path: ChannelPath,
    /// Weight when snapshotted
    pub weight: f64,
    /// Lifecycle state
    pub state: PanelState,
    /// Decay frozen
    pub locked: bool,
    /// Has a live own message
    pub holds_messages: bool,
    /// Child slots in segment order
    pub children: Vec<usize>,
}

/// Immutable pre-order copy of the tree; slot 0 is the root
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    nodes: Vec<SnapshotNode>,
}

impl TreeSnapshot {
    /// Slot 0
    #[inline]
    #[must_use]
    pub fn root(&self) -> &SnapshotNode {
        &self.nodes[0]
    }

    /// Entry at `slot`
    #[inline]
    #[must_use]
    pub fn node(&self, slot: usize) -> Option<&SnapshotNode> {
        self.nodes.get(slot)
    }

    /// All entries in pre-order
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Number of channel nodes, root excluded
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Only the root was captured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Entry for `path`, linear scan
    #[must_use]
    pub fn find(&self, path: &ChannelPath) -> Option<&SnapshotNode> {
        self.nodes.iter().find(|n| &n.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn p(s: &str) -> ChannelPath {
        s.parse().unwrap()
    }

    #[test]
    fn new_tree_has_only_root() {
        let tree = ChannelTree::new(8);
        assert!(tree.is_empty());
        assert!(tree.root().path().is_empty());
        assert_eq!(tree.root().child_count(), 0);
    }

    #[test]
    fn ensure_path_creates_ancestors() {
        let mut tree = ChannelTree::new(8);
        let leaf = tree.ensure_path(&p("this.that.other")).unwrap();

        assert_eq!(tree.len(), 3);
        assert!(tree.contains(&p("this")));
        assert!(tree.contains(&p("this.that")));
        let node = tree.node(leaf).unwrap();
        assert_eq!(node.path(), &p("this.that.other"));
        let parent = tree.node(node.parent().unwrap()).unwrap();
        assert_eq!(parent.path(), &p("this.that"));
    }

    #[test]
    fn ensure_path_is_idempotent() {
        let mut tree = ChannelTree::new(8);
        let a = tree.ensure_path(&p("a.b")).unwrap();
        let b = tree.ensure_path(&p("a.b")).unwrap();
        assert_eq!(a, b);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn ensure_path_rejects_too_deep_without_mutation() {
        let mut tree = ChannelTree::new(2);
        let result = tree.ensure_path(&p("a.b.c"));
        assert!(matches!(
            result,
            Err(TreeError::InvalidPath(PathError::TooDeep { depth: 3, max: 2 }))
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn ensure_path_rejects_root() {
        let mut tree = ChannelTree::new(2);
        assert!(tree.ensure_path(&ChannelPath::root()).is_err());
    }

    #[test]
    fn record_message_resets_to_full_weight() {
        let mut tree = ChannelTree::new(8);
        let id = tree.record_message(&p("a.b"), t(0)).unwrap();
        {
            let node = tree.node_mut(id).unwrap();
            node.weight = 0.3;
            node.state = PanelState::Fading;
            node.holding_messages = false;
        }
        tree.record_message(&p("a.b"), t(5)).unwrap();

        let node = tree.get(&p("a.b")).unwrap();
        assert_eq!(node.weight(), 1.0);
        assert_eq!(node.state(), PanelState::Active);
        assert_eq!(node.last_message_at(), Some(t(5)));
        assert!(node.holds_messages());
        // ancestor has no own messages
        assert_eq!(tree.get(&p("a")).unwrap().last_message_at(), None);
    }

    #[test]
    fn record_message_keeps_frozen_weight_when_locked() {
        let mut tree = ChannelTree::new(8);
        let id = tree.record_message(&p("a"), t(0)).unwrap();
        tree.node_mut(id).unwrap().weight = 0.4;
        tree.set_lock(&p("a"), true).unwrap();

        tree.record_message(&p("a"), t(10)).unwrap();
        assert_eq!(tree.get(&p("a")).unwrap().weight(), 0.4);
    }

    #[test]
    fn older_timestamp_does_not_rewind_activity() {
        let mut tree = ChannelTree::new(8);
        tree.record_message(&p("a"), t(10)).unwrap();
        tree.record_message(&p("a"), t(3)).unwrap();
        assert_eq!(tree.get(&p("a")).unwrap().last_message_at(), Some(t(10)));
    }

    #[test]
    fn set_lock_on_missing_path_is_not_found() {
        let mut tree = ChannelTree::new(8);
        assert!(matches!(
            tree.set_lock(&p("ghost"), true),
            Err(TreeError::NotFound(path)) if path == "ghost"
        ));
    }

    #[test]
    fn delete_subtree_prunes_empty_ancestors() {
        let mut tree = ChannelTree::new(8);
        tree.ensure_path(&p("a.b.c.d")).unwrap();

        let outcome = tree.delete_subtree(&p("a.b.c"), t(0)).unwrap();
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.pruned_ancestors, 2);
        assert!(tree.is_empty());
    }

    #[test]
    fn delete_subtree_keeps_ancestor_with_other_children() {
        let mut tree = ChannelTree::new(8);
        tree.ensure_path(&p("a.b")).unwrap();
        tree.ensure_path(&p("a.c")).unwrap();

        let outcome = tree.delete_subtree(&p("a.b"), t(0)).unwrap();
        assert_eq!(outcome, DeleteOutcome { removed: 1, pruned_ancestors: 0 });
        assert!(tree.contains(&p("a.c")));
        assert!(!tree.contains(&p("a.b")));
    }

    #[test]
    fn delete_subtree_keeps_locked_or_messaged_ancestor() {
        let mut tree = ChannelTree::new(8);
        tree.record_message(&p("a"), t(0)).unwrap();
        tree.ensure_path(&p("a.b")).unwrap();
        tree.ensure_path(&p("x.y")).unwrap();
        tree.set_lock(&p("x"), true).unwrap();

        tree.delete_subtree(&p("a.b"), t(1)).unwrap();
        tree.delete_subtree(&p("x.y"), t(1)).unwrap();
        assert!(tree.contains(&p("a")));
        assert!(tree.contains(&p("x")));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut tree = ChannelTree::new(8);
        assert!(matches!(
            tree.delete_subtree(&p("nope"), t(0)),
            Err(TreeError::NotFound(_))
        ));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut tree = ChannelTree::new(8);
        let first = tree.ensure_path(&p("a")).unwrap();
        tree.delete_subtree(&p("a"), t(0)).unwrap();
        let second = tree.ensure_path(&p("b")).unwrap();
        assert_eq!(first, second);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn traversal_is_lexicographic_depth_first() {
        let mut tree = ChannelTree::new(8);
        for path in ["b.z", "a", "b.a", "a.c"] {
            tree.ensure_path(&p(path)).unwrap();
        }
        let order: Vec<String> = tree.iter().map(|n| n.path().to_string()).collect();
        assert_eq!(order, vec!["a", "a.c", "b", "b.a", "b.z"]);

        let post: Vec<String> = tree
            .post_order()
            .into_iter()
            .map(|id| tree.node(id).unwrap().path().to_string())
            .collect();
        assert_eq!(post.first().map(String::as_str), Some("b.z"));
        assert_eq!(post.last().map(String::as_str), Some("a"));
    }

    #[test]
    fn snapshot_mirrors_structure() {
        let mut tree = ChannelTree::new(8);
        tree.record_message(&p("a.b"), t(0)).unwrap();
        tree.ensure_path(&p("a.c")).unwrap();

        let snapshot = tree.snapshot();
        assert_eq!(snapshot.len(), 3);
        let a = snapshot.node(snapshot.root().children[0]).unwrap();
        assert_eq!(a.path, p("a"));
        let kids: Vec<String> = a
            .children
            .iter()
            .map(|slot| snapshot.node(*slot).unwrap().path.to_string())
            .collect();
        assert_eq!(kids, vec!["a.b", "a.c"]);
        assert!(snapshot.find(&p("a.b")).unwrap().holds_messages);
    }
}
