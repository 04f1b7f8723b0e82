use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::change::ChangeTracker;
use crate::codec::{LoadError, SaveError, TextCodec};
use crate::config::CodecConfig;
use crate::metadata::{MetadataStore, MetadataValue};
use crate::node::{
    is_valid_type_tag, BoundingBox, Geometry, GeometryType, NodeId, NodeType, TreeNode,
};

static NEXT_TREE_TAG: AtomicU64 = AtomicU64::new(1);

/// Tree-manipulation errors.
/// 專案樹操作錯誤類型。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectTreeError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("moving {node} under {new_parent} would create a cycle")]
    CycleDetected { node: NodeId, new_parent: NodeId },
    #[error("the root node cannot be removed")]
    CannotRemoveRoot,
    #[error("{coordinate_count} coordinates do not fit a {geometry_type} geometry")]
    InvalidGeometry {
        geometry_type: GeometryType,
        coordinate_count: usize,
    },
    #[error("bounding box values must be finite")]
    InvalidBoundingBox,
    #[error("invalid node type tag {0:?}")]
    InvalidTypeTag(String),
}

/// Fields of a node that has not been linked into a tree yet.
#[derive(Debug, Clone)]
pub(crate) struct NodeSeed {
    pub uuid: String,
    pub last_update: f64,
    pub node_type: NodeType,
    pub name: String,
    pub uri: String,
    pub bounding_box: Option<BoundingBox>,
    pub geometry: Geometry,
    pub metadata: MetadataStore,
}

impl NodeSeed {
    fn fresh(node_type: NodeType, name: String, uri: String) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            last_update: now_unix(),
            node_type,
            name,
            uri,
            bounding_box: None,
            geometry: Geometry::default(),
            metadata: MetadataStore::new(),
        }
    }

    fn into_node(self, id: NodeId) -> TreeNode {
        let mut node = TreeNode::new(id, self.uuid, self.node_type, self.name, self.uri);
        node.last_update = self.last_update;
        node.bounding_box = self.bounding_box;
        node.geometry = self.geometry;
        node.metadata = self.metadata;
        node
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry<U> {
    node: TreeNode,
    user_data: Option<U>,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot<U> {
    /// Bumped whenever the slot is released so stale handles stop resolving.
    generation: u32,
    entry: Option<Entry<U>>,
}

/// Mutable project tree whose nodes live in a generational arena.
/// 以世代式 arena 儲存節點的可變專案樹。
///
/// `U` is an optional application payload attached to nodes; it is owned by
/// the tree, dropped together with its node and never serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTree<U = ()> {
    tag: u64,
    slots: Vec<Slot<U>>,
    free_list: Vec<u32>,
    live: usize,
    root: NodeId,
    changes: ChangeTracker,
}

impl ProjectTree {
    /// Constructs a tree holding a single folder root.
    /// 建立僅含資料夾根節點的專案樹。
    pub fn new_empty(name: impl Into<String>) -> Self {
        Self::empty(name)
    }

    /// Parses `text` with the default codec settings.
    /// 以預設設定解析文字並建立專案樹。
    pub fn load(text: &str) -> Result<Self, LoadError> {
        TextCodec::default().parse(text)
    }

    /// Parses `text` with explicit codec settings.
    /// 以指定設定解析文字並建立專案樹。
    pub fn load_with(text: &str, config: &CodecConfig) -> Result<Self, LoadError> {
        TextCodec::new(config.clone()).parse(text)
    }
}

impl<U> ProjectTree<U> {
    /// Same as [`ProjectTree::new_empty`] for trees carrying a payload type.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::from_root(NodeSeed::fresh(NodeType::Folder, name.into(), String::new()))
    }

    pub(crate) fn from_root(seed: NodeSeed) -> Self {
        let tag = NEXT_TREE_TAG.fetch_add(1, Ordering::Relaxed);
        let root = NodeId::new(tag, 0, 0);
        Self {
            tag,
            slots: vec![Slot {
                generation: 0,
                entry: Some(Entry {
                    node: seed.into_node(root),
                    user_data: None,
                }),
            }],
            free_list: Vec::new(),
            live: 1,
            root,
            changes: ChangeTracker::new(),
        }
    }

    /// Emits the tree in the text format; does not clear the dirty flag.
    /// 將專案樹輸出為文字；不會清除變更旗標。
    pub fn serialize(&self) -> Result<String, SaveError> {
        TextCodec::default().serialize(self)
    }

    /// Emits the tree with explicit codec settings; fails with
    /// [`SaveError::TooDeep`] when the result could not be loaded back.
    /// 以指定設定輸出專案樹；過深時回傳錯誤。
    pub fn serialize_with(&self, config: &CodecConfig) -> Result<String, SaveError> {
        TextCodec::new(config.clone()).serialize(self)
    }

    /// Reports whether the tree changed since it was built or last saved.
    /// 自建立或上次儲存後是否有未儲存的變更。
    pub fn has_unsaved_changes(&self) -> bool {
        self.changes.is_dirty()
    }

    /// Clears the dirty flag once the caller has committed a save.
    pub fn mark_saved(&mut self) {
        self.changes.clear();
    }

    /// Number of successful mutations since the tree was built.
    pub fn revision(&self) -> u64 {
        self.changes.revision()
    }

    /// Returns the identifier of the root node.
    /// 取得根節點的識別碼。
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &TreeNode {
        // The root slot is never released.
        match &self.slots[self.root.index as usize].entry {
            Some(entry) => &entry.node,
            None => unreachable!("root slot released"),
        }
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Finds a node by identifier.
    /// 依識別碼尋找節點。
    pub fn node(&self, id: NodeId) -> Result<&TreeNode, ProjectTreeError> {
        self.entry(id)
            .map(|entry| &entry.node)
            .ok_or(ProjectTreeError::NodeNotFound(id))
    }

    /// Finds a node by the identifier used in the text format.
    pub fn find_by_uuid(&self, uuid: &str) -> Option<NodeId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .find(|entry| entry.node.uuid == uuid)
            .map(|entry| entry.node.id)
    }

    /// Iterates the direct children of `id` in sibling order.
    pub fn children(&self, id: NodeId) -> Result<Children<'_, U>, ProjectTreeError> {
        let node = self.node(id)?;
        Ok(Children {
            tree: self,
            next: node.first_child,
        })
    }

    /// Pre-order walk of the whole tree, yielding each node with its depth.
    pub fn depth_first(&self) -> DepthFirst<'_, U> {
        DepthFirst {
            tree: self,
            start: self.root,
            next: Some((self.root, 0)),
        }
    }

    /// Pre-order walk of the subtree rooted at `id`, `id` itself at depth 0.
    pub fn subtree(&self, id: NodeId) -> Result<DepthFirst<'_, U>, ProjectTreeError> {
        self.node(id)?;
        Ok(DepthFirst {
            tree: self,
            start: id,
            next: Some((id, 0)),
        })
    }

    /// Returns `true` when `ancestor` lies on the parent chain of `id` or is `id`.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.entry(candidate).and_then(|entry| entry.node.parent);
        }
        false
    }

    /// Appends a new node as the last child of `parent_id`.
    /// 在指定的父節點下方新增子節點（加在最後）。
    pub fn create_child(
        &mut self,
        parent_id: NodeId,
        node_type: NodeType,
        name: impl Into<String>,
        uri: impl Into<String>,
    ) -> Result<NodeId, ProjectTreeError> {
        self.node(parent_id)?;
        if !is_valid_type_tag(node_type.tag()) {
            return Err(ProjectTreeError::InvalidTypeTag(node_type.tag().to_string()));
        }
        let seed = NodeSeed::fresh(node_type.normalized(), name.into(), uri.into());
        let last = self.children(parent_id)?.last().map(TreeNode::id);
        let id = self.insert_after(parent_id, last, seed)?;
        self.changes.mark();
        trace!(%parent_id, %id, "created child node");
        Ok(id)
    }

    /// Moves `node_id` from `current_parent_id` into `new_parent_id`, placed
    /// before `insert_before_id` or last when `None`.
    /// 移動節點至新的父節點；所有檢查都在改動連結之前完成。
    pub fn move_child(
        &mut self,
        current_parent_id: NodeId,
        new_parent_id: NodeId,
        node_id: NodeId,
        insert_before_id: Option<NodeId>,
    ) -> Result<(), ProjectTreeError> {
        self.node(current_parent_id)?;
        self.node(new_parent_id)?;
        let node = self.node(node_id)?;
        if node.parent != Some(current_parent_id) {
            debug!(%node_id, %current_parent_id, "move rejected: not a child");
            return Err(ProjectTreeError::NotAChild {
                parent: current_parent_id,
                child: node_id,
            });
        }
        if self.is_ancestor_or_self(node_id, new_parent_id) {
            debug!(%node_id, %new_parent_id, "move rejected: cycle");
            return Err(ProjectTreeError::CycleDetected {
                node: node_id,
                new_parent: new_parent_id,
            });
        }
        if let Some(before_id) = insert_before_id {
            let before_parent = self.node(before_id)?.parent;
            if before_id == node_id && new_parent_id == current_parent_id {
                // Inserting a node before itself keeps its position.
                self.changes.mark();
                return Ok(());
            }
            if before_parent != Some(new_parent_id) || before_id == node_id {
                debug!(%before_id, %new_parent_id, "move rejected: anchor not a child");
                return Err(ProjectTreeError::NotAChild {
                    parent: new_parent_id,
                    child: before_id,
                });
            }
        }

        self.detach(node_id)?;
        let after = match insert_before_id {
            Some(before_id) => self.predecessor(new_parent_id, before_id)?,
            None => self.children(new_parent_id)?.last().map(TreeNode::id),
        };
        self.link_after(new_parent_id, after, node_id)?;
        self.changes.mark();
        trace!(%node_id, %new_parent_id, "moved node");
        Ok(())
    }

    /// Removes `node_id` and its whole subtree from under `parent_id`.
    /// 移除節點及其所有子孫。
    pub fn remove_child(
        &mut self,
        parent_id: NodeId,
        node_id: NodeId,
    ) -> Result<(), ProjectTreeError> {
        let node = self.node(node_id)?;
        if node_id == self.root {
            return Err(ProjectTreeError::CannotRemoveRoot);
        }
        let parent = node.parent;
        self.node(parent_id)?;
        if parent != Some(parent_id) {
            return Err(ProjectTreeError::NotAChild {
                parent: parent_id,
                child: node_id,
            });
        }

        let doomed: Vec<NodeId> = self.subtree(node_id)?.map(|(node, _)| node.id).collect();
        self.detach(node_id)?;
        for id in &doomed {
            self.release(*id);
        }
        self.changes.mark();
        trace!(%parent_id, %node_id, removed = doomed.len(), "removed subtree");
        Ok(())
    }

    pub fn set_name(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
    ) -> Result<(), ProjectTreeError> {
        let node = self.node_mut(node_id)?;
        node.name = name.into();
        self.touched(node_id);
        Ok(())
    }

    pub fn set_uri(
        &mut self,
        node_id: NodeId,
        uri: impl Into<String>,
    ) -> Result<(), ProjectTreeError> {
        let node = self.node_mut(node_id)?;
        node.uri = uri.into();
        self.touched(node_id);
        Ok(())
    }

    /// Replaces the node's geometry if `coordinates` fit `geometry_type`.
    /// 座標數量不符時回傳錯誤，原有幾何保持不變。
    pub fn set_geometry(
        &mut self,
        node_id: NodeId,
        geometry_type: GeometryType,
        coordinates: Vec<f64>,
    ) -> Result<(), ProjectTreeError> {
        self.node(node_id)?;
        let coordinate_count = coordinates.len();
        let geometry = Geometry::new(geometry_type, coordinates).ok_or(
            ProjectTreeError::InvalidGeometry {
                geometry_type,
                coordinate_count,
            },
        )?;
        self.node_mut(node_id)?.geometry = geometry;
        self.touched(node_id);
        Ok(())
    }

    pub fn set_bounding_box(
        &mut self,
        node_id: NodeId,
        bounding_box: Option<BoundingBox>,
    ) -> Result<(), ProjectTreeError> {
        self.node(node_id)?;
        if bounding_box.is_some_and(|bbox| !bbox.is_finite()) {
            return Err(ProjectTreeError::InvalidBoundingBox);
        }
        self.node_mut(node_id)?.bounding_box = bounding_box;
        self.touched(node_id);
        Ok(())
    }

    /// Inserts or overwrites a metadata entry on `node_id`.
    /// 設定節點的中繼資料。
    pub fn set_metadata(
        &mut self,
        node_id: NodeId,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<Option<MetadataValue>, ProjectTreeError> {
        let previous = self.node_mut(node_id)?.metadata.set(key, value);
        self.touched(node_id);
        Ok(previous)
    }

    pub fn user_data(&self, node_id: NodeId) -> Option<&U> {
        self.entry(node_id).and_then(|entry| entry.user_data.as_ref())
    }

    pub fn user_data_mut(&mut self, node_id: NodeId) -> Option<&mut U> {
        self.entry_mut(node_id)
            .and_then(|entry| entry.user_data.as_mut())
    }

    /// Attaches a payload to `node_id`, returning the one it replaces.
    pub fn set_user_data(
        &mut self,
        node_id: NodeId,
        data: U,
    ) -> Result<Option<U>, ProjectTreeError> {
        let entry = self
            .entry_mut(node_id)
            .ok_or(ProjectTreeError::NodeNotFound(node_id))?;
        Ok(entry.user_data.replace(data))
    }

    pub fn take_user_data(&mut self, node_id: NodeId) -> Option<U> {
        self.entry_mut(node_id)
            .and_then(|entry| entry.user_data.take())
    }

    /// Links a seed after `after` (or first when `None`) without marking the
    /// tree dirty; used while building a tree from text.
    pub(crate) fn insert_after(
        &mut self,
        parent_id: NodeId,
        after: Option<NodeId>,
        seed: NodeSeed,
    ) -> Result<NodeId, ProjectTreeError> {
        self.node(parent_id)?;
        if let Some(after_id) = after {
            if self.node(after_id)?.parent != Some(parent_id) {
                return Err(ProjectTreeError::NotAChild {
                    parent: parent_id,
                    child: after_id,
                });
            }
        }
        let id = self.allocate(seed);
        self.link_after(parent_id, after, id)?;
        Ok(id)
    }

    fn entry(&self, id: NodeId) -> Option<&Entry<U>> {
        if id.tree != self.tag {
            return None;
        }
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry<U>> {
        if id.tree != self.tag {
            return None;
        }
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode, ProjectTreeError> {
        self.entry_mut(id)
            .map(|entry| &mut entry.node)
            .ok_or(ProjectTreeError::NodeNotFound(id))
    }

    fn touched(&mut self, id: NodeId) {
        if let Ok(node) = self.node_mut(id) {
            node.last_update = now_unix();
        }
        self.changes.mark();
        trace!(%id, "updated node content");
    }

    fn allocate(&mut self, seed: NodeSeed) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            let id = NodeId::new(self.tag, index, slot.generation);
            slot.entry = Some(Entry {
                node: seed.into_node(id),
                user_data: None,
            });
            id
        } else {
            let index = self.slots.len() as u32;
            let id = NodeId::new(self.tag, index, 0);
            self.slots.push(Slot {
                generation: 0,
                entry: Some(Entry {
                    node: seed.into_node(id),
                    user_data: None,
                }),
            });
            id
        }
    }

    fn release(&mut self, id: NodeId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation || slot.entry.take().is_none() {
            return;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.live -= 1;
    }

    /// Sibling that precedes `child_id` under `parent_id`, `None` if it is first.
    fn predecessor(
        &self,
        parent_id: NodeId,
        child_id: NodeId,
    ) -> Result<Option<NodeId>, ProjectTreeError> {
        let mut previous = None;
        for child in self.children(parent_id)? {
            if child.id == child_id {
                return Ok(previous);
            }
            previous = Some(child.id);
        }
        Err(ProjectTreeError::NotAChild {
            parent: parent_id,
            child: child_id,
        })
    }

    fn detach(&mut self, node_id: NodeId) -> Result<(), ProjectTreeError> {
        let node = self.node(node_id)?;
        let Some(parent_id) = node.parent else {
            return Ok(());
        };
        let next = node.next_sibling;
        match self.predecessor(parent_id, node_id)? {
            Some(previous) => self.node_mut(previous)?.next_sibling = next,
            None => self.node_mut(parent_id)?.first_child = next,
        }
        let node = self.node_mut(node_id)?;
        node.parent = None;
        node.next_sibling = None;
        Ok(())
    }

    fn link_after(
        &mut self,
        parent_id: NodeId,
        after: Option<NodeId>,
        node_id: NodeId,
    ) -> Result<(), ProjectTreeError> {
        let next = match after {
            Some(after_id) => {
                let previous = self.node_mut(after_id)?;
                std::mem::replace(&mut previous.next_sibling, Some(node_id))
            }
            None => {
                let parent = self.node_mut(parent_id)?;
                std::mem::replace(&mut parent.first_child, Some(node_id))
            }
        };
        let node = self.node_mut(node_id)?;
        node.parent = Some(parent_id);
        node.next_sibling = next;
        Ok(())
    }

    /// Checks every link invariant; used by tests.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let mut seen = 0;
        for (node, _) in self.depth_first() {
            seen += 1;
            let Ok(children) = self.children(node.id) else {
                return false;
            };
            for child in children {
                if child.parent != Some(node.id) {
                    return false;
                }
            }
        }
        seen == self.live && self.root().parent.is_none()
    }
}

/// Iterator over the direct children of a node.
pub struct Children<'a, U> {
    tree: &'a ProjectTree<U>,
    next: Option<NodeId>,
}

impl<'a, U> Iterator for Children<'a, U> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.node(self.next?).ok()?;
        self.next = node.next_sibling;
        Some(node)
    }
}

/// Pre-order iterator yielding `(node, depth)` pairs.
///
/// Walks the sibling and parent links directly, so it allocates nothing.
pub struct DepthFirst<'a, U> {
    tree: &'a ProjectTree<U>,
    start: NodeId,
    next: Option<(NodeId, usize)>,
}

impl<'a, U> Iterator for DepthFirst<'a, U> {
    type Item = (&'a TreeNode, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.next.take()?;
        let node = self.tree.node(id).ok()?;

        self.next = match node.first_child {
            Some(child) => Some((child, depth + 1)),
            None => {
                let mut current = node;
                let mut current_depth = depth;
                loop {
                    if current.id == self.start {
                        break None;
                    }
                    if let Some(sibling) = current.next_sibling {
                        break Some((sibling, current_depth));
                    }
                    match current.parent.and_then(|parent| self.tree.node(parent).ok()) {
                        Some(parent) => {
                            current = parent;
                            current_depth -= 1;
                        }
                        None => break None,
                    }
                }
            }
        };
        Some((node, depth))
    }
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Create(usize),
        Move { node: usize, to: usize, before: Option<usize> },
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<usize>().prop_map(Op::Create),
            4 => (any::<usize>(), any::<usize>(), proptest::option::of(any::<usize>()))
                .prop_map(|(node, to, before)| Op::Move { node, to, before }),
            1 => any::<usize>().prop_map(Op::Remove),
        ]
    }

    fn live_ids(tree: &ProjectTree) -> Vec<NodeId> {
        tree.depth_first().map(|(node, _)| node.id()).collect()
    }

    proptest! {
        #[test]
        fn random_edits_keep_tree_consistent(ops in proptest::collection::vec(op(), 1..60)) {
            let mut tree = ProjectTree::new_empty("root");
            for op in ops {
                let ids = live_ids(&tree);
                let pick = |n: usize| ids[n % ids.len()];
                match op {
                    Op::Create(parent) => {
                        tree.create_child(pick(parent), NodeType::Folder, "n", "").unwrap();
                    }
                    Op::Move { node, to, before } => {
                        let node = pick(node);
                        let current = tree.node(node).unwrap().parent();
                        let snapshot = tree.clone();
                        let result = tree.move_child(
                            current.unwrap_or(node),
                            pick(to),
                            node,
                            before.map(pick),
                        );
                        if result.is_err() {
                            prop_assert_eq!(&tree, &snapshot);
                        }
                    }
                    Op::Remove(node) => {
                        let node = pick(node);
                        if let Some(parent) = tree.node(node).unwrap().parent() {
                            tree.remove_child(parent, node).unwrap();
                        } else {
                            prop_assert_eq!(
                                tree.remove_child(node, node),
                                Err(ProjectTreeError::CannotRemoveRoot)
                            );
                        }
                    }
                }
                prop_assert!(tree.is_consistent());
            }
        }
    }
}
