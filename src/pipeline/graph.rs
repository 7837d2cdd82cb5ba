//! Pipeline graph: arena of nodes and the frame delivery path.
//!
//! Nodes live in a flat `Vec<NodeSlot>` indexed by `NodeId`. Forward edges
//! (`NodeKind`) own their children; the `upstream` back-reference is a plain
//! handle used for validation and splicing, never for ownership. Slots are
//! never reused, so a released node keeps its id.
//!
//! # Locking
//!
//! - The topology (links, sizes) sits behind one exclusive lock, held only
//!   for read/modify/write sequences.
//! - Each stage sits behind its own lock, so a frame mid-flight on the GPU
//!   thread and a controller thread editing topology can coexist.
//! - No stage hook ever runs with the topology lock held.

use crate::pipeline::chain;
use crate::pipeline::error::{PipelineError, PipelineResult, StageError};
use crate::pipeline::events::{CallbackSender, CallbackWorker, ErrorCallback, StageFailure};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{AnyStage, FrameAction, StageContext};
use crate::pipeline::stage_kind::StageKind;
use crate::types::Frame;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Downstream links of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Ordinary node: at most one downstream.
    Linear(Option<NodeId>),
    /// Branch node: an ordered set of downstreams.
    Branch(Vec<NodeId>),
}

impl NodeKind {
    pub fn children(&self) -> &[NodeId] {
        match self {
            NodeKind::Linear(Some(child)) => std::slice::from_ref(child),
            NodeKind::Linear(None) => &[],
            NodeKind::Branch(children) => children,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, NodeKind::Branch(_))
    }

    fn empty_like(&self) -> NodeKind {
        match self {
            NodeKind::Linear(_) => NodeKind::Linear(None),
            NodeKind::Branch(_) => NodeKind::Branch(Vec::new()),
        }
    }
}

/// Result of removing a node from its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The upstream was a branch; the node left its child set.
    LeftBranch,
    /// The node's single downstream (if any) was spliced onto its upstream.
    Spliced,
    /// The node is a branch with several children: the upstream was
    /// disconnected and the children stay attached to the removed node.
    Orphaned { children: Vec<NodeId> },
    /// The node had no upstream; nothing was rewired.
    Detached,
}

/// Shared per-node state reachable without the topology lock.
pub(crate) struct NodeEntry {
    pub(crate) kind: StageKind,
    pub(crate) name: String,
    stage: Mutex<AnyStage>,
    released: AtomicBool,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl NodeEntry {
    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// A slot in the arena.
pub(crate) struct NodeSlot {
    pub(crate) entry: Arc<NodeEntry>,
    pub(crate) upstream: Option<NodeId>,
    pub(crate) downstream: NodeKind,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Arena plus the hooks owed to stages once the lock is dropped.
pub(crate) struct Topology {
    slots: Vec<NodeSlot>,
    pending_resizes: Vec<(Arc<NodeEntry>, u32, u32)>,
}

impl Topology {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, id: NodeId) -> PipelineResult<&NodeSlot> {
        self.slots.get(id.index()).ok_or(PipelineError::NotFound(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> PipelineResult<&mut NodeSlot> {
        self.slots.get_mut(id.index()).ok_or(PipelineError::NotFound(id))
    }

    /// Slot of a node that must not be released.
    pub(crate) fn live_slot(&self, id: NodeId) -> PipelineResult<&NodeSlot> {
        let slot = self.slot(id)?;
        if slot.entry.is_released() {
            return Err(PipelineError::Released(id));
        }
        Ok(slot)
    }

    pub(crate) fn children(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        Ok(self.slot(id)?.downstream.children().to_vec())
    }

    /// Whether `candidate` is `node` or one of its ancestors.
    pub(crate) fn is_ancestor_or_self(&self, candidate: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            steps += 1;
            if steps > self.slots.len() {
                break;
            }
            current = self.slots.get(id.index()).and_then(|s| s.upstream);
        }
        false
    }

    /// Attach `child` below `parent`.
    ///
    /// A linear parent's previous child is detached and returned. `child` is
    /// first taken away from whichever parent held it, and receives the
    /// parent's size.
    pub(crate) fn link(&mut self, parent: NodeId, child: NodeId) -> PipelineResult<Option<NodeId>> {
        self.live_slot(parent)?;
        self.live_slot(child)?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(PipelineError::CycleDetected { parent, child });
        }

        if let Some(previous_parent) = self.slot(child)?.upstream {
            if previous_parent != parent {
                self.unlink(previous_parent, child);
            }
        }

        let replaced = {
            let slot = self.slot_mut(parent)?;
            match &mut slot.downstream {
                NodeKind::Linear(current) => match current.replace(child) {
                    Some(old) if old != child => Some(old),
                    _ => None,
                },
                NodeKind::Branch(children) => {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                    None
                }
            }
        };

        if let Some(old) = replaced {
            if let Ok(old_slot) = self.slot_mut(old) {
                if old_slot.upstream == Some(parent) {
                    old_slot.upstream = None;
                }
            }
        }

        self.slot_mut(child)?.upstream = Some(parent);

        let (width, height) = {
            let slot = self.slot(parent)?;
            (slot.width, slot.height)
        };
        if width > 0 && height > 0 {
            self.propagate_size(child, width, height);
        }
        Ok(replaced)
    }

    /// Remove `child` from `parent`'s downstream. Returns whether it was there.
    pub(crate) fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        let removed = match self.slots.get_mut(parent.index()).map(|s| &mut s.downstream) {
            Some(NodeKind::Linear(current)) if *current == Some(child) => {
                *current = None;
                true
            }
            Some(NodeKind::Branch(children)) => {
                let before = children.len();
                children.retain(|c| *c != child);
                children.len() != before
            }
            _ => false,
        };
        if let Some(slot) = self.slots.get_mut(child.index()) {
            if slot.upstream == Some(parent) {
                slot.upstream = None;
            }
        }
        removed
    }

    /// Detach every child of `parent`, returning them.
    pub(crate) fn clear_downstream(&mut self, parent: NodeId) -> PipelineResult<Vec<NodeId>> {
        let children = {
            let slot = self.slot_mut(parent)?;
            let children = slot.downstream.children().to_vec();
            slot.downstream = slot.downstream.empty_like();
            children
        };
        for child in &children {
            if let Some(slot) = self.slots.get_mut(child.index()) {
                if slot.upstream == Some(parent) {
                    slot.upstream = None;
                }
            }
        }
        Ok(children)
    }

    /// `root` and everything below it, depth-first, each node once.
    pub(crate) fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(slot) = self.slots.get(id.index()) else {
                continue;
            };
            out.push(id);
            stack.extend(slot.downstream.children().iter().rev());
        }
        out
    }

    /// Set the size of `from` and its subtree, queueing resize hooks.
    fn propagate_size(&mut self, from: NodeId, width: u32, height: u32) {
        for id in self.descendants(from) {
            let slot = &mut self.slots[id.index()];
            if slot.entry.is_released() || (slot.width == width && slot.height == height) {
                continue;
            }
            slot.width = width;
            slot.height = height;
            self.pending_resizes
                .push((slot.entry.clone(), width, height));
        }
    }

    /// Walk upstream links to the head of the chain containing `node`.
    pub(crate) fn find_first(&self, node: NodeId) -> NodeId {
        let mut current = node;
        let mut steps = 0;
        while let Some(up) = self.slots.get(current.index()).and_then(|s| s.upstream) {
            if up.index() >= self.slots.len() || steps > self.slots.len() {
                break;
            }
            current = up;
            steps += 1;
        }
        current
    }

    /// Linear sequence from `root`, following single downstream links.
    ///
    /// Stops at a node with no child or with several (a fanning branch).
    pub(crate) fn walk(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![root];
        let mut seen: HashSet<NodeId> = out.iter().copied().collect();
        let mut current = root;
        while let Some(slot) = self.slots.get(current.index()) {
            match slot.downstream.children() {
                [next] if seen.insert(*next) => {
                    out.push(*next);
                    current = *next;
                }
                _ => break,
            }
        }
        out
    }

    /// Check every parent/child pair below `root`, repairing mismatched
    /// back-references. Returns false if anything needed repair.
    pub(crate) fn validate_from(&mut self, root: NodeId) -> bool {
        let mut consistent = true;
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(parent) = stack.pop() {
            if !seen.insert(parent) {
                tracing::warn!("Node {} reachable more than once from {}", parent, root);
                consistent = false;
                continue;
            }
            let children = match self.slots.get(parent.index()) {
                Some(slot) => slot.downstream.children().to_vec(),
                None => continue,
            };
            for child in children {
                let Some(slot) = self.slots.get_mut(child.index()) else {
                    tracing::warn!("Node {} links to missing child {}", parent, child);
                    consistent = false;
                    continue;
                };
                if slot.upstream != Some(parent) {
                    tracing::warn!(
                        "Repaired upstream of {}: expected {}, found {:?}",
                        child,
                        parent,
                        slot.upstream
                    );
                    slot.upstream = Some(parent);
                    consistent = false;
                }
                stack.push(child);
            }
        }
        consistent
    }
}

struct GraphInner {
    topology: Mutex<Topology>,
    worker: CallbackWorker,
}

/// Cloneable handle to a pipeline graph.
#[derive(Clone)]
pub struct PipelineGraph {
    inner: Arc<GraphInner>,
}

impl PipelineGraph {
    /// Create an empty graph with its callback worker.
    pub fn new() -> PipelineResult<Self> {
        let worker = CallbackWorker::spawn("texflow-callbacks")?;
        Ok(Self {
            inner: Arc::new(GraphInner {
                topology: Mutex::new(Topology {
                    slots: Vec::new(),
                    pending_resizes: Vec::new(),
                }),
                worker,
            }),
        })
    }

    // ── Arena ──

    /// Add a detached node holding `stage`. Branch stages get a child set.
    pub fn add_node(&self, stage: impl Into<AnyStage>) -> NodeId {
        let stage = stage.into();
        let kind = stage.kind();
        let name = stage.name().to_string();
        let mut topo = self.inner.topology.lock();
        let id = NodeId(topo.slots.len() as u32);
        topo.slots.push(NodeSlot {
            entry: Arc::new(NodeEntry {
                kind,
                name,
                stage: Mutex::new(stage),
                released: AtomicBool::new(false),
                on_error: Mutex::new(None),
            }),
            upstream: None,
            downstream: if kind.is_branch() {
                NodeKind::Branch(Vec::new())
            } else {
                NodeKind::Linear(None)
            },
            width: 0,
            height: 0,
        });
        tracing::debug!("Added {} node {}", kind, id);
        id
    }

    /// Number of nodes ever added, released ones included.
    pub fn node_count(&self) -> usize {
        self.inner.topology.lock().len()
    }

    /// Register the callback receiving this node's per-frame failures.
    pub fn set_error_callback<F>(&self, node: NodeId, callback: F) -> PipelineResult<()>
    where
        F: Fn(&StageFailure) + Send + Sync + 'static,
    {
        let entry = self.entry(node)?;
        *entry.on_error.lock() = Some(Arc::new(callback));
        Ok(())
    }

    /// Run `f` with exclusive access to the node's stage.
    pub fn with_stage<R>(&self, node: NodeId, f: impl FnOnce(&mut AnyStage) -> R) -> PipelineResult<R> {
        let entry = self.entry(node)?;
        if entry.is_released() {
            return Err(PipelineError::Released(node));
        }
        let mut stage = entry.stage.lock();
        Ok(f(&mut stage))
    }

    pub fn name(&self, node: NodeId) -> PipelineResult<String> {
        Ok(self.entry(node)?.name.clone())
    }

    pub fn stage_kind(&self, node: NodeId) -> PipelineResult<StageKind> {
        Ok(self.entry(node)?.kind)
    }

    /// Worker that runs asynchronous callbacks for this graph.
    pub fn callbacks(&self) -> CallbackSender {
        self.inner.worker.sender().clone()
    }

    /// Block until all callbacks posted so far have run.
    pub fn flush_callbacks(&self) {
        self.inner.worker.sender().flush();
    }

    // ── Links ──

    /// Record `node`'s back-reference.
    pub fn set_upstream(&self, node: NodeId, upstream: Option<NodeId>) -> PipelineResult<()> {
        self.with_topology(|topo| {
            topo.live_slot(node)?;
            if let Some(up) = upstream {
                topo.slot(up)?;
            }
            topo.slot_mut(node)?.upstream = upstream;
            Ok(())
        })
    }

    /// Set the downstream of `node`.
    ///
    /// Linear nodes replace their child (`None` detaches it). Branch nodes
    /// add `Some` to their set and clear the whole set on `None`.
    pub fn set_downstream(&self, node: NodeId, downstream: Option<NodeId>) -> PipelineResult<()> {
        self.with_topology(|topo| {
            topo.live_slot(node)?;
            match downstream {
                Some(child) => {
                    if let Some(old) = topo.link(node, child)? {
                        tracing::debug!("{} replaced downstream {} with {}", node, old, child);
                    }
                }
                None => {
                    topo.clear_downstream(node)?;
                }
            }
            Ok(())
        })
    }

    /// Add `child` to a branch's set; on a linear node, same as `set_downstream`.
    pub fn add_downstream(&self, node: NodeId, child: NodeId) -> PipelineResult<()> {
        self.with_topology(|topo| topo.link(node, child).map(|_| ()))
    }

    /// Drop `child` from `node`'s downstream. Returns whether it was linked.
    pub fn remove_downstream(&self, node: NodeId, child: NodeId) -> PipelineResult<bool> {
        self.with_topology(|topo| {
            topo.live_slot(node)?;
            topo.slot(child)?;
            Ok(topo.unlink(node, child))
        })
    }

    pub fn upstream(&self, node: NodeId) -> PipelineResult<Option<NodeId>> {
        Ok(self.inner.topology.lock().slot(node)?.upstream)
    }

    pub fn downstream(&self, node: NodeId) -> PipelineResult<Vec<NodeId>> {
        self.inner.topology.lock().children(node)
    }

    pub fn kind(&self, node: NodeId) -> PipelineResult<NodeKind> {
        Ok(self.inner.topology.lock().slot(node)?.downstream.clone())
    }

    // ── Lifecycle ──

    pub fn is_released(&self, node: NodeId) -> PipelineResult<bool> {
        Ok(self.entry(node)?.is_released())
    }

    /// Not released, and linked to an upstream or (source node) a downstream.
    pub fn is_active(&self, node: NodeId) -> PipelineResult<bool> {
        let topo = self.inner.topology.lock();
        let slot = topo.slot(node)?;
        Ok(!slot.entry.is_released()
            && (slot.upstream.is_some() || !slot.downstream.children().is_empty()))
    }

    pub fn size(&self, node: NodeId) -> PipelineResult<(u32, u32)> {
        let topo = self.inner.topology.lock();
        let slot = topo.slot(node)?;
        Ok((slot.width, slot.height))
    }

    /// Resize `node` and everything below it.
    pub fn resize(&self, node: NodeId, width: u32, height: u32) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "node size must be positive, got {}x{}",
                width, height
            )));
        }
        self.with_topology(|topo| {
            topo.live_slot(node)?;
            topo.propagate_size(node, width, height);
            Ok(())
        })
    }

    /// Let `root` and everything below it drop cached GPU resources.
    pub fn refresh(&self, root: NodeId) -> PipelineResult<()> {
        let entries: Vec<Arc<NodeEntry>> = {
            let topo = self.inner.topology.lock();
            topo.live_slot(root)?;
            topo.descendants(root)
                .into_iter()
                .filter_map(|id| topo.slot(id).ok().map(|s| s.entry.clone()))
                .collect()
        };
        for entry in entries {
            if entry.is_released() {
                continue;
            }
            entry.stage.lock().on_refresh();
        }
        tracing::trace!("Refreshed chain from {}", root);
        Ok(())
    }

    /// Release `node` and everything it owns. Idempotent.
    ///
    /// The node is detached from its upstream first, so the rest of the
    /// chain stops delivering to it.
    pub fn release(&self, node: NodeId) -> PipelineResult<()> {
        let entries = {
            let mut topo = self.inner.topology.lock();
            if topo.slot(node)?.entry.is_released() {
                return Ok(());
            }
            if let Some(up) = topo.slot(node)?.upstream {
                topo.unlink(up, node);
            }
            let ids = topo.descendants(node);
            let mut entries = Vec::with_capacity(ids.len());
            for id in ids {
                let slot = &mut topo.slots[id.index()];
                slot.entry.released.store(true, Ordering::Release);
                slot.upstream = None;
                slot.downstream = slot.downstream.empty_like();
                entries.push(slot.entry.clone());
            }
            entries
        };

        tracing::debug!("Released {} node(s) from {}", entries.len(), node);
        for entry in entries {
            entry.stage.lock().on_release();
        }
        Ok(())
    }

    /// Take `node` out of its chain, keeping the rest connected where possible.
    ///
    /// The chain is validated from its original head afterwards and
    /// refreshed from the head.
    pub fn remove(&self, node: NodeId) -> PipelineResult<RemoveOutcome> {
        let (head, outcome) = self.with_topology(|topo| {
            topo.live_slot(node)?;
            let head = topo.find_first(node);
            let upstream = topo.slot(node)?.upstream;

            let Some(up) = upstream else {
                return Ok((head, RemoveOutcome::Detached));
            };
            let up_kind = topo.slot(up)?.downstream.clone();

            let outcome = if up_kind.is_branch() {
                topo.unlink(up, node);
                RemoveOutcome::LeftBranch
            } else {
                let children = topo.children(node)?;
                if children.len() <= 1 {
                    if up_kind.children().contains(&node) {
                        topo.clear_downstream(node)?;
                        topo.unlink(up, node);
                        if let Some(&next) = children.first() {
                            topo.link(up, next)?;
                        }
                    } else {
                        // Stale back-reference: nothing to splice
                        tracing::warn!("{} did not hold {} as downstream", up, node);
                        topo.slot_mut(node)?.upstream = None;
                    }
                    RemoveOutcome::Spliced
                } else {
                    topo.unlink(up, node);
                    tracing::warn!(
                        "Removed branch {} with {} children; {} left without downstream",
                        node,
                        children.len(),
                        up
                    );
                    RemoveOutcome::Orphaned { children }
                }
            };
            Ok((head, outcome))
        })?;

        tracing::debug!("Removed {} from chain headed by {}: {:?}", node, head, outcome);
        if !chain::validate(self, head)? {
            tracing::warn!("Chain headed by {} needed repair after removing {}", head, node);
        }
        self.refresh(head)?;
        Ok(outcome)
    }

    // ── Frames ──

    /// Deliver `frame` to `root` and on down the chain.
    ///
    /// Released or unknown nodes are skipped silently; stage failures are
    /// reported through the node's error callback and the received frame is
    /// forwarded in place of the failed stage's output.
    pub fn on_frame(&self, root: NodeId, frame: &Frame) {
        self.deliver(root, frame);
    }

    fn deliver(&self, node: NodeId, frame: &Frame) {
        let (entry, width, height, children) = {
            let topo = self.inner.topology.lock();
            match topo.slot(node) {
                Ok(slot) if !slot.entry.is_released() => (
                    slot.entry.clone(),
                    slot.width,
                    slot.height,
                    slot.downstream.children().to_vec(),
                ),
                _ => return,
            }
        };

        let result = {
            let mut stage = entry.stage.lock();
            if entry.is_released() {
                return;
            }
            let mut ctx = StageContext {
                node,
                width,
                height,
                callbacks: self.inner.worker.sender(),
            };
            stage.on_frame(&mut ctx, frame)
        };

        let out = match result {
            Ok(FrameAction::Forward) => *frame,
            Ok(FrameAction::Replace(rendered)) => rendered,
            Ok(FrameAction::Swallow) => return,
            Err(error) => {
                self.report_failure(node, &entry, error);
                *frame
            }
        };

        for child in children {
            self.deliver(child, &out);
        }
    }

    fn report_failure(&self, node: NodeId, entry: &NodeEntry, error: StageError) {
        tracing::warn!("Stage '{}' on {} failed: {}", entry.name, node, error);
        let Some(callback) = entry.on_error.lock().clone() else {
            return;
        };
        let failure = StageFailure {
            node,
            stage: entry.name.clone(),
            error,
            at: chrono::Utc::now(),
        };
        self.inner.worker.sender().post(move || callback(&failure));
    }

    // ── Internals ──

    fn entry(&self, node: NodeId) -> PipelineResult<Arc<NodeEntry>> {
        Ok(self.inner.topology.lock().slot(node)?.entry.clone())
    }

    pub(crate) fn lock_topology(&self) -> MutexGuard<'_, Topology> {
        self.inner.topology.lock()
    }

    /// Run a read/modify/write sequence under the topology lock, then
    /// deliver any resize hooks it produced.
    pub(crate) fn with_topology<R>(
        &self,
        f: impl FnOnce(&mut Topology) -> PipelineResult<R>,
    ) -> PipelineResult<R> {
        let (result, resizes) = {
            let mut topo = self.inner.topology.lock();
            let result = f(&mut topo);
            (result, std::mem::take(&mut topo.pending_resizes))
        };
        for (entry, width, height) in resizes {
            if !entry.is_released() {
                entry.stage.lock().on_resize(width, height);
            }
        }
        result
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::{BranchStage, ProxyStage};
    use crate::types::TextureId;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        seen: Arc<AtomicUsize>,
        resized: Arc<Mutex<Option<(u32, u32)>>>,
        fail: bool,
    }

    impl crate::pipeline::node::Stage for Counting {
        fn name(&self) -> &str {
            "Counting"
        }

        fn on_frame(
            &mut self,
            _ctx: &mut StageContext,
            _frame: &Frame,
        ) -> Result<FrameAction, StageError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StageError::Other("boom".into()))
            } else {
                Ok(FrameAction::Forward)
            }
        }

        fn on_resize(&mut self, width: u32, height: u32) {
            *self.resized.lock() = Some((width, height));
        }
    }

    fn counting(graph: &PipelineGraph, fail: bool) -> (NodeId, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let id = graph.add_node(AnyStage::custom(Counting {
            seen: seen.clone(),
            resized: Arc::new(Mutex::new(None)),
            fail,
        }));
        (id, seen)
    }

    fn frame() -> Frame {
        Frame::new(TextureId(1), 640, 480).unwrap()
    }

    #[test]
    fn test_set_downstream_links_both_ways() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        graph.set_downstream(a, Some(b)).unwrap();

        assert_eq!(graph.downstream(a).unwrap(), vec![b]);
        assert_eq!(graph.upstream(b).unwrap(), Some(a));
        assert!(graph.is_active(a).unwrap());
        assert!(graph.is_active(b).unwrap());
    }

    #[test]
    fn test_set_downstream_replaces_and_clears_old_back_reference() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        let c = graph.add_node(ProxyStage::new());
        graph.set_downstream(a, Some(b)).unwrap();
        graph.set_downstream(a, Some(c)).unwrap();

        assert_eq!(graph.kind(a).unwrap(), NodeKind::Linear(Some(c)));
        assert_eq!(graph.upstream(b).unwrap(), None);
        assert_eq!(graph.upstream(c).unwrap(), Some(a));
    }

    #[test]
    fn test_branch_set_downstream_adds_and_none_clears() {
        let graph = PipelineGraph::new().unwrap();
        let branch = graph.add_node(BranchStage::new());
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        graph.set_downstream(branch, Some(a)).unwrap();
        graph.set_downstream(branch, Some(b)).unwrap();
        graph.set_downstream(branch, Some(b)).unwrap();
        assert_eq!(graph.kind(branch).unwrap(), NodeKind::Branch(vec![a, b]));

        graph.set_downstream(branch, None).unwrap();
        assert!(graph.downstream(branch).unwrap().is_empty());
        assert_eq!(graph.upstream(a).unwrap(), None);
    }

    #[test]
    fn test_cycle_rejected() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        graph.set_downstream(a, Some(b)).unwrap();

        assert_eq!(
            graph.set_downstream(b, Some(a)),
            Err(PipelineError::CycleDetected { parent: b, child: a })
        );
        assert!(graph.set_downstream(a, Some(a)).is_err());
    }

    #[test]
    fn test_size_propagates_on_link_and_resize() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let resized = Arc::new(Mutex::new(None));
        let b = graph.add_node(AnyStage::custom(Counting {
            seen: Arc::new(AtomicUsize::new(0)),
            resized: resized.clone(),
            fail: false,
        }));
        graph.resize(a, 1280, 720).unwrap();
        graph.set_downstream(a, Some(b)).unwrap();
        assert_eq!(graph.size(b).unwrap(), (1280, 720));
        assert_eq!(*resized.lock(), Some((1280, 720)));

        graph.resize(a, 640, 480).unwrap();
        assert_eq!(graph.size(b).unwrap(), (640, 480));
        assert_eq!(*resized.lock(), Some((640, 480)));

        assert!(graph.resize(a, 0, 480).is_err());
    }

    #[test]
    fn test_release_cascades_and_is_idempotent() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        let c = graph.add_node(ProxyStage::new());
        graph.set_downstream(a, Some(b)).unwrap();
        graph.set_downstream(b, Some(c)).unwrap();

        graph.release(b).unwrap();
        graph.release(b).unwrap();
        assert!(graph.is_released(b).unwrap());
        assert!(graph.is_released(c).unwrap());
        assert!(!graph.is_released(a).unwrap());
        assert!(graph.downstream(a).unwrap().is_empty());

        assert_eq!(
            graph.set_downstream(b, None),
            Err(PipelineError::Released(b))
        );
        assert_eq!(graph.resize(c, 10, 10), Err(PipelineError::Released(c)));
        assert_eq!(graph.remove(b), Err(PipelineError::Released(b)));
    }

    #[test]
    fn test_frames_reach_every_branch_child() {
        let graph = PipelineGraph::new().unwrap();
        let branch = graph.add_node(BranchStage::new());
        let (a, seen_a) = counting(&graph, false);
        let (b, seen_b) = counting(&graph, false);
        graph.add_downstream(branch, a).unwrap();
        graph.add_downstream(branch, b).unwrap();

        for _ in 0..3 {
            graph.on_frame(branch, &frame());
        }
        assert_eq!(seen_a.load(Ordering::SeqCst), 3);
        assert_eq!(seen_b.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failing_stage_does_not_stop_delivery() {
        let graph = PipelineGraph::new().unwrap();
        let branch = graph.add_node(BranchStage::new());
        let (bad, _) = counting(&graph, true);
        let (after_bad, seen_after) = counting(&graph, false);
        let (sibling, seen_sibling) = counting(&graph, false);
        graph.add_downstream(branch, bad).unwrap();
        graph.add_downstream(branch, sibling).unwrap();
        graph.set_downstream(bad, Some(after_bad)).unwrap();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        graph
            .set_error_callback(bad, move |f: &StageFailure| sink.lock().push(f.node))
            .unwrap();

        graph.on_frame(branch, &frame());
        graph.flush_callbacks();

        assert_eq!(seen_after.load(Ordering::SeqCst), 1);
        assert_eq!(seen_sibling.load(Ordering::SeqCst), 1);
        assert_eq!(*failures.lock(), vec![bad]);
    }

    #[test]
    fn test_released_node_gets_no_frames() {
        let graph = PipelineGraph::new().unwrap();
        let (a, seen) = counting(&graph, false);
        graph.release(a).unwrap();
        graph.on_frame(a, &frame());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_from_branch_leaves_siblings() {
        let graph = PipelineGraph::new().unwrap();
        let branch = graph.add_node(BranchStage::new());
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        let c = graph.add_node(ProxyStage::new());
        for child in [a, b, c] {
            graph.add_downstream(branch, child).unwrap();
        }

        assert_eq!(graph.remove(b).unwrap(), RemoveOutcome::LeftBranch);
        assert_eq!(graph.downstream(branch).unwrap(), vec![a, c]);
        assert_eq!(graph.upstream(a).unwrap(), Some(branch));
        assert_eq!(graph.upstream(c).unwrap(), Some(branch));
        assert_eq!(graph.upstream(b).unwrap(), None);
    }

    #[test]
    fn test_remove_multi_child_branch_orphans() {
        let graph = PipelineGraph::new().unwrap();
        let head = graph.add_node(ProxyStage::new());
        let branch = graph.add_node(BranchStage::new());
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        graph.set_downstream(head, Some(branch)).unwrap();
        graph.add_downstream(branch, a).unwrap();
        graph.add_downstream(branch, b).unwrap();

        assert_eq!(
            graph.remove(branch).unwrap(),
            RemoveOutcome::Orphaned {
                children: vec![a, b]
            }
        );
        assert!(graph.downstream(head).unwrap().is_empty());
        assert_eq!(graph.upstream(a).unwrap(), Some(branch));
        assert_eq!(graph.upstream(b).unwrap(), Some(branch));
    }

    #[test]
    fn test_remove_head_is_detached() {
        let graph = PipelineGraph::new().unwrap();
        let a = graph.add_node(ProxyStage::new());
        let b = graph.add_node(ProxyStage::new());
        graph.set_downstream(a, Some(b)).unwrap();
        assert_eq!(graph.remove(a).unwrap(), RemoveOutcome::Detached);
        assert_eq!(graph.downstream(a).unwrap(), vec![b]);
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let graph = PipelineGraph::new().unwrap();
        assert_eq!(
            graph.upstream(NodeId(9)),
            Err(PipelineError::NotFound(NodeId(9)))
        );
        // Hot path never errors
        graph.on_frame(NodeId(9), &frame());
    }
}
