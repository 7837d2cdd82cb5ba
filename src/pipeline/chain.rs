//! Chain operations: stateless algorithms over a graph.
//!
//! Every function takes the graph handle and a node, and performs its whole
//! read/modify/write sequence under one topology lock.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::{NodeKind, PipelineGraph, RemoveOutcome, Topology};
use crate::pipeline::id::NodeId;
use crate::pipeline::stage_kind::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Attach `node` after the current tail of the chain starting at `root`.
pub fn append(graph: &PipelineGraph, root: NodeId, node: NodeId) -> PipelineResult<()> {
    graph.with_topology(|topo| {
        topo.live_slot(root)?;
        let tail = find_last_in(topo, root);
        topo.link(tail, node)?;
        tracing::debug!("Appended {} after {}", node, tail);
        Ok(())
    })
}

/// Splice `node` (and whatever it already leads to) right after `target`.
///
/// The previous downstream of `target` is re-attached to the tail of the
/// inserted sub-chain. Inserting below a branch adds to its set.
pub fn insert(graph: &PipelineGraph, target: NodeId, node: NodeId) -> PipelineResult<()> {
    graph.with_topology(|topo| {
        topo.live_slot(target)?;
        topo.live_slot(node)?;
        if topo.is_ancestor_or_self(node, target) {
            return Err(PipelineError::CycleDetected {
                parent: target,
                child: node,
            });
        }

        match topo.slot(target)?.downstream.clone() {
            NodeKind::Branch(_) | NodeKind::Linear(None) => {
                topo.link(target, node)?;
            }
            NodeKind::Linear(Some(previous)) if previous == node => {}
            NodeKind::Linear(Some(previous)) => {
                if topo.descendants(node).contains(&previous) {
                    return Err(PipelineError::InvalidArgument(format!(
                        "{} already leads to {}, the downstream of {}",
                        node, previous, target
                    )));
                }
                let tail = find_last_in(topo, node);
                topo.unlink(target, previous);
                topo.link(target, node)?;
                topo.link(tail, previous)?;
            }
        }
        tracing::debug!("Inserted {} after {}", node, target);
        Ok(())
    })
}

/// Take `node` out of its chain. See [`PipelineGraph::remove`].
pub fn remove(graph: &PipelineGraph, node: NodeId) -> PipelineResult<RemoveOutcome> {
    graph.remove(node)
}

/// Head of the chain containing `node`.
pub fn find_first(graph: &PipelineGraph, node: NodeId) -> PipelineResult<NodeId> {
    let topo = graph.lock_topology();
    topo.slot(node)?;
    Ok(topo.find_first(node))
}

/// Tail of the linear chain starting at `root`.
pub fn find_last(graph: &PipelineGraph, root: NodeId) -> PipelineResult<NodeId> {
    let topo = graph.lock_topology();
    topo.slot(root)?;
    Ok(find_last_in(&topo, root))
}

/// First node of `kind` at or below `root`, depth-first.
pub fn find_by_kind(
    graph: &PipelineGraph,
    root: NodeId,
    kind: StageKind,
) -> PipelineResult<Option<NodeId>> {
    let topo = graph.lock_topology();
    topo.slot(root)?;
    Ok(topo
        .descendants(root)
        .into_iter()
        .find(|id| topo.slot(*id).map(|s| s.entry.kind == kind).unwrap_or(false)))
}

/// Linear sequence of nodes from `root`.
pub fn walk(graph: &PipelineGraph, root: NodeId) -> PipelineResult<Vec<NodeId>> {
    let topo = graph.lock_topology();
    topo.slot(root)?;
    Ok(topo.walk(root))
}

/// Check and repair back-references below `root`.
///
/// Returns false when anything was repaired. Never fails on inconsistency.
pub fn validate(graph: &PipelineGraph, root: NodeId) -> PipelineResult<bool> {
    let mut topo = graph.lock_topology();
    topo.slot(root)?;
    Ok(topo.validate_from(root))
}

/// One-line rendering of the chain below `root`.
///
/// `Proxy#0 -> Branch#1 { Effect#2 | Surface#3 }`
pub fn describe(graph: &PipelineGraph, root: NodeId) -> PipelineResult<String> {
    let topo = graph.lock_topology();
    topo.slot(root)?;
    let mut out = String::new();
    let mut seen = HashSet::new();
    describe_node(&topo, root, &mut out, &mut seen);
    Ok(out)
}

fn describe_node(topo: &Topology, id: NodeId, out: &mut String, seen: &mut HashSet<NodeId>) {
    let Ok(slot) = topo.slot(id) else {
        let _ = write!(out, "<missing {}>", id.0);
        return;
    };
    let _ = write!(out, "{}#{}", slot.entry.name, id.0);
    if slot.entry.is_released() {
        out.push_str(" (released)");
    }
    if !seen.insert(id) {
        out.push_str(" <cycle>");
        return;
    }
    match &slot.downstream {
        NodeKind::Linear(Some(next)) => {
            out.push_str(" -> ");
            describe_node(topo, *next, out, seen);
        }
        NodeKind::Branch(children) if !children.is_empty() => {
            out.push_str(" { ");
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push_str(" | ");
                }
                describe_node(topo, *child, out, seen);
            }
            out.push_str(" }");
        }
        _ => {}
    }
}

/// State of one node at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub kind: StageKind,
    pub branch: bool,
    pub upstream: Option<NodeId>,
    pub downstream: Vec<NodeId>,
    pub width: u32,
    pub height: u32,
    pub released: bool,
}

/// Serializable view of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub root: NodeId,
    pub taken_at: DateTime<Utc>,
    pub nodes: Vec<NodeSnapshot>,
}

impl ChainSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Snapshot of `root` and everything below it.
pub fn snapshot(graph: &PipelineGraph, root: NodeId) -> PipelineResult<ChainSnapshot> {
    let topo = graph.lock_topology();
    topo.slot(root)?;
    let nodes = topo
        .descendants(root)
        .into_iter()
        .filter_map(|id| {
            let slot = topo.slot(id).ok()?;
            Some(NodeSnapshot {
                id,
                name: slot.entry.name.clone(),
                kind: slot.entry.kind,
                branch: slot.downstream.is_branch(),
                upstream: slot.upstream,
                downstream: slot.downstream.children().to_vec(),
                width: slot.width,
                height: slot.height,
                released: slot.entry.is_released(),
            })
        })
        .collect();
    Ok(ChainSnapshot {
        root,
        taken_at: Utc::now(),
        nodes,
    })
}

fn find_last_in(topo: &Topology, root: NodeId) -> NodeId {
    topo.walk(root).last().copied().unwrap_or(root)
}
