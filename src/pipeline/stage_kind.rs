//! Stage kind enumeration.
//!
//! Every node in a graph carries the kind of the stage it wraps. Chain
//! lookups (`find_by_kind`) and snapshots use it; it never changes for the
//! lifetime of a node.

use serde::{Deserialize, Serialize};

/// Kinds of stage a node can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Forwards every frame unchanged.
    Proxy,
    /// Fans frames out to a set of downstream nodes.
    Branch,
    /// Periodically captures still images.
    Capture,
    /// Applies a frame effect.
    Effect,
    /// Composites a mask over the frame.
    Mask,
    /// Draws a histogram overlay.
    Histogram,
    /// Draws frames into an encoder input surface.
    Surface,
    /// Fans frames out to render targets through a distribution engine.
    Distributor,
    /// User-supplied stage.
    Custom,
}

impl StageKind {
    /// Get the display name for this stage kind.
    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::Proxy => "Proxy",
            StageKind::Branch => "Branch",
            StageKind::Capture => "Capture",
            StageKind::Effect => "Effect",
            StageKind::Mask => "Mask",
            StageKind::Histogram => "Histogram",
            StageKind::Surface => "Surface",
            StageKind::Distributor => "Distributor",
            StageKind::Custom => "Custom",
        }
    }

    /// Get all stage kinds.
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::Proxy,
            StageKind::Branch,
            StageKind::Capture,
            StageKind::Effect,
            StageKind::Mask,
            StageKind::Histogram,
            StageKind::Surface,
            StageKind::Distributor,
            StageKind::Custom,
        ]
    }

    /// Check if this stage kind ends in an output sink.
    pub fn is_sink(&self) -> bool {
        matches!(self, StageKind::Surface | StageKind::Distributor)
    }

    /// Check if nodes of this kind own a set of downstream nodes.
    pub fn is_branch(&self) -> bool {
        matches!(self, StageKind::Branch)
    }

    /// Get a detailed description of what this stage does.
    pub fn description(&self) -> &'static str {
        match self {
            StageKind::Proxy =>
                "Forwards frames unchanged.\n\
                 Placeholder or splice point in a chain.",

            StageKind::Branch =>
                "Forwards each frame to every child.\n\
                 No throttling; children run in order.",

            StageKind::Capture =>
                "Captures still images from the stream.\n\
                 Configure count and minimum interval.",

            StageKind::Effect =>
                "Applies a frame effect.\n\
                 Pass-through or render-then-forward per mode.",

            StageKind::Mask =>
                "Composites a mask texture over frames.\n\
                 Forwards unchanged while no mask is set.",

            StageKind::Histogram =>
                "Draws a luminance histogram overlay.\n\
                 Can be toggled without relinking.",

            StageKind::Surface =>
                "Draws frames into an encoder input.\n\
                 Optional frame rate limit.",

            StageKind::Distributor =>
                "Fans frames out to render targets.\n\
                 Per-target enable, mirror and frame rate limit.",

            StageKind::Custom => "User-supplied stage.",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_kinds() {
        let sinks: Vec<_> = StageKind::all().iter().filter(|k| k.is_sink()).collect();
        assert_eq!(sinks, vec![&StageKind::Surface, &StageKind::Distributor]);
    }

    #[test]
    fn test_only_branch_is_branch() {
        for kind in StageKind::all() {
            assert_eq!(kind.is_branch(), *kind == StageKind::Branch);
        }
    }
}
