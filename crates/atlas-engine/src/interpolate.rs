//! Linear interpolation between two frames for timeline scrubbing. Pure.

use std::collections::{BTreeMap, BTreeSet};

use crate::frame::{FrameNode, FramePayload, FrameStats};

/// Interpolate node positions between `a` and `b` at a clamped progress in
/// `[0, 1]`. Nodes present in both frames lerp per axis; nodes only in `a`
/// freeze where they were (fade-out); nodes only in `b` sit at their target.
/// The edge set comes from whichever frame `progress` is closer to, and the
/// stats are recomputed from the interpolated node set.
pub fn interpolate(a: &FramePayload, b: &FramePayload, progress: f64) -> FramePayload {
    let progress = progress.clamp(0.0, 1.0);

    let a_nodes: BTreeMap<_, &FrameNode> = a.nodes.iter().map(|n| (&n.id, n)).collect();
    let b_ids: BTreeSet<_> = b.nodes.iter().map(|n| &n.id).collect();

    let mut nodes: Vec<FrameNode> = Vec::with_capacity(b.nodes.len());
    for target in &b.nodes {
        let mut node = target.clone();
        if let Some(origin) = a_nodes.get(&target.id) {
            node.x = origin.x + (target.x - origin.x) * progress;
            node.y = origin.y + (target.y - origin.y) * progress;
            node.z = origin.z + (target.z - origin.z) * progress;
        }
        nodes.push(node);
    }
    // Fading-out nodes keep their last position.
    for origin in &a.nodes {
        if !b_ids.contains(&origin.id) {
            nodes.push(origin.clone());
        }
    }

    let nearest = if progress < 0.5 { a } else { b };
    let edges = nearest.edges.clone();

    let communities: Vec<u32> = nodes
        .iter()
        .map(|n| n.community)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let stats = FrameStats {
        node_count: nodes.len() as u64,
        edge_count: edges.len() as u64,
        community_count: communities.len() as u64,
        new_followers: nodes.iter().filter(|n| n.is_new).count() as u64,
    };

    FramePayload {
        interval_id: nearest.interval_id,
        timeframe_days: nearest.timeframe_days,
        timestamp: nearest.timestamp,
        ego_id: nearest.ego_id.clone(),
        nodes,
        edges,
        communities,
        stats,
    }
}
