//! Importance scoring and graph pruning.

use std::collections::{BTreeMap, BTreeSet};

use atlas_core::AccountId;

use super::edges::GraphEdge;

/// Pruning limits; defaults per the rendering budget.
#[derive(Debug, Clone)]
pub struct FrameLimits {
    /// Nodes below this follower count are dropped as long-tail noise.
    pub min_followers: u64,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub max_edges_per_node: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            min_followers: 500,
            max_nodes: 2_000,
            max_edges: 12_000,
            max_edges_per_node: 50,
        }
    }
}

/// `importance = 0.7 × edge_score_norm + 0.3 × log1p(followers)_norm`.
pub fn importance_scores(
    followers: &BTreeMap<AccountId, u64>,
    edges: &[GraphEdge],
) -> BTreeMap<AccountId, f64> {
    let mut edge_scores: BTreeMap<&AccountId, f64> = BTreeMap::new();
    for edge in edges {
        *edge_scores.entry(&edge.src).or_default() += edge.weight;
        *edge_scores.entry(&edge.dst).or_default() += edge.weight;
    }

    let max_edge_score = edge_scores.values().copied().fold(0.0, f64::max).max(1.0);
    let max_follower_score = followers
        .values()
        .map(|f| (*f as f64).ln_1p())
        .fold(0.0, f64::max)
        .max(1.0);

    followers
        .iter()
        .map(|(id, count)| {
            let edge_norm = edge_scores.get(id).copied().unwrap_or(0.0) / max_edge_score;
            let follower_norm = (*count as f64).ln_1p() / max_follower_score;
            (id.clone(), 0.7 * edge_norm + 0.3 * follower_norm)
        })
        .collect()
}

/// Prune to the render budget, in order: follower floor, top nodes by
/// importance, edges with both endpoints retained, per-node edge cap,
/// global edge cap (highest weight first throughout).
///
/// The ego is exempt from the follower floor only; the frame is pinned on
/// it and must not lose it to the long-tail filter.
pub fn prune(
    followers: &BTreeMap<AccountId, u64>,
    importance: &BTreeMap<AccountId, f64>,
    edges: Vec<GraphEdge>,
    ego: &AccountId,
    limits: &FrameLimits,
) -> (Vec<AccountId>, Vec<GraphEdge>) {
    let mut candidates: Vec<&AccountId> = followers
        .iter()
        .filter(|(id, count)| *id == ego || limits.min_followers <= **count)
        .map(|(id, _)| id)
        .collect();

    candidates.sort_by(|a, b| {
        let ia = importance.get(*a).copied().unwrap_or(0.0);
        let ib = importance.get(*b).copied().unwrap_or(0.0);
        ib.partial_cmp(&ia)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    candidates.truncate(limits.max_nodes);

    let retained: BTreeSet<&AccountId> = candidates.iter().copied().collect();

    let mut surviving: Vec<GraphEdge> = edges
        .into_iter()
        .filter(|e| retained.contains(&e.src) && retained.contains(&e.dst))
        .collect();
    surviving.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (&a.src, &a.dst).cmp(&(&b.src, &b.dst)))
    });

    // Greedy, highest weight first: an edge survives only while both
    // endpoints are under the per-node cap and the global cap has room.
    let mut incident: BTreeMap<AccountId, usize> = BTreeMap::new();
    let mut kept = vec![];
    for edge in surviving {
        if limits.max_edges <= kept.len() {
            break;
        }
        let src_count = incident.get(&edge.src).copied().unwrap_or(0);
        let dst_count = incident.get(&edge.dst).copied().unwrap_or(0);
        if limits.max_edges_per_node <= src_count || limits.max_edges_per_node <= dst_count {
            continue;
        }
        *incident.entry(edge.src.clone()).or_default() += 1;
        *incident.entry(edge.dst.clone()).or_default() += 1;
        kept.push(edge);
    }

    (candidates.into_iter().cloned().collect(), kept)
}

#[cfg(test)]
mod tests {
    use atlas_core::EdgeKind;

    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    fn edge(src: &str, dst: &str, weight: f64) -> GraphEdge {
        GraphEdge {
            src: id(src),
            dst: id(dst),
            kind: EdgeKind::DirectInteraction,
            weight,
        }
    }

    #[test]
    fn importance_favors_connected_nodes() {
        let followers: BTreeMap<_, _> =
            [(id("a"), 100u64), (id("b"), 100), (id("c"), 100)].into();
        let edges = vec![edge("a", "b", 2.0), edge("b", "c", 3.0)];

        let importance = importance_scores(&followers, &edges);
        assert!(importance[&id("a")] < importance[&id("b")]);
        assert!(importance[&id("c")] < importance[&id("b")]);
    }

    #[test]
    fn follower_floor_drops_long_tail_but_not_ego() {
        let ego = id("ego");
        let followers: BTreeMap<_, _> =
            [(ego.clone(), 10u64), (id("big"), 1_000), (id("tiny"), 5)].into();
        let importance = importance_scores(&followers, &[]);

        let (nodes, _) = prune(&followers, &importance, vec![], &ego, &FrameLimits::default());
        assert!(nodes.contains(&ego));
        assert!(nodes.contains(&id("big")));
        assert!(!nodes.contains(&id("tiny")));
    }

    #[test]
    fn node_cap_keeps_most_important() {
        let ego = id("ego");
        let mut followers: BTreeMap<_, _> = [(ego.clone(), 1_000u64)].into();
        for i in 0..30 {
            followers.insert(id(&format!("n{i:02}")), 1_000 + i);
        }
        let importance = importance_scores(&followers, &[]);

        let limits = FrameLimits {
            max_nodes: 10,
            ..Default::default()
        };
        let (nodes, _) = prune(&followers, &importance, vec![], &ego, &limits);
        assert_eq!(nodes.len(), 10);

        // Every retained node is at least as important as every dropped one.
        let retained_min = nodes
            .iter()
            .map(|n| importance[n])
            .fold(f64::INFINITY, f64::min);
        let dropped_max = followers
            .keys()
            .filter(|k| !nodes.contains(k))
            .map(|k| importance[k])
            .fold(0.0, f64::max);
        assert!(dropped_max <= retained_min);
    }

    #[test]
    fn edges_restricted_to_retained_endpoints() {
        let ego = id("ego");
        let followers: BTreeMap<_, _> =
            [(ego.clone(), 1_000u64), (id("in"), 1_000), (id("out"), 10)].into();
        let importance = importance_scores(&followers, &[]);

        let edges = vec![edge("ego", "in", 1.0), edge("ego", "out", 5.0)];
        let (_, kept) = prune(&followers, &importance, edges, &ego, &FrameLimits::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dst, id("in"));
    }

    #[test]
    fn per_node_and_global_caps_hold() {
        let ego = id("ego");
        let mut followers: BTreeMap<_, _> = [(ego.clone(), 1_000u64)].into();
        let mut edges = vec![];
        for i in 0..20 {
            let node = format!("n{i:02}");
            followers.insert(id(&node), 1_000);
            edges.push(edge("ego", &node, 1.0 + i as f64));
        }
        let importance = importance_scores(&followers, &edges);

        let limits = FrameLimits {
            max_edges_per_node: 5,
            max_edges: 4,
            ..Default::default()
        };
        let (_, kept) = prune(&followers, &importance, edges, &ego, &limits);
        assert_eq!(kept.len(), 4, "global cap binds before per-node cap here");
        // Highest-weight edges first.
        assert!(kept.iter().all(|e| 16.0 <= e.weight));

        let limits = FrameLimits {
            max_edges_per_node: 5,
            max_edges: 12_000,
            ..Default::default()
        };
        let (_, kept) = prune(
            &followers,
            &importance,
            (0..20)
                .map(|i| edge("ego", &format!("n{i:02}"), 1.0 + i as f64))
                .collect(),
            &ego,
            &limits,
        );
        assert_eq!(kept.len(), 5, "ego saturates its per-node cap");
    }
}
