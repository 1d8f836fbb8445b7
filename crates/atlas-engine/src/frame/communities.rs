//! Label-propagation community detection on the weighted undirected
//! projection of the frame's edges.

use std::collections::BTreeMap;

use atlas_core::AccountId;

use super::edges::GraphEdge;

const MAX_PASSES: usize = 10;

/// Assign communities. Every node starts in its own community; each pass
/// reassigns every node (in sorted id order, for determinism) to the
/// community with the greatest incident edge-weight sum, smallest label
/// winning ties. Terminates after a full pass without reassignment, or
/// after ten passes.
///
/// Labels are then renumbered to `{0, 1, …}` in order of first appearance
/// over `node_order`; the ego's community, if the ego is present, always
/// renumbers to 0.
pub fn detect_communities(
    node_order: &[AccountId],
    edges: &[GraphEdge],
    ego: Option<&AccountId>,
) -> BTreeMap<AccountId, u32> {
    let mut labels: BTreeMap<&AccountId, usize> = node_order
        .iter()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();

    let mut neighbors: BTreeMap<&AccountId, Vec<(&AccountId, f64)>> = BTreeMap::new();
    for edge in edges {
        if !labels.contains_key(&edge.src) || !labels.contains_key(&edge.dst) {
            continue;
        }
        neighbors.entry(&edge.src).or_default().push((&edge.dst, edge.weight));
        neighbors.entry(&edge.dst).or_default().push((&edge.src, edge.weight));
    }

    let mut sorted_ids: Vec<&AccountId> = node_order.iter().collect();
    sorted_ids.sort();

    for _ in 0..MAX_PASSES {
        let mut changed = 0;
        for id in &sorted_ids {
            let Some(incident) = neighbors.get(*id) else {
                continue;
            };
            let mut weight_by_label: BTreeMap<usize, f64> = BTreeMap::new();
            for (neighbor, weight) in incident {
                *weight_by_label.entry(labels[*neighbor]).or_default() += weight;
            }
            let Some(best) = weight_by_label
                .iter()
                .max_by(|(la, wa), (lb, wb)| {
                    wa.partial_cmp(wb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| lb.cmp(la))
                })
                .map(|(label, _)| *label)
            else {
                continue;
            };
            if labels[*id] != best {
                labels.insert(*id, best);
                changed += 1;
            }
        }
        if changed == 0 {
            break;
        }
    }

    // Renumber in order of first appearance, ego's community first.
    let mut renumbered: BTreeMap<usize, u32> = BTreeMap::new();
    let mut next = 0;
    if let Some(ego) = ego {
        if let Some(label) = labels.get(ego) {
            renumbered.insert(*label, 0);
            next = 1;
        }
    }
    for id in node_order {
        let label = labels[id];
        renumbered.entry(label).or_insert_with(|| {
            let assigned = next;
            next += 1;
            assigned
        });
    }

    node_order
        .iter()
        .map(|id| (id.clone(), renumbered[&labels[id]]))
        .collect()
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
    fn single_node_is_community_zero() {
        let nodes = vec![id("a")];
        let communities = detect_communities(&nodes, &[], None);
        assert_eq!(communities[&id("a")], 0);
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(detect_communities(&[], &[], None).is_empty());
    }

    #[test]
    fn triangle_converges_to_one_community() {
        let nodes: Vec<_> = ["a", "b", "c"].into_iter().map(id).collect();
        let edges = vec![
            edge("a", "b", 5.0),
            edge("b", "c", 5.0),
            edge("a", "c", 5.0),
        ];
        let communities = detect_communities(&nodes, &edges, None);
        let labels: std::collections::BTreeSet<u32> = communities.values().copied().collect();
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn disconnected_clusters_get_distinct_labels() {
        let nodes: Vec<_> = ["a", "b", "c", "d"].into_iter().map(id).collect();
        let edges = vec![edge("a", "b", 5.0), edge("c", "d", 5.0)];

        let communities = detect_communities(&nodes, &edges, None);
        assert_eq!(communities[&id("a")], communities[&id("b")]);
        assert_eq!(communities[&id("c")], communities[&id("d")]);
        assert_ne!(communities[&id("a")], communities[&id("c")]);
    }

    #[test]
    fn labels_are_contiguous_from_zero() {
        let nodes: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(id).collect();
        let edges = vec![edge("a", "b", 5.0), edge("d", "e", 5.0)];

        let communities = detect_communities(&nodes, &edges, None);
        let mut labels: Vec<u32> = communities.values().copied().collect();
        labels.sort_unstable();
        labels.dedup();
        let expected: Vec<u32> = (0..labels.len() as u32).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn ego_community_renumbers_to_zero() {
        // "z" sorts last, so without pinning its community would not be 0.
        let nodes: Vec<_> = ["a", "b", "z"].into_iter().map(id).collect();
        let edges = vec![edge("a", "b", 5.0)];

        let ego = id("z");
        let communities = detect_communities(&nodes, &edges, Some(&ego));
        assert_eq!(communities[&ego], 0);
        assert_ne!(communities[&id("a")], 0);
    }
}
