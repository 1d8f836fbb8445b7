//! Layout seeding and bounded force-directed relaxation.
//!
//! Deterministic by construction: the jitter PRNG is seeded from the build
//! key, nodes are always visited in sorted order, and ring placement uses a
//! stable per-account hash. Building the same frame twice yields identical
//! positions.

use std::collections::BTreeMap;

use atlas_core::{AccountId, Vec3};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use super::edges::GraphEdge;

const ITERATIONS: usize = 50;
const REPULSION: f64 = 1_000.0;
const ATTRACTION: f64 = 0.01;
const START_TEMPERATURE: f64 = 10.0;
const COOLING: f64 = 0.95;
const SEED_JITTER: f64 = 2.0;
const RING_BASE_RADIUS: f64 = 50.0;
const RING_RADIUS_SPREAD: u64 = 30;
const RING_Z_SPREAD: u64 = 21;
const MIN_DISTANCE: f64 = 0.01;

/// Stable per-account hash for ring placement.
pub fn stable_hash(id: &AccountId) -> u64 {
    let hash = blake3::hash(id.as_str().as_bytes());
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("8 bytes"))
}

/// PRNG seed for one build, derived from the build key so rebuilds agree.
pub fn build_seed(interval_id: u64, timeframe_days: u32, ego: &AccountId) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&interval_id.to_le_bytes());
    hasher.update(&timeframe_days.to_le_bytes());
    hasher.update(ego.as_str().as_bytes());
    u64::from_le_bytes(
        hasher.finalize().as_bytes()[..8]
            .try_into()
            .expect("8 bytes"),
    )
}

/// Seed positions: previous interval's position if known, else near the
/// strongest-weighted neighbor with ±2 jitter per axis, else on a ring by
/// community. The ego starts at the origin.
pub fn seed_positions(
    node_order: &[AccountId],
    edges: &[GraphEdge],
    previous: &BTreeMap<AccountId, Vec3>,
    communities: &BTreeMap<AccountId, u32>,
    community_count: usize,
    ego: &AccountId,
    seed: u64,
) -> BTreeMap<AccountId, Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);

    // Strongest incident edge per node, for neighbor-relative seeding.
    let mut strongest: BTreeMap<&AccountId, (&AccountId, f64)> = BTreeMap::new();
    for edge in edges {
        for (node, other) in [(&edge.src, &edge.dst), (&edge.dst, &edge.src)] {
            match strongest.get(node) {
                Some((_, weight)) if edge.weight <= *weight => {}
                _ => {
                    strongest.insert(node, (other, edge.weight));
                }
            }
        }
    }

    let mut positions: BTreeMap<AccountId, Vec3> = BTreeMap::new();
    let mut sorted: Vec<&AccountId> = node_order.iter().collect();
    sorted.sort();

    for id in sorted {
        if id == ego {
            positions.insert(id.clone(), Vec3::ORIGIN);
            continue;
        }
        if let Some(prev) = previous.get(id) {
            positions.insert(id.clone(), *prev);
            continue;
        }

        let anchor = strongest
            .get(id)
            .map(|(neighbor, _)| *neighbor)
            .and_then(|neighbor| previous.get(neighbor).copied());
        let position = match anchor {
            Some(anchor) => Vec3::new(
                anchor.x + rng.random_range(-SEED_JITTER..=SEED_JITTER),
                anchor.y + rng.random_range(-SEED_JITTER..=SEED_JITTER),
                anchor.z + rng.random_range(-SEED_JITTER..=SEED_JITTER),
            ),
            None => {
                let community = communities.get(id).copied().unwrap_or(0);
                let k = community_count.max(1) as f64;
                let angle = community as f64 * std::f64::consts::TAU / k;
                let hash = stable_hash(id);
                let radius = RING_BASE_RADIUS + (hash % RING_RADIUS_SPREAD) as f64;
                let z = ((hash / RING_RADIUS_SPREAD) % RING_Z_SPREAD) as f64 - 10.0;
                Vec3::new(radius * angle.cos(), radius * angle.sin(), z)
            }
        };
        positions.insert(id.clone(), position);
    }

    positions
}

/// Force-directed relaxation: pairwise repulsion `1000/d²`, per-edge
/// attraction `0.01·d·weight`, displacement clamped to a temperature that
/// cools ×0.95 per iteration. The ego is re-pinned to the origin every
/// iteration.
pub fn force_layout(
    node_order: &[AccountId],
    edges: &[GraphEdge],
    mut positions: BTreeMap<AccountId, Vec3>,
    ego: &AccountId,
) -> BTreeMap<AccountId, Vec3> {
    let mut ids: Vec<&AccountId> = node_order.iter().collect();
    ids.sort();

    let mut temperature = START_TEMPERATURE;

    for _ in 0..ITERATIONS {
        let mut displacement: BTreeMap<&AccountId, Vec3> =
            ids.iter().map(|id| (*id, Vec3::ORIGIN)).collect();

        // Repulsion between every pair.
        for (a_index, a) in ids.iter().enumerate() {
            for b in &ids[a_index + 1..] {
                let pa = positions[*a];
                let pb = positions[*b];
                let (dx, dy, dz) = (pa.x - pb.x, pa.y - pb.y, pa.z - pb.z);
                let distance = (dx * dx + dy * dy + dz * dz).sqrt().max(MIN_DISTANCE);
                let force = REPULSION / (distance * distance);
                let (ux, uy, uz) = (dx / distance, dy / distance, dz / distance);

                let da = displacement.get_mut(*a).expect("node present");
                da.x += ux * force;
                da.y += uy * force;
                da.z += uz * force;
                let db = displacement.get_mut(*b).expect("node present");
                db.x -= ux * force;
                db.y -= uy * force;
                db.z -= uz * force;
            }
        }

        // Attraction along edges.
        for edge in edges {
            let (Some(ps), Some(pd)) = (positions.get(&edge.src), positions.get(&edge.dst)) else {
                continue;
            };
            let (dx, dy, dz) = (pd.x - ps.x, pd.y - ps.y, pd.z - ps.z);
            let distance = (dx * dx + dy * dy + dz * dz).sqrt().max(MIN_DISTANCE);
            let force = ATTRACTION * distance * edge.weight;
            let (ux, uy, uz) = (dx / distance, dy / distance, dz / distance);

            if let Some(ds) = displacement.get_mut(&edge.src) {
                ds.x += ux * force;
                ds.y += uy * force;
                ds.z += uz * force;
            }
            if let Some(dd) = displacement.get_mut(&edge.dst) {
                dd.x -= ux * force;
                dd.y -= uy * force;
                dd.z -= uz * force;
            }
        }

        // Apply, clamped to the current temperature.
        for id in &ids {
            let delta = displacement[*id];
            let magnitude = (delta.x * delta.x + delta.y * delta.y + delta.z * delta.z).sqrt();
            if magnitude <= 0.0 {
                continue;
            }
            let scale = magnitude.min(temperature) / magnitude;
            let position = positions.get_mut(*id).expect("node present");
            position.x += delta.x * scale;
            position.y += delta.y * scale;
            position.z += delta.z * scale;
        }

        if let Some(position) = positions.get_mut(ego) {
            *position = Vec3::ORIGIN;
        }
        temperature *= COOLING;
    }

    if let Some(position) = positions.get_mut(ego) {
        *position = Vec3::ORIGIN;
    }
    positions
}
