//! Edge production: evidence edges from interactions and co-engagement,
//! growth edges for new followers, tiered hierarchical routing, and the
//! precedence dedup that reconciles overlapping strategies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use atlas_core::{AccountId, EdgeKind, PostId, Timestamp};
use atlas_store::InteractionEventRecord;
use itertools::Itertools as _;

/// Half-life of interaction evidence, in days.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;

/// Edge weight by the *source* node's tier.
const TIER_WEIGHTS: [f64; 6] = [0.9, 0.7, 0.5, 0.4, 0.3, 0.2];
/// Weight factor applied when routing had to skip past an empty tier.
const TIER_SKIP_FACTOR: f64 = 0.8;
/// How many candidates of the target tier the nearest-search considers.
const TIER_CANDIDATE_LIMIT: usize = 50;

const GROWTH_RATIO_LIMIT: f64 = 100.0;
const GROWTH_TOP_ANCHORS: usize = 5;
const COHORT_RATIO_LIMIT: f64 = 5.0;
const COHORT_MAX_PEERS: usize = 3;

const EGO_FOLLOW_WEIGHT: f64 = 0.5;
const FALLBACK_EGO_WEIGHT: f64 = 0.4;
const MUTUAL_WEIGHT: f64 = 1.0;
const YOU_FOLLOW_WEIGHT: f64 = 0.8;
const FOLLOWERS_YOU_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub src: AccountId,
    pub dst: AccountId,
    pub kind: EdgeKind,
    pub weight: f64,
}

/// `2^(-Δdays / 14)`. Missing and future timestamps decay to 1.
pub fn recency_decay(created_at: Option<Timestamp>, reference: Timestamp) -> f64 {
    let Some(created_at) = created_at else {
        return 1.0;
    };
    if reference <= created_at {
        return 1.0;
    }
    let delta_days = reference.secs_since(created_at) as f64 / 86_400.0;
    2f64.powf(-delta_days / RECENCY_HALF_LIFE_DAYS)
}

/// Directed evidence edges: `base_weight(kind) × decay`, summed per
/// `(src, dst)` pair.
pub fn interaction_edges(
    events: &[InteractionEventRecord],
    reference: Timestamp,
) -> Vec<GraphEdge> {
    let mut summed: BTreeMap<(AccountId, AccountId), f64> = BTreeMap::new();
    for event in events {
        let weight = event.kind.base_weight() * recency_decay(event.created_at, reference);
        *summed
            .entry((event.src_id.clone(), event.dst_id.clone()))
            .or_default() += weight;
    }
    summed
        .into_iter()
        .map(|((src, dst), weight)| GraphEdge {
            src,
            dst,
            kind: EdgeKind::DirectInteraction,
            weight,
        })
        .collect()
}

/// Undirected co-engagement edges: for every unordered pair of accounts
/// that engaged with the same post, weight = number of shared posts.
/// Direction is normalized `min(id) → max(id)`.
pub fn co_engagement_edges(groups: &[(PostId, BTreeSet<AccountId>)]) -> Vec<GraphEdge> {
    let mut shared: BTreeMap<(AccountId, AccountId), f64> = BTreeMap::new();
    for (_, engagers) in groups {
        for pair in engagers.iter().combinations(2) {
            let (a, b) = (pair[0], pair[1]);
            let key = if a <= b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            *shared.entry(key).or_default() += 1.0;
        }
    }
    shared
        .into_iter()
        .map(|((src, dst), weight)| GraphEdge {
            src,
            dst,
            kind: EdgeKind::CoEngagement,
            weight,
        })
        .collect()
}

/// Thin `ego → new follower` edges.
pub fn ego_follow_edges(ego: &AccountId, new_accounts: &BTreeSet<AccountId>) -> Vec<GraphEdge> {
    new_accounts
        .iter()
        .filter(|id| *id != ego)
        .map(|id| GraphEdge {
            src: ego.clone(),
            dst: id.clone(),
            kind: EdgeKind::EgoFollow,
            weight: EGO_FOLLOW_WEIGHT,
        })
        .collect()
}

fn follower_ratio(a: u64, b: u64) -> f64 {
    let hi = a.max(b) as f64;
    let lo = a.min(b).max(1) as f64;
    hi / lo
}

/// Growth edges: each new follower is anchored to the most similar existing
/// accounts by follower-count ratio, plus cohort edges between similar new
/// accounts.
pub fn growth_edges(
    new_accounts: &BTreeSet<AccountId>,
    existing: &BTreeSet<AccountId>,
    followers: &BTreeMap<AccountId, u64>,
) -> Vec<GraphEdge> {
    let count = |id: &AccountId| followers.get(id).copied().unwrap_or(0);

    let mut edges = vec![];

    for new_id in new_accounts {
        let new_count = count(new_id);
        let mut scored: Vec<(f64, &AccountId)> = existing
            .iter()
            .filter(|e| *e != new_id)
            .filter_map(|e| {
                let ratio = follower_ratio(new_count, count(e));
                (ratio < GROWTH_RATIO_LIMIT).then(|| {
                    let score = 1.0 / (1.0 + (ratio + 1.0).log10());
                    (score, e)
                })
            })
            .collect();
        // Highest score first; ids break ties so the result is stable.
        scored.sort_by(|(sa, ia), (sb, ib)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ia.cmp(ib))
        });
        for (score, anchor) in scored.into_iter().take(GROWTH_TOP_ANCHORS) {
            edges.push(GraphEdge {
                src: (*anchor).clone(),
                dst: new_id.clone(),
                kind: EdgeKind::NetworkGrowth,
                weight: score,
            });
        }
    }

    // Cohort edges between similar new accounts, at most 3 peers per node,
    // strongest pairs first.
    let mut pairs: Vec<(f64, &AccountId, &AccountId)> = new_accounts
        .iter()
        .combinations(2)
        .filter_map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            let ratio = follower_ratio(count(a), count(b));
            (ratio < COHORT_RATIO_LIMIT).then(|| (0.5 / ratio, a.min(b), a.max(b)))
        })
        .collect();
    pairs.sort_by(|(wa, sa, da), (wb, sb, db)| {
        wb.partial_cmp(wa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (sa, da).cmp(&(sb, db)))
    });

    let mut peer_counts: HashMap<&AccountId, usize> = HashMap::new();
    for (weight, a, b) in pairs {
        let count_a = peer_counts.get(a).copied().unwrap_or(0);
        let count_b = peer_counts.get(b).copied().unwrap_or(0);
        if COHORT_MAX_PEERS <= count_a || COHORT_MAX_PEERS <= count_b {
            continue;
        }
        *peer_counts.entry(a).or_default() += 1;
        *peer_counts.entry(b).or_default() += 1;
        edges.push(GraphEdge {
            src: a.clone(),
            dst: b.clone(),
            kind: EdgeKind::Cohort,
            weight,
        });
    }

    edges
}

/// Follower-count tier: 1 is the most-followed bucket, 6 the long tail.
pub fn tier_of(followers: u64) -> u8 {
    match followers {
        100_000.. => 1,
        50_000.. => 2,
        10_000.. => 3,
        5_000.. => 4,
        2_000.. => 5,
        _ => 6,
    }
}

/// Hierarchical routing: every non-ego node connects to the nearest node of
/// the next tier up (by follower-count ratio), searching further up past
/// empty tiers, instead of every node connecting straight to the ego.
pub fn tier_edges(
    nodes: &BTreeMap<AccountId, u64>,
    ego: &AccountId,
    mutual: &BTreeSet<AccountId>,
) -> Vec<GraphEdge> {
    let mut by_tier: BTreeMap<u8, Vec<(&AccountId, u64)>> = BTreeMap::new();
    for (id, followers) in nodes {
        if id == ego {
            continue;
        }
        by_tier
            .entry(tier_of(*followers))
            .or_default()
            .push((id, *followers));
    }
    // Candidates within a tier are considered most-followed first.
    for candidates in by_tier.values_mut() {
        candidates.sort_by(|(ia, fa), (ib, fb)| fb.cmp(fa).then_with(|| ia.cmp(ib)));
    }

    let mut edges = vec![];

    for (id, followers) in nodes {
        if id == ego {
            continue;
        }
        let tier = tier_of(*followers);

        if tier == 1 {
            edges.push(GraphEdge {
                src: id.clone(),
                dst: ego.clone(),
                kind: EdgeKind::Tier {
                    tier: 1,
                    skipped: false,
                },
                weight: TIER_WEIGHTS[0],
            });
        } else {
            let mut routed = false;
            for target_tier in (1..tier).rev() {
                let Some(candidates) = by_tier.get(&target_tier) else {
                    continue;
                };
                let nearest = candidates
                    .iter()
                    .filter(|(candidate, _)| *candidate != id)
                    .take(TIER_CANDIDATE_LIMIT)
                    .min_by(|(ia, fa), (ib, fb)| {
                        follower_ratio(*followers, *fa)
                            .partial_cmp(&follower_ratio(*followers, *fb))
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| ia.cmp(ib))
                    });
                let Some((parent, _)) = nearest else {
                    continue;
                };
                let skipped = target_tier != tier - 1;
                let weight = TIER_WEIGHTS[(tier - 1) as usize]
                    * if skipped { TIER_SKIP_FACTOR } else { 1.0 };
                edges.push(GraphEdge {
                    src: id.clone(),
                    dst: (*parent).clone(),
                    kind: EdgeKind::Tier { tier, skipped },
                    weight,
                });
                routed = true;
                break;
            }
            if !routed && tier <= 3 {
                edges.push(GraphEdge {
                    src: id.clone(),
                    dst: ego.clone(),
                    kind: EdgeKind::FallbackEgo,
                    weight: FALLBACK_EGO_WEIGHT,
                });
            }
        }

        // Mutual-follow accounts always keep a direct edge to the ego.
        if mutual.contains(id) {
            edges.push(GraphEdge {
                src: id.clone(),
                dst: ego.clone(),
                kind: EdgeKind::Mutual,
                weight: MUTUAL_WEIGHT,
            });
        }
    }

    edges
}

/// Direct relationship edges for nodes no other strategy reached.
pub fn relational_fallback_edges(
    nodes: &BTreeMap<AccountId, u64>,
    ego: &AccountId,
    followers: &BTreeSet<AccountId>,
    following: &BTreeSet<AccountId>,
    connected: &BTreeSet<AccountId>,
) -> Vec<GraphEdge> {
    let mut edges = vec![];
    for id in nodes.keys() {
        if id == ego || connected.contains(id) {
            continue;
        }
        if following.contains(id) {
            edges.push(GraphEdge {
                src: ego.clone(),
                dst: id.clone(),
                kind: EdgeKind::YouFollow,
                weight: YOU_FOLLOW_WEIGHT,
            });
        } else if followers.contains(id) {
            edges.push(GraphEdge {
                src: id.clone(),
                dst: ego.clone(),
                kind: EdgeKind::FollowersYou,
                weight: FOLLOWERS_YOU_WEIGHT,
            });
        }
    }
    edges
}

/// Reconcile overlapping structural strategies: for each `(src, dst)` pair,
/// keep the strategy with the higher weight, breaking exact ties by the
/// precedence ranking. Evidence edges (interactions, co-engagement) pass
/// through untouched.
pub fn dedup_structural(edges: Vec<GraphEdge>) -> Vec<GraphEdge> {
    let mut evidence = vec![];
    let mut best: BTreeMap<(AccountId, AccountId), GraphEdge> = BTreeMap::new();

    for edge in edges {
        let Some(rank) = edge.kind.structural_rank() else {
            evidence.push(edge);
            continue;
        };
        let key = (edge.src.clone(), edge.dst.clone());
        match best.get(&key) {
            Some(kept) => {
                let kept_rank = kept.kind.structural_rank().expect("structural by construction");
                if kept.weight < edge.weight || (kept.weight == edge.weight && kept_rank < rank) {
                    best.insert(key, edge);
                }
            }
            None => {
                best.insert(key, edge);
            }
        }
    }

    evidence.extend(best.into_values());
    evidence
}
