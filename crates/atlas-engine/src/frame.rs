//! Frame construction: aggregate edge evidence, route the hierarchy, detect
//! communities, lay the graph out, and persist the result as a renderable
//! frame.

pub mod communities;
pub mod edges;
pub mod layout;
pub mod prune;

use std::collections::{BTreeMap, BTreeSet};

use atlas_core::{
    AccountId, FollowEventKind, IntervalId, SnapshotKind, Timestamp, Vec3,
};
use atlas_store::{CommunityRecord, Database, DbError, EdgeRecord, FrameRecord};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tracing::{debug, info};

pub use self::edges::{GraphEdge, RECENCY_HALF_LIFE_DAYS, recency_decay};
pub use self::prune::FrameLimits;

const LOG_TARGET: &str = "atlas::frame";

/// Tag recorded with position-history rows written by frame builds.
const HISTORY_SOURCE: &str = "layout";

#[derive(Debug, Snafu)]
pub enum FrameError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(display("Interval {interval_id} not found"))]
    IntervalNotFound { interval_id: IntervalId },
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// The stable frame contract consumed by renderers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FramePayload {
    pub interval_id: IntervalId,
    pub timeframe_days: u32,
    /// Reference timestamp all decay math was computed against (the
    /// interval's end).
    pub timestamp: Timestamp,
    pub ego_id: AccountId,
    pub nodes: Vec<FrameNode>,
    pub edges: Vec<FrameEdge>,
    pub communities: Vec<u32>,
    pub stats: FrameStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameNode {
    pub id: AccountId,
    pub handle: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub followers: u64,
    pub importance: f64,
    pub community: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(rename = "isNew")]
    pub is_new: bool,
    #[serde(rename = "isEgo")]
    pub is_ego: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameEdge {
    pub source: AccountId,
    pub target: AccountId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameStats {
    #[serde(rename = "nodeCount")]
    pub node_count: u64,
    #[serde(rename = "edgeCount")]
    pub edge_count: u64,
    #[serde(rename = "communityCount")]
    pub community_count: u64,
    #[serde(rename = "newFollowers")]
    pub new_followers: u64,
}

/// An empty frame structure for clients asking before anything was built.
pub fn empty_frame(timeframe_days: u32) -> FramePayload {
    FramePayload {
        interval_id: IntervalId::ZERO,
        timeframe_days,
        timestamp: Timestamp::ZERO,
        ego_id: AccountId::default(),
        nodes: vec![],
        edges: vec![],
        communities: vec![],
        stats: FrameStats {
            node_count: 0,
            edge_count: 0,
            community_count: 0,
            new_followers: 0,
        },
    }
}

pub struct FrameBuilder<'d> {
    db: &'d Database,
    limits: FrameLimits,
}

impl<'d> FrameBuilder<'d> {
    pub fn new(db: &'d Database) -> Self {
        Self {
            db,
            limits: FrameLimits::default(),
        }
    }

    pub fn with_limits(db: &'d Database, limits: FrameLimits) -> Self {
        Self { db, limits }
    }

    /// Build the frame for `(interval, timeframe, ego)` and persist it with
    /// its positions, communities and edges in one replace-then-insert
    /// transaction. All-or-nothing: a failed build persists nothing.
    pub async fn build_and_persist(
        &self,
        interval_id: IntervalId,
        timeframe_days: u32,
        ego_id: &AccountId,
    ) -> FrameResult<FramePayload> {
        let built = self.build(interval_id, timeframe_days, ego_id).await?;

        let edge_records: Vec<EdgeRecord> = built
            .graph_edges
            .iter()
            .map(|edge| EdgeRecord {
                src_id: edge.src.clone(),
                dst_id: edge.dst.clone(),
                kind: edge.kind,
                weight: edge.weight,
                metadata_json: None,
            })
            .collect();
        let community_records: Vec<(AccountId, CommunityRecord)> = built
            .payload
            .nodes
            .iter()
            .map(|node| {
                (
                    node.id.clone(),
                    CommunityRecord {
                        community: node.community,
                        confidence: 1.0,
                    },
                )
            })
            .collect();
        let position_records: Vec<(AccountId, Vec3)> = built
            .payload
            .nodes
            .iter()
            .map(|node| (node.id.clone(), Vec3::new(node.x, node.y, node.z)))
            .collect();

        let payload_json =
            serde_json::to_string(&built.payload).expect("Frame payload always serializes");
        let frame_record = FrameRecord {
            payload_json,
            node_count: built.payload.stats.node_count,
            edge_count: built.payload.stats.edge_count,
            built_at: Timestamp::now(),
            builder_version: env!("CARGO_PKG_VERSION").to_owned(),
        };

        self.db
            .replace_frame_artifacts(
                interval_id,
                timeframe_days,
                edge_records,
                community_records,
                position_records,
                frame_record,
                HISTORY_SOURCE,
            )
            .await?;

        info!(
            target: LOG_TARGET,
            %interval_id,
            timeframe_days,
            nodes = built.payload.stats.node_count,
            edges = built.payload.stats.edge_count,
            "Built frame"
        );
        Ok(built.payload)
    }

    /// Build without persisting.
    pub async fn build(
        &self,
        interval_id: IntervalId,
        timeframe_days: u32,
        ego_id: &AccountId,
    ) -> FrameResult<BuiltFrame> {
        let interval = self
            .db
            .get_interval(interval_id)
            .await?
            .ok_or(FrameError::IntervalNotFound { interval_id })?;

        let reference = interval.end_at;
        let window_start = if timeframe_days == 0 {
            Timestamp::ZERO
        } else {
            reference.saturating_sub_days(timeframe_days as u64)
        };

        // Cumulative node set with relational flags.
        let followers = self
            .db
            .cumulative_members(SnapshotKind::Followers, reference)
            .await?;
        let following = self
            .db
            .cumulative_members(SnapshotKind::Following, reference)
            .await?;
        let new_set: BTreeSet<AccountId> = self
            .db
            .follow_events_of(interval_id, Some(FollowEventKind::New))
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let mutual: BTreeSet<AccountId> = followers.intersection(&following).cloned().collect();

        let mut node_ids: BTreeSet<AccountId> = followers.union(&following).cloned().collect();
        node_ids.insert(ego_id.clone());

        let records = self.db.get_accounts(node_ids.iter().cloned().collect()).await?;
        let follower_counts: BTreeMap<AccountId, u64> = node_ids
            .iter()
            .map(|id| {
                let count = records
                    .get(id)
                    .and_then(|r| r.followers_count)
                    .unwrap_or(0);
                (id.clone(), count)
            })
            .collect();

        // Edge sources.
        let interactions = self
            .db
            .interactions_in_window(window_start, reference)
            .await?;
        let engager_groups = self
            .db
            .engagers_by_post_in_window(window_start, reference)
            .await?;

        let existing: BTreeSet<AccountId> = node_ids
            .iter()
            .filter(|id| !new_set.contains(*id) && *id != ego_id)
            .cloned()
            .collect();

        let mut all_edges = edges::interaction_edges(&interactions, reference);
        all_edges.extend(edges::co_engagement_edges(&engager_groups));
        all_edges.extend(edges::ego_follow_edges(ego_id, &new_set));
        all_edges.extend(edges::growth_edges(&new_set, &existing, &follower_counts));
        all_edges.extend(edges::tier_edges(&follower_counts, ego_id, &mutual));

        let connected: BTreeSet<AccountId> = all_edges
            .iter()
            .flat_map(|e| [e.src.clone(), e.dst.clone()])
            .collect();
        all_edges.extend(edges::relational_fallback_edges(
            &follower_counts,
            ego_id,
            &followers,
            &following,
            &connected,
        ));

        let all_edges = edges::dedup_structural(all_edges);

        // Importance and pruning.
        let importance = prune::importance_scores(&follower_counts, &all_edges);
        let (retained_nodes, retained_edges) = prune::prune(
            &follower_counts,
            &importance,
            all_edges,
            ego_id,
            &self.limits,
        );

        // Communities over the retained graph, ego pinned to 0.
        let node_communities = communities::detect_communities(
            &retained_nodes,
            &retained_edges,
            (retained_nodes.contains(ego_id)).then_some(ego_id),
        );
        let mut community_labels: Vec<u32> =
            node_communities.values().copied().collect::<BTreeSet<_>>().into_iter().collect();
        community_labels.sort_unstable();

        // Layout, seeded from the previous interval where possible.
        let previous_positions = match self.db.previous_interval(interval_id).await? {
            Some((previous_id, _)) => self.db.positions_of(previous_id).await?,
            None => BTreeMap::new(),
        };
        let seed = layout::build_seed(interval_id.as_u64(), timeframe_days, ego_id);
        let seeded = layout::seed_positions(
            &retained_nodes,
            &retained_edges,
            &previous_positions,
            &node_communities,
            community_labels.len(),
            ego_id,
            seed,
        );
        let positions = layout::force_layout(&retained_nodes, &retained_edges, seeded, ego_id);

        // Assemble the payload; node order is the pruning order
        // (importance-descending).
        let nodes: Vec<FrameNode> = retained_nodes
            .iter()
            .map(|id| {
                let record = records.get(id);
                let position = positions.get(id).copied().unwrap_or(Vec3::ORIGIN);
                FrameNode {
                    id: id.clone(),
                    handle: record.and_then(|r| r.handle.clone()),
                    name: record.and_then(|r| r.display_name.clone()),
                    avatar: record.and_then(|r| r.avatar_url.clone()),
                    followers: follower_counts.get(id).copied().unwrap_or(0),
                    importance: importance.get(id).copied().unwrap_or(0.0),
                    community: node_communities.get(id).copied().unwrap_or(0),
                    x: position.x,
                    y: position.y,
                    z: position.z,
                    is_new: new_set.contains(id),
                    is_ego: id == ego_id,
                }
            })
            .collect();

        let frame_edges: Vec<FrameEdge> = retained_edges
            .iter()
            .map(|edge| FrameEdge {
                source: edge.src.clone(),
                target: edge.dst.clone(),
                edge_type: edge.kind.label(),
                weight: edge.weight,
            })
            .collect();

        let stats = FrameStats {
            node_count: nodes.len() as u64,
            edge_count: frame_edges.len() as u64,
            community_count: community_labels.len() as u64,
            new_followers: interval.new_count,
        };

        debug!(
            target: LOG_TARGET,
            %interval_id,
            timeframe_days,
            candidates = node_ids.len(),
            retained = nodes.len(),
            "Assembled frame"
        );

        Ok(BuiltFrame {
            payload: FramePayload {
                interval_id,
                timeframe_days,
                timestamp: reference,
                ego_id: ego_id.clone(),
                nodes,
                edges: frame_edges,
                communities: community_labels,
                stats,
            },
            graph_edges: retained_edges,
        })
    }
}

/// A built frame plus the typed edges used to persist edge rows.
pub struct BuiltFrame {
    pub payload: FramePayload,
    pub graph_edges: Vec<GraphEdge>,
}

#[cfg(test)]
mod tests;
