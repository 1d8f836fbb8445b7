//! Table definitions for the atlas store.
//!
//! # Data model overview
//!
//! Three layers with distinct durability contracts:
//!
//! - **Raw** ([`raw_fetches`]): append-only record of every upstream page,
//!   keyed by fetch id. Never mutated; only an explicit retention policy may
//!   delete rows. Sufficient to replay normalization from scratch.
//! - **Normalized** ([`runs`], [`accounts`], [`snapshots`],
//!   [`snapshot_followers`], [`snapshot_following`], [`posts`],
//!   [`interaction_events`], [`post_engagers`]): the canonical state,
//!   mutated only by the collector. Accounts are upserted by primary key and
//!   never deleted; snapshot membership is immutable once the snapshot's
//!   `account_count` is finalized.
//! - **Derived** ([`intervals`], [`follow_events`], [`edges`],
//!   [`communities`], [`positions`], [`position_history`], [`frames`],
//!   [`post_attributions`]): recomputable from normalized state, safe to
//!   delete. Frame artifacts are replaced wholesale under an
//!   interval-scoped critical section so rebuilds stay idempotent.
//!
//! Ownership: a run owns its raw fetches and snapshots; a snapshot owns its
//! membership rows; an interval owns every derived row carrying its id; an
//! account is shared state with many weak references. Cycles between
//! intervals, follow events and snapshots are avoided by storing integer ids
//! only, never object references.

use atlas_core::{
    AccountId, EdgeKind, EngagerKind, FollowEventKind, InteractionKind, IntervalId, PostId,
    RawFetchId, RunId, RunStatus, SnapshotId, SnapshotKind, Timestamp, Vec3,
};
use bincode::{Decode, Encode};
use serde::Serialize;

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

// ============================================================================
// SYSTEM TABLES
// ============================================================================

def_table! {
    /// Tracks the schema version so an old binary refuses a newer database.
    db_version: () => u64
}

// ============================================================================
// RAW LAYER
// ============================================================================

def_table! {
    /// Every paged upstream response, verbatim.
    ///
    /// The payload is the decoded page re-serialized as canonical JSON
    /// bytes; `params_hash` is a truncated blake3 of the sorted request
    /// parameters so identical requests can be correlated across runs.
    raw_fetches: RawFetchId => RawFetchRecord
}

/// One stored upstream page.
#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct RawFetchRecord {
    pub run_id: RunId,
    pub endpoint: String,
    pub params_hash: String,
    /// Cursor used to request this page; `None` for the first page.
    pub cursor_in: Option<String>,
    /// Cursor returned for the next page; `None` when exhausted.
    pub cursor_out: Option<String>,
    /// True iff the consumer's page cap was reached while more data remained.
    pub truncated: bool,
    pub payload: Vec<u8>,
    pub fetched_at: Timestamp,
}

// ============================================================================
// NORMALIZED LAYER
// ============================================================================

def_table! {
    /// Collection runs.
    ///
    /// A run in `Running` state owns any raw fetches it has written; startup
    /// recovery transitions stale `Running` rows to `Failed` before new work
    /// is accepted.
    runs: RunId => RunRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct RunRecord {
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub status: RunStatus,
    pub config_version: String,
    /// Frozen JSON snapshot of the configuration the run executed under.
    pub config_json: String,
    pub notes: Option<String>,
}

def_table! {
    /// Accounts observed anywhere: snapshot membership, engagement, or the
    /// ego itself. Later observations overwrite earlier ones; rows are never
    /// deleted.
    accounts: AccountId => AccountRecord
}

#[derive(Debug, Encode, Decode, Clone, Default, Serialize)]
pub struct AccountRecord {
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub tweet_count: Option<u64>,
    pub media_count: Option<u64>,
    pub favourites_count: Option<u64>,
    pub is_automated: bool,
    pub can_dm: Option<bool>,
    pub possibly_sensitive: bool,
    pub created_at: Option<Timestamp>,
    pub last_seen_at: Timestamp,
}

def_table! {
    /// Captured membership sets.
    ///
    /// Immutable once `account_count` is written; a snapshot left with
    /// `account_count == 0` by a crashed run is garbage-collected at
    /// startup.
    snapshots: SnapshotId => SnapshotRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct SnapshotRecord {
    pub run_id: RunId,
    pub kind: SnapshotKind,
    pub captured_at: Timestamp,
    pub account_count: u64,
}

def_table! {
    /// Time-ordered index of snapshots per kind, for latest-of-kind lookups
    /// and listing.
    snapshots_by_time: (SnapshotKind, Timestamp, SnapshotId) => ()
}

def_table! {
    /// Follower membership, unique per (snapshot, account).
    ///
    /// `follow_position` is 0 for the newest follower as returned by the
    /// upstream and increases monotonically across the whole run, not per
    /// page. Positions within one snapshot form a contiguous `[0, N)`
    /// sequence.
    snapshot_followers: (SnapshotId, AccountId) => SnapshotMemberRecord
}

def_table! {
    /// Following membership; same shape and invariants as
    /// [`snapshot_followers`].
    snapshot_following: (SnapshotId, AccountId) => SnapshotMemberRecord
}

#[derive(Debug, Encode, Decode, Clone, Copy, Serialize)]
pub struct SnapshotMemberRecord {
    pub follow_position: u64,
}

def_table! {
    /// Posts authored by the ego, upserted by id during engagement
    /// collection.
    posts: PostId => PostRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct PostRecord {
    pub author_id: AccountId,
    pub created_at: Option<Timestamp>,
    pub text: String,
    /// Raw public-metrics blob as JSON.
    pub metrics_json: String,
    pub conversation_id: Option<PostId>,
    pub in_reply_to: Option<PostId>,
    pub last_seen_at: Timestamp,
}

def_table! {
    /// Time-ordered post index; posts without a creation timestamp are
    /// indexed under `Timestamp::ZERO`.
    posts_by_time: (Timestamp, PostId) => ()
}

def_table! {
    /// Directed post-level interactions, indexed by creation time so frame
    /// building can range-scan its timeframe window.
    ///
    /// The `u64` component is a per-database sequence number keeping events
    /// created at the same second distinct.
    interaction_events: (Timestamp, u64) => InteractionEventRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct InteractionEventRecord {
    pub interval_id: IntervalId,
    pub created_at: Option<Timestamp>,
    pub src_id: AccountId,
    pub dst_id: AccountId,
    pub kind: InteractionKind,
    pub post_id: Option<PostId>,
    pub raw_fetch_id: Option<RawFetchId>,
}

def_table! {
    /// Who engaged with which post, unique per
    /// (interval, post, account, engager kind). Keyed post-first so both
    /// co-engagement grouping and attribution can scan one post's engagers.
    post_engagers: (PostId, IntervalId, AccountId, EngagerKind) => ()
}

// ============================================================================
// DERIVED LAYER
// ============================================================================

def_table! {
    /// The span between two consecutive snapshots of the same kind,
    /// annotated with diff counts.
    intervals: IntervalId => IntervalRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct IntervalRecord {
    pub kind: SnapshotKind,
    pub snapshot_start_id: SnapshotId,
    pub snapshot_end_id: SnapshotId,
    pub start_at: Timestamp,
    pub end_at: Timestamp,
    pub new_count: u64,
    pub lost_count: u64,
}

def_table! {
    /// End-time-ordered interval index.
    intervals_by_end: (Timestamp, IntervalId) => ()
}

def_table! {
    /// Membership changes produced by an interval diff. `new` and `lost`
    /// sets are disjoint, so one row per (interval, account) suffices.
    /// Deleted together with the owning interval.
    follow_events: (IntervalId, AccountId) => FollowEventKind
}

def_table! {
    /// Rendered frame edges, in frame order. Replaced wholesale on rebuild.
    edges: (IntervalId, u64) => EdgeRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct EdgeRecord {
    pub src_id: AccountId,
    pub dst_id: AccountId,
    pub kind: EdgeKind,
    pub weight: f64,
    pub metadata_json: Option<String>,
}

def_table! {
    /// Community assignment per (interval, account). Replaced on rebuild.
    communities: (IntervalId, AccountId) => CommunityRecord
}

#[derive(Debug, Encode, Decode, Clone, Copy, Serialize)]
pub struct CommunityRecord {
    pub community: u32,
    pub confidence: f64,
}

def_table! {
    /// Current layout position per (interval, account). Replaced on
    /// rebuild; seeds the next interval's layout.
    positions: (IntervalId, AccountId) => Vec3
}

def_table! {
    /// Append-only position trail for replay analysis. Keyed account-first
    /// so one account's history reads as a range; the `u64` keeps same-second
    /// records distinct. Never replaced by rebuilds.
    position_history: (AccountId, IntervalId, Timestamp, u64) => PositionHistoryRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct PositionHistoryRecord {
    pub position: Vec3,
    /// Which stage recorded the position (e.g. `layout`).
    pub source: String,
}

def_table! {
    /// Fully serialized frames, unique per (interval, timeframe window in
    /// days; 0 = all).
    frames: (IntervalId, u32) => FrameRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct FrameRecord {
    pub payload_json: String,
    pub node_count: u64,
    pub edge_count: u64,
    pub built_at: Timestamp,
    pub builder_version: String,
}

def_table! {
    /// Cached post-attribution payloads, unique per (post, timeframe
    /// window).
    post_attributions: (PostId, u32) => PostAttributionRecord
}

#[derive(Debug, Encode, Decode, Clone, Serialize)]
pub struct PostAttributionRecord {
    pub interval_id: Option<IntervalId>,
    pub created_at: Option<Timestamp>,
    pub payload_json: String,
    pub built_at: Timestamp,
}
