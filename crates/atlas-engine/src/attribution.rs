//! Post attribution: correlate new followers with recently authored posts
//! and cache the result per (post, timeframe window).

use std::collections::BTreeSet;

use atlas_core::{AccountId, IntervalId, PostId, Timestamp};
use atlas_store::{Database, DbError, PostAttributionRecord, PostRecord};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tracing::debug;

use crate::Config;

const LOG_TARGET: &str = "atlas::attribution";

/// How many most-recent intervals the nearest-interval fallback considers.
const NEAREST_INTERVAL_SCAN: usize = 200;

#[derive(Debug, Snafu)]
pub enum AttributionError {
    #[snafu(transparent)]
    Db { source: DbError },
}

pub type AttributionResult<T> = std::result::Result<T, AttributionError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// The cached attribution payload served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionPayload {
    pub id: PostId,
    pub interval_id: Option<IntervalId>,
    pub created_at: Option<Timestamp>,
    pub text: String,
    pub metrics: serde_json::Value,
    pub attribution: AttributionCounts,
    pub evidence: Vec<String>,
    pub follower_delta: u64,
    pub attributed_follower_ids: Vec<AccountId>,
    pub community_ids: Vec<u32>,
    pub timeframe_days: u32,
}

/// Serve cached attributions for a timeframe window.
pub async fn load_post_attributions(
    db: &Database,
    timeframe_days: u32,
    limit: usize,
) -> AttributionResult<Vec<AttributionPayload>> {
    let rows = db.list_post_attributions(timeframe_days, limit).await?;
    Ok(rows
        .into_iter()
        .filter_map(|(_, record)| serde_json::from_str(&record.payload_json).ok())
        .collect())
}

/// Build (or rebuild) attributions for every post authored inside the
/// timeframe window, newest first, up to `limit`. With `rebuild = false`
/// an existing cache is served as-is.
pub async fn build_post_attributions(
    db: &Database,
    config: &Config,
    timeframe_days: u32,
    limit: usize,
    rebuild: bool,
) -> AttributionResult<Vec<AttributionPayload>> {
    if rebuild {
        db.delete_post_attributions(timeframe_days).await?;
    } else {
        let existing = load_post_attributions(db, timeframe_days, limit).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }
    }

    let reference = match db.latest_interval().await? {
        Some((_, interval)) => interval.end_at,
        None => Timestamp::now(),
    };
    let window_start = if timeframe_days == 0 {
        Timestamp::ZERO
    } else {
        reference.saturating_sub_days(timeframe_days as u64)
    };

    let mut posts = db.posts_in_window(window_start, Timestamp::MAX).await?;
    posts.truncate(limit);
    if posts.is_empty() {
        return Ok(vec![]);
    }

    let mut results = vec![];
    for (post_id, post) in posts {
        let Some(payload) =
            compute_post_payload(db, config, &post_id, &post, timeframe_days).await?
        else {
            continue;
        };

        db.upsert_post_attribution(
            post_id.clone(),
            timeframe_days,
            PostAttributionRecord {
                interval_id: payload.interval_id,
                created_at: post.created_at,
                payload_json: serde_json::to_string(&payload)
                    .expect("Attribution payload always serializes"),
                built_at: Timestamp::now(),
            },
        )
        .await?;
        results.push(payload);
    }

    results.sort_by_key(|payload| std::cmp::Reverse(payload.created_at.unwrap_or(Timestamp::ZERO)));
    results.truncate(limit);
    Ok(results)
}

/// Resolve the post's interval by containment, else nearest end time over
/// the most recent intervals.
async fn resolve_post_interval(
    db: &Database,
    created_at: Timestamp,
) -> AttributionResult<Option<IntervalId>> {
    let recent = db.list_intervals(NEAREST_INTERVAL_SCAN).await?;
    if recent.is_empty() {
        return Ok(None);
    }

    for (interval_id, record) in &recent {
        if record.start_at <= created_at && created_at <= record.end_at {
            return Ok(Some(*interval_id));
        }
    }

    Ok(recent
        .iter()
        .min_by_key(|(_, record)| record.end_at.abs_diff(created_at))
        .map(|(interval_id, _)| *interval_id))
}

async fn compute_post_payload(
    db: &Database,
    config: &Config,
    post_id: &PostId,
    post: &PostRecord,
    timeframe_days: u32,
) -> AttributionResult<Option<AttributionPayload>> {
    let Some(created_at) = post.created_at else {
        return Ok(None);
    };
    let Some(post_interval) = resolve_post_interval(db, created_at).await? else {
        return Ok(None);
    };

    // Lookback set: intervals ending within the attribution window, plus the
    // post's own interval.
    let lookback_end = created_at.saturating_add_days(config.attribution_lookback_days);
    let mut interval_ids = db.intervals_ending_between(created_at, lookback_end).await?;
    if !interval_ids.contains(&post_interval) {
        interval_ids.push(post_interval);
    }

    let new_followers = db.new_follower_union(interval_ids.clone()).await?;

    let mut engagers: BTreeSet<AccountId> = db
        .engagers_for_post(post_id.clone())
        .await?
        .into_iter()
        .map(|(_, account_id, _)| account_id)
        .collect();
    engagers.append(&mut db.interaction_sources_for_post(post_id.clone()).await?);

    let high: BTreeSet<AccountId> = new_followers.intersection(&engagers).cloned().collect();

    let same_interval = db.new_follower_union(vec![post_interval]).await?;
    let medium: BTreeSet<AccountId> = same_interval.difference(&high).cloned().collect();

    let low: BTreeSet<AccountId> = new_followers
        .iter()
        .filter(|id| !high.contains(*id) && !medium.contains(*id))
        .cloned()
        .collect();

    let mut evidence = vec![];
    if !engagers.is_empty() {
        evidence.push("Direct engagement within attribution window".to_owned());
    }
    evidence.push("New followers in same interval as post".to_owned());
    if 1 < interval_ids.len() {
        evidence.push("Followed within lookback window".to_owned());
    }
    if evidence.is_empty() {
        evidence.push("Interval-based correlation".to_owned());
    }

    let attributed: BTreeSet<AccountId> = high
        .iter()
        .chain(medium.iter())
        .chain(low.iter())
        .cloned()
        .collect();

    // Community ids come from the post's own interval; accounts without an
    // assignment there contribute nothing.
    let interval_communities = db.communities_of(post_interval).await?;
    let community_ids: Vec<u32> = attributed
        .iter()
        .filter_map(|id| interval_communities.get(id).map(|record| record.community))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    debug!(
        target: LOG_TARGET,
        post_id = %post_id,
        high = high.len(),
        medium = medium.len(),
        low = low.len(),
        "Attributed post"
    );

    Ok(Some(AttributionPayload {
        id: post_id.clone(),
        interval_id: Some(post_interval),
        created_at: Some(created_at),
        text: post.text.clone(),
        metrics: serde_json::from_str(&post.metrics_json).unwrap_or_default(),
        attribution: AttributionCounts {
            high: high.len() as u64,
            medium: medium.len() as u64,
            low: low.len() as u64,
        },
        evidence,
        follower_delta: medium.len() as u64,
        attributed_follower_ids: attributed.into_iter().collect(),
        community_ids,
        timeframe_days,
    }))
}

#[cfg(test)]
mod tests {
    use atlas_core::{EngagerKind, FollowEventKind, SnapshotKind};
    use atlas_store::IntervalRecord;
    use atlas_util_error::BoxedErrorResult;
    use tempfile::tempdir;

    use super::*;

    const DAY: u64 = 86_400;

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    async fn interval(
        db: &Database,
        start_day: u64,
        end_day: u64,
        new: &[&str],
    ) -> BoxedErrorResult<IntervalId> {
        let events = new
            .iter()
            .map(|account| (id(account), FollowEventKind::New))
            .collect();
        let interval_id = db
            .insert_interval(
                IntervalRecord {
                    kind: SnapshotKind::Followers,
                    snapshot_start_id: 0.into(),
                    snapshot_end_id: 1.into(),
                    start_at: Timestamp::from(start_day * DAY),
                    end_at: Timestamp::from(end_day * DAY),
                    new_count: new.len() as u64,
                    lost_count: 0,
                },
                events,
            )
            .await?;
        Ok(interval_id)
    }

    async fn post(db: &Database, post_id: &str, day: u64) -> BoxedErrorResult<()> {
        db.upsert_post(
            PostId::from(post_id),
            atlas_store::PostRecord {
                author_id: id("ego"),
                created_at: Some(Timestamp::from(day * DAY)),
                text: format!("post {post_id}"),
                metrics_json: r#"{"like_count": 3}"#.to_owned(),
                conversation_id: None,
                in_reply_to: None,
                last_seen_at: Timestamp::from(day * DAY),
            },
        )
        .await?;
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn classification_tiers() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path().join("atlas.redb")).await?;
        let config = Config::default();

        // Post falls inside the first interval; a later interval is inside
        // the 7-day lookback.
        let first = interval(&db, 10, 11, &["engaged", "quiet"]).await?;
        interval(&db, 11, 12, &["later"]).await?;
        post(&db, "p1", 10).await?;

        // "engaged" both followed and engaged with the post → high.
        db.write_with(|tx| {
            Database::insert_post_engager_tx(
                &PostId::from("p1"),
                first,
                &id("engaged"),
                EngagerKind::Reply,
                tx,
            )
        })
        .await?;

        let results = build_post_attributions(&db, &config, 30, 10, true).await?;
        assert_eq!(results.len(), 1);
        let payload = &results[0];

        assert_eq!(payload.interval_id, Some(first));
        assert_eq!(payload.attribution.high, 1, "engaged follower");
        assert_eq!(payload.attribution.medium, 1, "quiet same-interval follower");
        assert_eq!(payload.attribution.low, 1, "later lookback follower");
        assert_eq!(payload.follower_delta, 1);
        assert_eq!(payload.attributed_follower_ids.len(), 3);
        assert!(
            payload
                .evidence
                .iter()
                .any(|tag| tag == "Direct engagement within attribution window")
        );
        assert_eq!(payload.metrics["like_count"], 3);

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn nearest_interval_fallback() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path().join("atlas.redb")).await?;
        let config = Config::default();

        let near = interval(&db, 20, 21, &[]).await?;
        interval(&db, 40, 41, &[]).await?;
        // Post predates every interval; closest end is day 21.
        post(&db, "p1", 15).await?;

        let results = build_post_attributions(&db, &config, 0, 10, true).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].interval_id, Some(near));

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn cache_is_served_until_rebuild() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path().join("atlas.redb")).await?;
        let config = Config::default();

        interval(&db, 10, 11, &["n1"]).await?;
        post(&db, "p1", 10).await?;

        let built = build_post_attributions(&db, &config, 30, 10, false).await?;
        assert_eq!(built.len(), 1);

        // A new post appears, but the cache answers until a rebuild.
        post(&db, "p2", 10).await?;
        let cached = build_post_attributions(&db, &config, 30, 10, false).await?;
        assert_eq!(cached.len(), 1);

        let rebuilt = build_post_attributions(&db, &config, 30, 10, true).await?;
        assert_eq!(rebuilt.len(), 2);

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn communities_come_from_post_interval_only() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path().join("atlas.redb")).await?;
        let config = Config::default();

        let interval_id = interval(&db, 10, 11, &["in_frame", "missing"]).await?;
        post(&db, "p1", 10).await?;

        // Only one attributed account has a community in the post interval.
        db.replace_frame_artifacts(
            interval_id,
            30,
            vec![],
            vec![(
                id("in_frame"),
                atlas_store::CommunityRecord {
                    community: 4,
                    confidence: 1.0,
                },
            )],
            vec![],
            atlas_store::FrameRecord {
                payload_json: "{}".to_owned(),
                node_count: 0,
                edge_count: 0,
                built_at: Timestamp::now(),
                builder_version: "test".to_owned(),
            },
            "layout",
        )
        .await?;

        let results = build_post_attributions(&db, &config, 30, 10, true).await?;
        assert_eq!(results[0].community_ids, vec![4]);

        Ok(())
    }
}
