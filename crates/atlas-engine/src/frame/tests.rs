use atlas_core::{AccountId, InteractionKind, SnapshotKind, Timestamp};
use atlas_store::{AccountRecord, Database, InteractionEventRecord};
use atlas_util_error::BoxedErrorResult;
use tempfile::tempdir;

use super::*;
use crate::diff::compute_interval_diff;

const DAY: u64 = 86_400;

fn id(s: &str) -> AccountId {
    AccountId::from(s)
}

async fn seed_account(db: &Database, account: &str, followers: u64) -> BoxedErrorResult<()> {
    db.upsert_account(
        id(account),
        AccountRecord {
            handle: Some(account.to_owned()),
            display_name: Some(account.to_uppercase()),
            followers_count: Some(followers),
            last_seen_at: Timestamp::from(100 * DAY),
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

async fn seed_snapshot(
    db: &Database,
    run: atlas_core::RunId,
    kind: SnapshotKind,
    members: &[&str],
) -> BoxedErrorResult<atlas_core::SnapshotId> {
    let snapshot_id = db.create_snapshot(run, kind).await?;
    let rows: Vec<(AccountId, u64)> = members
        .iter()
        .enumerate()
        .map(|(position, name)| (id(name), position as u64))
        .collect();
    db.write_with(|tx| Database::insert_snapshot_members_tx(kind, snapshot_id, &rows, tx))
        .await?;
    db.finalize_snapshot(snapshot_id, members.len() as u64)
        .await?;
    Ok(snapshot_id)
}

/// Store fixture: an ego with a handful of followers, one interval with two
/// new followers, and a sprinkle of engagement evidence.
async fn fixture(db: &Database) -> BoxedErrorResult<atlas_core::IntervalId> {
    let run = db.start_run("1.0.0", "{}").await?;

    for (account, followers) in [
        ("ego", 1_500u64),
        ("celeb", 200_000),
        ("mid", 20_000),
        ("friend", 3_000),
        ("peer_a", 900),
        ("peer_b", 1_000),
        ("tiny", 40),
    ] {
        seed_account(db, account, followers).await?;
    }

    let start = seed_snapshot(
        db,
        run,
        SnapshotKind::Followers,
        &["celeb", "mid", "friend", "tiny"],
    )
    .await?;
    seed_snapshot(db, run, SnapshotKind::Following, &["friend", "mid"]).await?;
    let end = seed_snapshot(
        db,
        run,
        SnapshotKind::Followers,
        &["celeb", "mid", "friend", "tiny", "peer_a", "peer_b"],
    )
    .await?;

    let (interval_id, _) = compute_interval_diff(db, start, end).await?;
    let interval = db.get_interval(interval_id).await?.expect("interval");

    db.insert_interaction_events(vec![
        InteractionEventRecord {
            interval_id,
            created_at: Some(interval.end_at.saturating_sub_days(1)),
            src_id: id("friend"),
            dst_id: id("ego"),
            kind: InteractionKind::Reply,
            post_id: None,
            raw_fetch_id: None,
        },
        InteractionEventRecord {
            interval_id,
            created_at: Some(interval.end_at.saturating_sub_days(2)),
            src_id: id("mid"),
            dst_id: id("ego"),
            kind: InteractionKind::Retweet,
            post_id: None,
            raw_fetch_id: None,
        },
    ])
    .await?;

    db.finish_run(run, atlas_core::RunStatus::Completed, None)
        .await?;
    Ok(interval_id)
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn build_is_deterministic_and_persists() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;
    let interval_id = fixture(&db).await?;

    let builder = FrameBuilder::new(&db);
    let first = builder.build_and_persist(interval_id, 30, &id("ego")).await?;
    let second = builder.build_and_persist(interval_id, 30, &id("ego")).await?;

    let first_json = serde_json::to_string(&first)?;
    let second_json = serde_json::to_string(&second)?;
    assert_eq!(first_json, second_json, "rebuilds are byte-identical");

    let stored = db.get_frame(interval_id, 30).await?.expect("frame persisted");
    assert_eq!(stored.payload_json, first_json);
    assert_eq!(stored.node_count, first.stats.node_count);

    assert_eq!(
        db.positions_of(interval_id).await?.len() as u64,
        first.stats.node_count
    );
    assert_eq!(
        db.communities_of(interval_id).await?.len() as u64,
        first.stats.node_count
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn frame_flags_and_pruning() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;
    let interval_id = fixture(&db).await?;

    let payload = FrameBuilder::new(&db)
        .build_and_persist(interval_id, 30, &id("ego"))
        .await?;

    let ego = payload.nodes.iter().find(|n| n.is_ego).expect("ego present");
    assert_eq!(ego.id, id("ego"));
    assert_eq!(ego.community, 0, "ego pinned to community 0");
    assert_eq!((ego.x, ego.y, ego.z), (0.0, 0.0, 0.0), "ego at origin");

    // "tiny" (40 followers) is filtered by the follower floor.
    assert!(payload.nodes.iter().all(|n| n.id != id("tiny")));

    // The two interval newcomers carry the flag.
    let new_ids: Vec<&AccountId> = payload
        .nodes
        .iter()
        .filter(|n| n.is_new)
        .map(|n| &n.id)
        .collect();
    assert_eq!(new_ids.len(), 2);
    assert!(new_ids.contains(&&id("peer_a")) && new_ids.contains(&&id("peer_b")));
    assert_eq!(payload.stats.new_followers, 2);

    // Mutual follower keeps a direct ego edge.
    assert!(
        payload
            .edges
            .iter()
            .any(|e| e.edge_type == "mutual" && e.source == id("friend")),
        "friend is both follower and followee"
    );

    // No duplicate (source, target) pairs among structural edges.
    let mut structural_pairs: Vec<(&AccountId, &AccountId)> = payload
        .edges
        .iter()
        .filter(|e| e.edge_type != "direct_interaction" && e.edge_type != "co_engagement")
        .map(|e| (&e.source, &e.target))
        .collect();
    let total = structural_pairs.len();
    structural_pairs.sort();
    structural_pairs.dedup();
    assert_eq!(structural_pairs.len(), total);

    // Stats agree with the payload body.
    assert_eq!(payload.stats.node_count, payload.nodes.len() as u64);
    assert_eq!(payload.stats.edge_count, payload.edges.len() as u64);
    assert_eq!(
        payload.stats.community_count,
        payload.communities.len() as u64
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn node_cap_retains_most_important() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;
    let run = db.start_run("1.0.0", "{}").await?;

    seed_account(&db, "ego", 5_000).await?;
    let mut members = vec![];
    for index in 0..12 {
        let name = format!("acct{index:02}");
        seed_account(&db, &name, 600 + index * 100).await?;
        members.push(name);
    }
    let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();

    let start = seed_snapshot(&db, run, SnapshotKind::Followers, &member_refs[..10]).await?;
    let end = seed_snapshot(&db, run, SnapshotKind::Followers, &member_refs).await?;
    let (interval_id, _) = compute_interval_diff(&db, start, end).await?;

    let limits = FrameLimits {
        max_nodes: 5,
        ..Default::default()
    };
    let payload = FrameBuilder::with_limits(&db, limits)
        .build_and_persist(interval_id, 0, &id("ego"))
        .await?;

    assert_eq!(payload.stats.node_count, 5);

    // Importance ordering holds across the retained/dropped boundary.
    let retained_min = payload
        .nodes
        .iter()
        .map(|n| n.importance)
        .fold(f64::INFINITY, f64::min);
    let full = FrameBuilder::new(&db)
        .build(interval_id, 0, &id("ego"))
        .await?;
    let dropped_max = full
        .payload
        .nodes
        .iter()
        .filter(|n| !payload.nodes.iter().any(|kept| kept.id == n.id))
        .map(|n| n.importance)
        .fold(0.0, f64::max);
    assert!(dropped_max <= retained_min);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn missing_interval_is_an_error() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;

    let result = FrameBuilder::new(&db)
        .build(atlas_core::IntervalId::from(99), 30, &id("ego"))
        .await;
    assert!(matches!(result, Err(FrameError::IntervalNotFound { .. })));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn layout_seeds_from_previous_interval() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;
    let run = db.start_run("1.0.0", "{}").await?;

    for (account, followers) in [("ego", 5_000u64), ("a", 1_000), ("b", 1_200)] {
        seed_account(&db, account, followers).await?;
    }

    let first = seed_snapshot(&db, run, SnapshotKind::Followers, &["a"]).await?;
    let second = seed_snapshot(&db, run, SnapshotKind::Followers, &["a", "b"]).await?;
    let third = seed_snapshot(&db, run, SnapshotKind::Followers, &["a", "b"]).await?;

    let (early_interval, _) = compute_interval_diff(&db, first, second).await?;
    let (late_interval, _) = compute_interval_diff(&db, second, third).await?;

    let builder = FrameBuilder::new(&db);
    let early = builder
        .build_and_persist(early_interval, 30, &id("ego"))
        .await?;
    let late = builder
        .build_and_persist(late_interval, 30, &id("ego"))
        .await?;

    assert!(early.nodes.iter().any(|n| n.id == id("a")));
    assert!(late.nodes.iter().any(|n| n.id == id("a")));

    // Positions persisted per interval; the history trail accumulates one
    // row per build.
    assert!(!db.positions_of(early_interval).await?.is_empty());
    assert!(!db.positions_of(late_interval).await?.is_empty());
    let history = db.position_history_for(id("a"), 10).await?;
    assert_eq!(history.len(), 2);

    Ok(())
}
