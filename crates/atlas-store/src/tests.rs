use atlas_core::{
    AccountId, EdgeKind, FollowEventKind, InteractionKind, RunStatus, SnapshotKind, Timestamp, Vec3,
};
use atlas_util_error::BoxedErrorResult;
use tempfile::{TempDir, tempdir};

use crate::{
    AccountRecord, CommunityRecord, Database, EdgeRecord, FrameRecord, IntervalRecord, PostRecord,
};

pub(crate) async fn temp_db() -> BoxedErrorResult<(TempDir, Database)> {
    let dir = tempdir()?;
    let db = Database::open(dir.path().join("atlas.redb")).await?;
    Ok((dir, db))
}

fn account(id: &str) -> AccountId {
    AccountId::from(id)
}

fn observation(handle: &str, followers: u64) -> AccountRecord {
    AccountRecord {
        handle: Some(handle.to_owned()),
        display_name: Some(handle.to_uppercase()),
        followers_count: Some(followers),
        last_seen_at: Timestamp::now(),
        ..Default::default()
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_run_lifecycle() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;

    let run_id = db.start_run("1.0.0", "{}").await?;
    let record = db.get_run(run_id).await?.expect("run exists");
    assert_eq!(record.status, RunStatus::Running);
    assert!(record.finished_at.is_none());

    db.finish_run(run_id, RunStatus::Completed, None).await?;
    let record = db.get_run(run_id).await?.expect("run exists");
    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.finished_at.is_some());

    let second = db.start_run("1.0.0", "{}").await?;
    assert!(run_id < second);

    let listed = db.list_runs(10).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].0, second);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_stale_run_recovered_on_reopen() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("atlas.redb");

    {
        let db = Database::open(&path).await?;
        db.start_run("1.0.0", "{}").await?;
        // Simulates a process death with the run still `Running`.
    }

    let db = Database::open(&path).await?;
    let listed = db.list_runs(10).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].1.status, RunStatus::Failed);
    assert_eq!(listed[0].1.notes.as_deref(), Some("interrupted"));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_empty_snapshot_collected_on_reopen() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("atlas.redb");

    let (empty_id, full_id) = {
        let db = Database::open(&path).await?;
        let run_id = db.start_run("1.0.0", "{}").await?;

        let empty_id = db.create_snapshot(run_id, SnapshotKind::Followers).await?;

        let full_id = db.create_snapshot(run_id, SnapshotKind::Followers).await?;
        db.write_with(|tx| {
            Database::insert_snapshot_members_tx(
                SnapshotKind::Followers,
                full_id,
                &[(account("a"), 0)],
                tx,
            )
        })
        .await?;
        db.finalize_snapshot(full_id, 1).await?;
        db.finish_run(run_id, RunStatus::Completed, None).await?;
        (empty_id, full_id)
    };

    let db = Database::open(&path).await?;
    assert!(db.get_snapshot(empty_id).await?.is_none());
    assert!(db.get_snapshot(full_id).await?.is_some());
    assert_eq!(
        db.snapshot_member_ids(SnapshotKind::Followers, full_id)
            .await?
            .len(),
        1
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_account_upsert_overwrites_but_keeps_created_at() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let id = account("42");

    let mut first = observation("alice", 100);
    first.created_at = Some(Timestamp::from(1000));
    db.upsert_account(id.clone(), first).await?;

    // Second observation lacks created_at, has fresher metrics.
    db.upsert_account(id.clone(), observation("alice_renamed", 150))
        .await?;

    let record = db.get_account(id).await?.expect("account exists");
    assert_eq!(record.handle.as_deref(), Some("alice_renamed"));
    assert_eq!(record.followers_count, Some(150));
    assert_eq!(record.created_at, Some(Timestamp::from(1000)));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_snapshot_positions_contiguous_and_idempotent() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let run_id = db.start_run("1.0.0", "{}").await?;
    let snapshot_id = db.create_snapshot(run_id, SnapshotKind::Followers).await?;

    // Two "pages" with run-wide positions; second page replays one member,
    // as a retried page would.
    db.write_with(|tx| {
        Database::insert_snapshot_members_tx(
            SnapshotKind::Followers,
            snapshot_id,
            &[(account("a"), 0), (account("b"), 1)],
            tx,
        )
    })
    .await?;
    db.write_with(|tx| {
        Database::insert_snapshot_members_tx(
            SnapshotKind::Followers,
            snapshot_id,
            &[(account("b"), 5), (account("c"), 2)],
            tx,
        )
    })
    .await?;
    db.finalize_snapshot(snapshot_id, 3).await?;

    let ordered = db
        .snapshot_members_ordered(SnapshotKind::Followers, snapshot_id)
        .await?;
    let positions: Vec<u64> = ordered.iter().map(|(_, p)| *p).collect();
    assert_eq!(positions, vec![0, 1, 2], "contiguous [0, N), first write wins");
    assert_eq!(ordered[0].0, account("a"));
    assert_eq!(ordered[1].0, account("b"));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_latest_snapshot_skips_other_kind() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let run_id = db.start_run("1.0.0", "{}").await?;

    let followers = db.create_snapshot(run_id, SnapshotKind::Followers).await?;
    db.write_with(|tx| {
        Database::insert_snapshot_members_tx(
            SnapshotKind::Followers,
            followers,
            &[(account("a"), 0)],
            tx,
        )
    })
    .await?;
    db.finalize_snapshot(followers, 1).await?;

    let following = db.create_snapshot(run_id, SnapshotKind::Following).await?;
    db.write_with(|tx| {
        Database::insert_snapshot_members_tx(
            SnapshotKind::Following,
            following,
            &[(account("b"), 0)],
            tx,
        )
    })
    .await?;
    db.finalize_snapshot(following, 1).await?;

    let (latest_id, latest) = db
        .latest_snapshot(SnapshotKind::Followers)
        .await?
        .expect("follower snapshot exists");
    assert_eq!(latest_id, followers);
    assert_eq!(latest.kind, SnapshotKind::Followers);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_interval_follow_events_roundtrip() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;

    let interval_id = db
        .insert_interval(
            IntervalRecord {
                kind: SnapshotKind::Followers,
                snapshot_start_id: 0.into(),
                snapshot_end_id: 1.into(),
                start_at: Timestamp::from(100),
                end_at: Timestamp::from(200),
                new_count: 2,
                lost_count: 1,
            },
            vec![
                (account("d"), FollowEventKind::New),
                (account("e"), FollowEventKind::New),
                (account("a"), FollowEventKind::Lost),
            ],
        )
        .await?;

    let new_events = db
        .follow_events_of(interval_id, Some(FollowEventKind::New))
        .await?;
    assert_eq!(new_events.len(), 2);
    let lost_events = db
        .follow_events_of(interval_id, Some(FollowEventKind::Lost))
        .await?;
    assert_eq!(lost_events.len(), 1);
    assert_eq!(lost_events[0].0, account("a"));

    let union = db.new_follower_union(vec![interval_id]).await?;
    assert!(union.contains(&account("d")) && union.contains(&account("e")));
    assert!(!union.contains(&account("a")));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_replace_frame_artifacts_is_idempotent() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let interval_id = 7.into();

    let edges = vec![EdgeRecord {
        src_id: account("a"),
        dst_id: account("b"),
        kind: EdgeKind::Mutual,
        weight: 1.0,
        metadata_json: None,
    }];
    let communities = vec![(account("a"), CommunityRecord { community: 0, confidence: 1.0 })];
    let positions = vec![(account("a"), Vec3::new(1.0, 2.0, 3.0))];
    let frame = FrameRecord {
        payload_json: "{}".to_owned(),
        node_count: 1,
        edge_count: 1,
        built_at: Timestamp::now(),
        builder_version: "test".to_owned(),
    };

    for _ in 0..2 {
        db.replace_frame_artifacts(
            interval_id,
            30,
            edges.clone(),
            communities.clone(),
            positions.clone(),
            frame.clone(),
            "layout",
        )
        .await?;
    }

    assert_eq!(db.edges_of(interval_id).await?.len(), 1);
    assert_eq!(db.communities_of(interval_id).await?.len(), 1);
    assert_eq!(db.positions_of(interval_id).await?.len(), 1);
    assert!(db.get_frame(interval_id, 30).await?.is_some());
    assert!(db.get_frame(interval_id, 7).await?.is_none());

    // History is append-only: two builds leave two entries.
    let history = db.position_history_for(account("a"), 10).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].2.source, "layout");

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_posts_window_and_engagers() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;
    let interval_id = 0.into();

    for (id, secs) in [("p1", 1_000u64), ("p2", 2_000), ("p3", 9_000)] {
        db.upsert_post(
            id.into(),
            PostRecord {
                author_id: account("ego"),
                created_at: Some(Timestamp::from(secs)),
                text: format!("post {id}"),
                metrics_json: "{}".to_owned(),
                conversation_id: None,
                in_reply_to: None,
                last_seen_at: Timestamp::now(),
            },
        )
        .await?;
    }

    let window = db
        .posts_in_window(Timestamp::from(500), Timestamp::from(2_500))
        .await?;
    let ids: Vec<&str> = window.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["p2", "p1"], "newest first, p3 outside window");

    db.write_with(|tx| {
        Database::insert_post_engager_tx(
            &"p1".into(),
            interval_id,
            &account("x"),
            atlas_core::EngagerKind::Like,
            tx,
        )?;
        Database::insert_post_engager_tx(
            &"p1".into(),
            interval_id,
            &account("y"),
            atlas_core::EngagerKind::Reply,
            tx,
        )?;
        // Duplicate insert is a no-op thanks to key uniqueness.
        Database::insert_post_engager_tx(
            &"p1".into(),
            interval_id,
            &account("x"),
            atlas_core::EngagerKind::Like,
            tx,
        )
    })
    .await?;

    let engagers = db.engagers_for_post("p1".into()).await?;
    assert_eq!(engagers.len(), 2);

    let grouped = db
        .engagers_by_post_in_window(Timestamp::ZERO, Timestamp::from(10_000))
        .await?;
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].0.as_str(), "p1");
    assert_eq!(grouped[0].1.len(), 2);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_interaction_window_scan() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;

    let mk = |secs: u64, src: &str| crate::InteractionEventRecord {
        interval_id: 0.into(),
        created_at: Some(Timestamp::from(secs)),
        src_id: account(src),
        dst_id: account("ego"),
        kind: InteractionKind::Reply,
        post_id: None,
        raw_fetch_id: None,
    };
    db.insert_interaction_events(vec![mk(1_000, "a"), mk(2_000, "b"), mk(9_000, "c")])
        .await?;

    let window = db
        .interactions_in_window(Timestamp::from(500), Timestamp::from(2_500))
        .await?;
    assert_eq!(window.len(), 2);
    assert!(window.iter().all(|e| e.src_id != account("c")));

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_db_version_guard() -> BoxedErrorResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("atlas.redb");

    {
        let _db = Database::open(&path).await?;
    }
    // Simulate a database produced by a newer binary.
    {
        let raw = redb::Database::create(&path)?;
        let inner = redb_bincode::Database::from(raw);
        Database::write_with_inner(&inner, |tx| {
            let mut version_table = tx.open_table(&crate::db_version::TABLE)?;
            version_table.insert(&(), &999)?;
            Ok(())
        })
        .await?;
    }

    assert!(Database::open(&path).await.is_err());
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_list_accounts_search() -> BoxedErrorResult<()> {
    let (_dir, db) = temp_db().await?;

    db.upsert_account(account("1"), observation("alice", 10))
        .await?;
    db.upsert_account(account("2"), observation("bob", 20))
        .await?;
    db.upsert_account(account("3"), observation("alicia", 30))
        .await?;

    let all = db.list_accounts(10, None).await?;
    assert_eq!(all.len(), 3);

    let filtered = db.list_accounts(10, Some("ali".to_owned())).await?;
    assert_eq!(filtered.len(), 2);

    let by_handle = db.find_account_by_handle("bob".to_owned()).await?;
    assert_eq!(by_handle, Some(account("2")));

    Ok(())
}
