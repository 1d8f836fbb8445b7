//! The collector: one run of paginated ingestion into the layered store,
//! followed by interval diffing and best-effort engagement collection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use atlas_client::{ClientError, NetworkClient, Page, PostSummary, UserProfile};
use atlas_core::{
    AccountId, EngagerKind, InteractionKind, IntervalId, RunId, RunStatus, SnapshotId,
    SnapshotKind, Timestamp,
};
use atlas_store::{
    AccountRecord, Database, DbError, InteractionEventRecord, PostRecord, RawFetchRecord,
};
use atlas_util_error::FmtCompact as _;
use futures::StreamExt as _;
use futures::pin_mut;
use serde::Serialize;
use snafu::{ResultExt as _, Snafu};
use tracing::{info, warn};

use crate::Config;
use crate::diff::{DiffError, compute_interval_diff};

const LOG_TARGET: &str = "atlas::collector";

/// Page budget for each engagement sub-fetch; the engager cap usually stops
/// consumption earlier.
const ENGAGEMENT_MAX_PAGES: usize = 3;

#[derive(Debug, Snafu)]
pub enum CollectorError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(transparent)]
    Diff { source: DiffError },
    #[snafu(display("Upstream failure: {source}"))]
    Client { source: ClientError },
    #[snafu(display("Ego unresolved: supply a handle, or the id of a known account"))]
    EgoUnresolved,
    #[snafu(display("Run cancelled"))]
    Cancelled,
}

pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

/// What one collection run is asked to do.
#[derive(Debug, Clone, Default)]
pub struct CollectOpts {
    pub username: Option<String>,
    pub user_id: Option<AccountId>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntervalSummary {
    pub interval_id: IntervalId,
    pub new: u64,
    pub lost: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub user_id: AccountId,
    pub followers_snapshot_id: SnapshotId,
    pub followers_count: u64,
    pub following_snapshot_id: SnapshotId,
    pub following_count: u64,
    pub follower_interval: Option<IntervalSummary>,
    pub following_interval: Option<IntervalSummary>,
    /// True when the engagement phase failed; the run still completes.
    pub engagement_degraded: bool,
}

pub struct Collector {
    db: Arc<Database>,
    client: NetworkClient,
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl Collector {
    pub fn new(db: Arc<Database>, client: NetworkClient, config: Config) -> Self {
        Self {
            db,
            client,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle observed between pages; setting it makes the run fail with a
    /// `cancelled` note at its next suspension point.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn check_cancelled(&self) -> CollectorResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(CollectorError::Cancelled);
        }
        Ok(())
    }

    /// Run one full collection cycle. The run row is terminal either way:
    /// `completed`, or `failed` with the error (or `cancelled`) as notes.
    pub async fn run_collection(&self, opts: CollectOpts) -> CollectorResult<RunSummary> {
        let config_json =
            serde_json::to_string(&self.config).expect("Config always serializes");
        let run_id = self
            .db
            .start_run(&self.config.config_version, &config_json)
            .await?;

        match self.run_collection_inner(run_id, opts).await {
            Ok(summary) => {
                self.db.finish_run(run_id, RunStatus::Completed, None).await?;
                Ok(summary)
            }
            Err(err) => {
                let note = match &err {
                    CollectorError::Cancelled => "cancelled".to_owned(),
                    other => other.fmt_compact().to_string(),
                };
                self.db
                    .finish_run(run_id, RunStatus::Failed, Some(note))
                    .await?;
                Err(err)
            }
        }
    }

    async fn run_collection_inner(
        &self,
        run_id: RunId,
        opts: CollectOpts,
    ) -> CollectorResult<RunSummary> {
        self.check_cancelled()?;

        let (ego_id, ego_handle) = self.resolve_ego(&opts).await?;
        info!(target: LOG_TARGET, %run_id, ego = %ego_id, handle = %ego_handle, "Starting collection");

        // Prior snapshots, for diffing, before the new ones land.
        let prev_followers = self.db.latest_snapshot(SnapshotKind::Followers).await?;
        let prev_following = self.db.latest_snapshot(SnapshotKind::Following).await?;

        let (followers_snapshot_id, followers_count) = self
            .collect_snapshot(run_id, SnapshotKind::Followers, &ego_handle, opts.max_pages)
            .await?;
        let (following_snapshot_id, following_count) = self
            .collect_snapshot(run_id, SnapshotKind::Following, &ego_handle, opts.max_pages)
            .await?;

        let follower_interval = match prev_followers {
            Some((prev_id, _)) => {
                Some(self.diff_summary(prev_id, followers_snapshot_id).await?)
            }
            None => None,
        };
        let following_interval = match prev_following {
            Some((prev_id, _)) => {
                Some(self.diff_summary(prev_id, following_snapshot_id).await?)
            }
            None => None,
        };

        // Engagement is keyed on the follower interval when there is one,
        // else the following interval, else skipped entirely. Best-effort:
        // any failure (other than cancellation) degrades the run instead of
        // failing it.
        let engagement_interval = follower_interval
            .as_ref()
            .or(following_interval.as_ref())
            .map(|summary| summary.interval_id);
        let mut engagement_degraded = false;
        if let Some(interval_id) = engagement_interval {
            if let Err(err) = self
                .collect_engagement(run_id, interval_id, &ego_id, &ego_handle)
                .await
            {
                if matches!(err, CollectorError::Cancelled) {
                    return Err(err);
                }
                warn!(
                    target: LOG_TARGET,
                    %run_id,
                    err = %err.fmt_compact(),
                    "Engagement collection degraded"
                );
                engagement_degraded = true;
            }
        }

        Ok(RunSummary {
            run_id,
            user_id: ego_id,
            followers_snapshot_id,
            followers_count,
            following_snapshot_id,
            following_count,
            follower_interval,
            following_interval,
            engagement_degraded,
        })
    }

    async fn resolve_ego(&self, opts: &CollectOpts) -> CollectorResult<(AccountId, String)> {
        if let Some(username) = &opts.username {
            let profile = self
                .client
                .user_by_handle(username)
                .await
                .context(ClientSnafu)?;
            let ego_id = profile.id.clone();
            self.db
                .upsert_account(ego_id.clone(), account_observation(&profile))
                .await?;
            return Ok((ego_id, username.clone()));
        }

        if let Some(user_id) = &opts.user_id {
            let handle = self
                .db
                .get_account(user_id.clone())
                .await?
                .and_then(|record| record.handle)
                .ok_or(CollectorError::EgoUnresolved)?;
            return Ok((user_id.clone(), handle));
        }

        Err(CollectorError::EgoUnresolved)
    }

    async fn diff_summary(
        &self,
        start: SnapshotId,
        end: SnapshotId,
    ) -> CollectorResult<IntervalSummary> {
        let (interval_id, record) = compute_interval_diff(&self.db, start, end).await?;
        Ok(IntervalSummary {
            interval_id,
            new: record.new_count,
            lost: record.lost_count,
        })
    }

    /// Paginate one membership kind into a fresh snapshot, committing after
    /// every page: the raw payload, the account upserts and the membership
    /// rows land together, so a crash loses at most the unfinished page.
    async fn collect_snapshot(
        &self,
        run_id: RunId,
        kind: SnapshotKind,
        handle: &str,
        max_pages: Option<usize>,
    ) -> CollectorResult<(SnapshotId, u64)> {
        let snapshot_id = self.db.create_snapshot(run_id, kind).await?;
        let endpoint = format!("users/{handle}/{kind}");

        let stream = match kind {
            SnapshotKind::Followers => self.client.followers(handle, max_pages).left_stream(),
            SnapshotKind::Following => self.client.following(handle, max_pages).right_stream(),
        };
        pin_mut!(stream);

        let mut seen: BTreeSet<AccountId> = BTreeSet::new();
        // Positions increase monotonically across the whole pagination, not
        // per page; 0 is the newest entry as returned upstream.
        let mut position = 0u64;

        while let Some(page) = stream.next().await {
            self.check_cancelled()?;
            let page = page.context(ClientSnafu)?;

            let mut members = vec![];
            let mut observations = vec![];
            for profile in &page.items {
                if !seen.insert(profile.id.clone()) {
                    continue;
                }
                members.push((profile.id.clone(), position));
                position += 1;
                observations.push((profile.id.clone(), account_observation(profile)));
            }

            let raw = raw_fetch_record(run_id, &endpoint, &page);
            self.db
                .write_with(|tx| {
                    Database::insert_raw_fetch_tx(&raw, tx)?;
                    Database::upsert_accounts_tx(observations, tx)?;
                    Database::insert_snapshot_members_tx(kind, snapshot_id, &members, tx)?;
                    Ok(())
                })
                .await?;

            info!(
                target: LOG_TARGET,
                %snapshot_id,
                %kind,
                page_members = members.len(),
                total = seen.len(),
                truncated = page.truncated,
                "Stored snapshot page"
            );
        }

        let count = seen.len() as u64;
        self.db.finalize_snapshot(snapshot_id, count).await?;
        Ok((snapshot_id, count))
    }

    /// Engagement collection: the ego's recent posts, then who replied,
    /// quoted, reposted and (when the fallback upstream is configured)
    /// liked each of them, recorded as interaction events and per-post
    /// engagers. Mentions of the ego round out the evidence.
    async fn collect_engagement(
        &self,
        run_id: RunId,
        interval_id: IntervalId,
        ego_id: &AccountId,
        ego_handle: &str,
    ) -> CollectorResult<()> {
        let posts = self.collect_top_posts(run_id, ego_id, ego_handle).await?;
        info!(target: LOG_TARGET, posts = posts.len(), "Collecting engagement");

        for post in &posts {
            self.collect_post_engagers(run_id, interval_id, ego_id, post)
                .await?;
        }

        self.collect_mentions(run_id, interval_id, ego_id, ego_handle)
            .await?;
        Ok(())
    }

    async fn collect_top_posts(
        &self,
        run_id: RunId,
        ego_id: &AccountId,
        ego_handle: &str,
    ) -> CollectorResult<Vec<PostSummary>> {
        let endpoint = format!("users/{ego_handle}/posts");
        let stream = self.client.user_posts(ego_handle, false, None);
        pin_mut!(stream);

        let mut posts: Vec<PostSummary> = vec![];
        while let Some(page) = stream.next().await {
            self.check_cancelled()?;
            let page = page.context(ClientSnafu)?;

            let keep: Vec<PostSummary> = page
                .items
                .iter()
                .take(self.config.max_top_posts_per_run - posts.len())
                .cloned()
                .collect();
            let raw = raw_fetch_record(run_id, &endpoint, &page);
            self.db
                .write_with(|tx| {
                    Database::insert_raw_fetch_tx(&raw, tx)?;
                    for post in &keep {
                        Database::upsert_post_tx(&post.id, post_record(ego_id, post), tx)?;
                    }
                    Ok(())
                })
                .await?;

            posts.extend(keep);
            if self.config.max_top_posts_per_run <= posts.len() {
                break;
            }
        }
        Ok(posts)
    }

    async fn collect_post_engagers(
        &self,
        run_id: RunId,
        interval_id: IntervalId,
        ego_id: &AccountId,
        post: &PostSummary,
    ) -> CollectorResult<()> {
        let post_key = post.id.as_str();
        let mut budget = self.config.max_engagers_per_post;
        // Replies and quotes older than the co-engagement window carry no
        // pairing signal and are not recorded.
        let window_floor =
            Timestamp::now().saturating_sub_secs(self.config.co_engagement_window_hours * 3_600);

        // Replies and quotes carry both an author profile and a timestamp.
        for (kind, engager_kind) in [
            (InteractionKind::Reply, EngagerKind::Reply),
            (InteractionKind::Quote, EngagerKind::Quote),
        ] {
            let stream = match kind {
                InteractionKind::Reply => self
                    .client
                    .post_replies(post_key, Some(ENGAGEMENT_MAX_PAGES))
                    .left_stream(),
                _ => self
                    .client
                    .post_quotes(post_key, Some(ENGAGEMENT_MAX_PAGES))
                    .right_stream(),
            };
            pin_mut!(stream);

            while let Some(page) = stream.next().await {
                self.check_cancelled()?;
                let page = page.context(ClientSnafu)?;

                let endpoint = format!("posts/{post_key}/{kind}");
                let raw = raw_fetch_record(run_id, &endpoint, &page);
                let mut events = vec![];
                let mut engagers = vec![];
                let mut observations = vec![];
                for item in page.items.iter().take(budget) {
                    let Some(author) = &item.author else {
                        continue;
                    };
                    if item.created_at.is_some_and(|at| at < window_floor) {
                        continue;
                    }
                    observations.push((author.id.clone(), account_observation(author)));
                    events.push(InteractionEventRecord {
                        interval_id,
                        created_at: item.created_at,
                        src_id: author.id.clone(),
                        dst_id: ego_id.clone(),
                        kind,
                        post_id: Some(post.id.clone()),
                        raw_fetch_id: None,
                    });
                    engagers.push(author.id.clone());
                }
                budget = budget.saturating_sub(engagers.len());

                let post_id = post.id.clone();
                self.db
                    .write_with(|tx| {
                        Database::insert_raw_fetch_tx(&raw, tx)?;
                        Database::upsert_accounts_tx(observations, tx)?;
                        for account_id in &engagers {
                            Database::insert_post_engager_tx(
                                &post_id,
                                interval_id,
                                account_id,
                                engager_kind,
                                tx,
                            )?;
                        }
                        Ok(())
                    })
                    .await?;
                self.db
                    .insert_interaction_events(events)
                    .await?;

                if budget == 0 {
                    break;
                }
            }
            if budget == 0 {
                return Ok(());
            }
        }

        // Retweeters and likers are bare profile lists without timestamps.
        self.collect_profile_engagers(
            run_id,
            interval_id,
            ego_id,
            post,
            InteractionKind::Retweet,
            EngagerKind::Retweet,
            &mut budget,
        )
        .await?;
        if budget == 0 {
            return Ok(());
        }
        if self.client.has_like_lists() {
            self.collect_profile_engagers(
                run_id,
                interval_id,
                ego_id,
                post,
                InteractionKind::Like,
                EngagerKind::Like,
                &mut budget,
            )
            .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_profile_engagers(
        &self,
        run_id: RunId,
        interval_id: IntervalId,
        ego_id: &AccountId,
        post: &PostSummary,
        kind: InteractionKind,
        engager_kind: EngagerKind,
        budget: &mut usize,
    ) -> CollectorResult<()> {
        let post_key = post.id.as_str();
        let stream = match kind {
            InteractionKind::Retweet => self
                .client
                .post_retweeters(post_key, Some(ENGAGEMENT_MAX_PAGES))
                .left_stream(),
            _ => self
                .client
                .post_likers(post_key, Some(ENGAGEMENT_MAX_PAGES))
                .right_stream(),
        };
        pin_mut!(stream);

        while let Some(page) = stream.next().await {
            self.check_cancelled()?;
            let page = page.context(ClientSnafu)?;

            let endpoint = format!("posts/{post_key}/{kind}");
            let raw = raw_fetch_record(run_id, &endpoint, &page);
            let mut events = vec![];
            let mut engagers = vec![];
            let mut observations = vec![];
            for profile in page.items.iter().take(*budget) {
                observations.push((profile.id.clone(), account_observation(profile)));
                events.push(InteractionEventRecord {
                    interval_id,
                    created_at: None,
                    src_id: profile.id.clone(),
                    dst_id: ego_id.clone(),
                    kind,
                    post_id: Some(post.id.clone()),
                    raw_fetch_id: None,
                });
                engagers.push(profile.id.clone());
            }
            *budget = budget.saturating_sub(engagers.len());

            let post_id = post.id.clone();
            self.db
                .write_with(|tx| {
                    Database::insert_raw_fetch_tx(&raw, tx)?;
                    Database::upsert_accounts_tx(observations, tx)?;
                    for account_id in &engagers {
                        Database::insert_post_engager_tx(
                            &post_id,
                            interval_id,
                            account_id,
                            engager_kind,
                            tx,
                        )?;
                    }
                    Ok(())
                })
                .await?;
            self.db.insert_interaction_events(events).await?;

            if *budget == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn collect_mentions(
        &self,
        run_id: RunId,
        interval_id: IntervalId,
        ego_id: &AccountId,
        ego_handle: &str,
    ) -> CollectorResult<()> {
        let endpoint = format!("users/{ego_handle}/mentions");
        let stream = self.client.mentions(ego_handle, Some(ENGAGEMENT_MAX_PAGES));
        pin_mut!(stream);

        while let Some(page) = stream.next().await {
            self.check_cancelled()?;
            let page = page.context(ClientSnafu)?;

            let raw = raw_fetch_record(run_id, &endpoint, &page);
            let mut events = vec![];
            let mut observations = vec![];
            for item in &page.items {
                let Some(author) = &item.author else {
                    continue;
                };
                if author.id == *ego_id {
                    continue;
                }
                observations.push((author.id.clone(), account_observation(author)));
                events.push(InteractionEventRecord {
                    interval_id,
                    created_at: item.created_at,
                    src_id: author.id.clone(),
                    dst_id: ego_id.clone(),
                    kind: InteractionKind::Mention,
                    post_id: None,
                    raw_fetch_id: None,
                });
            }

            self.db
                .write_with(|tx| {
                    Database::insert_raw_fetch_tx(&raw, tx)?;
                    Database::upsert_accounts_tx(observations, tx)?;
                    Ok(())
                })
                .await?;
            self.db.insert_interaction_events(events).await?;
        }
        Ok(())
    }
}

fn account_observation(profile: &UserProfile) -> AccountRecord {
    AccountRecord {
        handle: profile.handle.clone(),
        display_name: profile.display_name.clone(),
        avatar_url: profile.avatar_url.clone(),
        bio: profile.bio.clone(),
        followers_count: profile.followers_count,
        following_count: profile.following_count,
        tweet_count: profile.tweet_count,
        media_count: profile.media_count,
        favourites_count: profile.favourites_count,
        is_automated: profile.is_automated,
        can_dm: profile.can_dm,
        possibly_sensitive: profile.possibly_sensitive,
        created_at: profile.created_at,
        last_seen_at: Timestamp::now(),
    }
}

fn post_record(author_id: &AccountId, post: &PostSummary) -> PostRecord {
    PostRecord {
        author_id: author_id.clone(),
        created_at: post.created_at,
        text: post.text.clone(),
        metrics_json: post.metrics.to_string(),
        conversation_id: post.conversation_id.clone(),
        in_reply_to: post.in_reply_to.clone(),
        last_seen_at: Timestamp::now(),
    }
}

fn raw_fetch_record<T>(run_id: RunId, endpoint: &str, page: &Page<T>) -> RawFetchRecord {
    RawFetchRecord {
        run_id,
        endpoint: endpoint.to_owned(),
        params_hash: page.params_hash.clone(),
        cursor_in: page.cursor_in.clone(),
        cursor_out: page.cursor_out.clone(),
        truncated: page.truncated,
        payload: serde_json::to_vec(&page.payload).expect("JSON value always serializes"),
        fetched_at: Timestamp::now(),
    }
}

#[cfg(test)]
mod tests {
    use atlas_client::ClientOpts;
    use atlas_util_error::BoxedErrorResult;
    use tempfile::tempdir;

    use super::*;

    fn offline_client() -> NetworkClient {
        NetworkClient::new(ClientOpts {
            api_key: "test-key".to_owned(),
            fallback_bearer_token: None,
        })
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn cancelled_run_is_marked_failed() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("atlas.redb")).await?);

        let collector = Collector::new(db.clone(), offline_client(), Config::default());
        collector.cancel_flag().store(true, Ordering::Relaxed);

        let result = collector
            .run_collection(CollectOpts {
                username: Some("someone".to_owned()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CollectorError::Cancelled)));

        let runs = db.list_runs(1).await?;
        assert_eq!(runs[0].1.status, RunStatus::Failed);
        assert_eq!(runs[0].1.notes.as_deref(), Some("cancelled"));

        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn unknown_ego_fails_run_without_network() -> BoxedErrorResult<()> {
        let dir = tempdir()?;
        let db = Arc::new(Database::open(dir.path().join("atlas.redb")).await?);

        let collector = Collector::new(db.clone(), offline_client(), Config::default());
        let result = collector
            .run_collection(CollectOpts {
                user_id: Some(AccountId::from("no-such-account")),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CollectorError::EgoUnresolved)));

        let runs = db.list_runs(1).await?;
        assert_eq!(runs[0].1.status, RunStatus::Failed);
        assert!(runs[0].1.notes.is_some());
        assert!(runs[0].1.config_json.contains("max_top_posts_per_run"));

        Ok(())
    }

    #[test]
    fn profile_maps_to_account_observation() {
        let profile = UserProfile {
            id: AccountId::from("1"),
            handle: Some("alice".to_owned()),
            followers_count: Some(10),
            is_automated: true,
            ..Default::default()
        };
        let record = account_observation(&profile);
        assert_eq!(record.handle.as_deref(), Some("alice"));
        assert_eq!(record.followers_count, Some(10));
        assert!(record.is_automated);
        assert_eq!(record.created_at, None);
    }
}
