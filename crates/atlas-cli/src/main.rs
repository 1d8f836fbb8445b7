mod cli;

use std::sync::Arc;

use atlas_client::{ClientOpts, NetworkClient};
use atlas_core::{AccountId, Timestamp};
use atlas_engine::attribution::{self, AttributionError};
use atlas_engine::collector::{CollectOpts, Collector, CollectorError};
use atlas_engine::frame::{FrameBuilder, FrameError};
use atlas_engine::{Config, query};
use atlas_store::{Database, DbError};
use clap::Parser;
use cli::{Cmd, FrameCmd, Opts, Settings};
use snafu::{ResultExt as _, Snafu, Whatever};
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const PROJECT_NAME: &str = "atlas";
pub const LOG_TARGET: &str = "atlas::cli";

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(transparent)]
    Collector { source: CollectorError },
    #[snafu(transparent)]
    Frame { source: FrameError },
    #[snafu(transparent)]
    Attribution { source: AttributionError },
    #[snafu(transparent)]
    Query { source: query::QueryError },
    #[snafu(display("Server error: {source}"))]
    Server { source: atlas_server::ServerError },
    #[snafu(display("Upstream error: {source}"))]
    Client { source: atlas_client::ClientError },
    #[snafu(display("No ego: pass --ego-id or run a collection first"))]
    NoEgo,
    #[snafu(display("No interval: run at least two collections first"))]
    NoInterval,
    #[snafu(display("Miscellaneous error: {source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    let config = config_from(&opts.settings);
    let db = Arc::new(open_db(&opts.settings.database_url).await?);

    match opts.cmd {
        Cmd::Serve { listen, reuseport } => {
            let server = atlas_server::Server::init(
                atlas_server::Opts { listen, reuseport },
                db,
                config,
                atlas_server::ApiCredentials {
                    api_key: opts.settings.twitter_bearer_token.clone(),
                    fallback_bearer_token: opts.settings.x_bearer_token.clone(),
                },
            )
            .await
            .context(ServerSnafu)?;
            server.run().await.context(ServerSnafu)?;
            Ok(())
        }
        Cmd::Collect {
            username,
            user_id,
            max_pages,
        } => {
            let client = make_client(&opts.settings);
            let collector = Collector::new(db, client, config);
            let summary = collector
                .run_collection(CollectOpts {
                    username,
                    user_id,
                    max_pages,
                })
                .await?;
            print_json(&summary);
            Ok(())
        }
        Cmd::Stats => {
            let (total, completed) = db.count_runs().await?;
            let stats = serde_json::json!({
                "runs": {"total": total, "completed": completed},
                "accounts": db.count_accounts().await?,
                "snapshots": db.count_snapshots().await?,
                "intervals": db.count_intervals().await?,
                "frames": db.count_frames().await?,
                "posts": db.count_posts().await?,
                "raw_fetches": db.count_raw_fetches().await?,
            });
            print_json(&stats);
            Ok(())
        }
        Cmd::Runs { limit } => {
            let runs: Vec<_> = db
                .list_runs(limit)
                .await?
                .into_iter()
                .map(|(run_id, record)| serde_json::json!({"run_id": run_id, "record": record}))
                .collect();
            print_json(&runs);
            Ok(())
        }
        Cmd::Intervals { limit } => {
            let intervals: Vec<_> = db
                .list_intervals(limit)
                .await?
                .into_iter()
                .map(|(interval_id, record)| {
                    serde_json::json!({"interval_id": interval_id, "record": record})
                })
                .collect();
            print_json(&intervals);
            Ok(())
        }
        Cmd::Frame {
            cmd:
                FrameCmd::Build {
                    interval_id,
                    timeframe_days,
                    ego_id,
                },
        } => {
            let interval_id = match interval_id {
                Some(interval_id) => interval_id,
                None => db.latest_interval().await?.ok_or(CliError::NoInterval)?.0,
            };
            let ego_id = match ego_id {
                Some(ego_id) => ego_id,
                None => default_ego(&db).await?,
            };

            let payload = FrameBuilder::new(&db)
                .build_and_persist(interval_id, timeframe_days, &ego_id)
                .await?;
            print_json(&payload.stats);
            Ok(())
        }
        Cmd::Attributions {
            timeframe,
            limit,
            rebuild,
        } => {
            let results =
                attribution::build_post_attributions(&db, &config, timeframe, limit, rebuild)
                    .await?;
            print_json(&results);
            Ok(())
        }
        Cmd::RefreshProfiles => {
            let client = make_client(&opts.settings);
            refresh_profiles(&db, &client).await
        }
    }
}

fn config_from(settings: &Settings) -> Config {
    Config {
        config_version: settings.config_version.clone(),
        max_top_posts_per_run: settings.max_top_posts_per_run,
        max_engagers_per_post: settings.max_engagers_per_post,
        co_engagement_window_hours: settings.co_engagement_window_hours,
        attribution_lookback_days: settings.attribution_lookback_days,
    }
}

async fn open_db(database_url: &str) -> CliResult<Database> {
    Ok(if database_url == ":memory:" {
        Database::new_in_memory().await?
    } else {
        Database::open(database_url).await?
    })
}

fn make_client(settings: &Settings) -> NetworkClient {
    NetworkClient::new(ClientOpts {
        api_key: settings.twitter_bearer_token.clone(),
        fallback_bearer_token: settings.x_bearer_token.clone(),
    })
}

/// Infer the ego as the author of the most recently collected post.
async fn default_ego(db: &Database) -> CliResult<AccountId> {
    db.posts_in_window(Timestamp::ZERO, Timestamp::MAX)
        .await?
        .into_iter()
        .next()
        .map(|(_, post)| post.author_id)
        .ok_or(CliError::NoEgo)
}

/// Re-resolve every known handle via the profile endpoint. Suspended or
/// protected accounts are skipped.
async fn refresh_profiles(db: &Database, client: &NetworkClient) -> CliResult<()> {
    let accounts = db.list_accounts(usize::MAX, None).await?;
    let mut refreshed = 0u64;
    let mut skipped = 0u64;

    for (account_id, record) in accounts {
        let Some(handle) = record.handle else {
            skipped += 1;
            continue;
        };
        match client.user_by_handle(&handle).await {
            Ok(profile) => {
                db.upsert_account(
                    account_id,
                    atlas_store::AccountRecord {
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
                    },
                )
                .await?;
                refreshed += 1;
            }
            Err(err) if err.is_permission_denied() => {
                warn!(target: LOG_TARGET, %handle, "Profile unavailable, skipping");
                skipped += 1;
            }
            Err(err) => return Err(CliError::Client { source: err }),
        }
    }

    info!(target: LOG_TARGET, refreshed, skipped, "Profile refresh finished");
    print_json(&serde_json::json!({"refreshed": refreshed, "skipped": skipped}));
    Ok(())
}

fn print_json(value: &impl serde::Serialize) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("Can't fail")
    );
}

fn init_logging() -> std::result::Result<(), Whatever> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()
                .whatever_context("Invalid RUST_LOG")?,
        )
        .init();
    Ok(())
}
