use std::str::FromStr as _;

use atlas_core::{
    AccountId, FollowEventKind, IntervalId, RunId, SnapshotId, SnapshotKind, Timestamp,
};
use atlas_store::{AccountRecord, IntervalRecord, RunRecord, SnapshotRecord};
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::{AppJson, DEFAULT_LIMIT};
use crate::SharedAppState;
use crate::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct ServiceInfo {
    service: &'static str,
    status: &'static str,
    version: &'static str,
}

pub async fn root() -> AppJson<ServiceInfo> {
    AppJson(ServiceInfo {
        service: "atlas",
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct RunResponse {
    run_id: RunId,
    #[serde(flatten)]
    record: RunRecord,
}

pub async fn list_runs(
    state: State<SharedAppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<AppJson<Vec<RunResponse>>> {
    let runs = state
        .db
        .list_runs(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(AppJson(
        runs.into_iter()
            .map(|(run_id, record)| RunResponse { run_id, record })
            .collect(),
    ))
}

pub async fn get_run(
    state: State<SharedAppState>,
    Path(id): Path<RunId>,
) -> ApiResult<AppJson<RunResponse>> {
    let record = state
        .db
        .get_run(id)
        .await?
        .ok_or_else(|| ApiError::not_found("run"))?;
    Ok(AppJson(RunResponse { run_id: id, record }))
}

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    kind: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    snapshot_id: SnapshotId,
    #[serde(flatten)]
    record: SnapshotRecord,
}

pub async fn list_snapshots(
    state: State<SharedAppState>,
    Query(query): Query<SnapshotsQuery>,
) -> ApiResult<AppJson<Vec<SnapshotResponse>>> {
    let kind = query
        .kind
        .map(|raw| {
            SnapshotKind::from_str(&raw)
                .map_err(|_| ApiError::invalid_field("kind", "expected followers or following"))
        })
        .transpose()?;

    let snapshots = state
        .db
        .list_snapshots(kind, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(AppJson(
        snapshots
            .into_iter()
            .map(|(snapshot_id, record)| SnapshotResponse {
                snapshot_id,
                record,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct IntervalResponse {
    interval_id: IntervalId,
    #[serde(flatten)]
    record: IntervalRecord,
}

pub async fn list_intervals(
    state: State<SharedAppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<AppJson<Vec<IntervalResponse>>> {
    let intervals = state
        .db
        .list_intervals(query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(AppJson(
        intervals
            .into_iter()
            .map(|(interval_id, record)| IntervalResponse {
                interval_id,
                record,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    kind: Option<String>,
}

#[derive(Serialize)]
pub struct FollowEventResponse {
    account_id: AccountId,
    kind: FollowEventKind,
}

pub async fn interval_events(
    state: State<SharedAppState>,
    Path(id): Path<IntervalId>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<AppJson<Vec<FollowEventResponse>>> {
    state
        .db
        .get_interval(id)
        .await?
        .ok_or_else(|| ApiError::not_found("interval"))?;

    let kind = query
        .kind
        .map(|raw| {
            FollowEventKind::from_str(&raw)
                .map_err(|_| ApiError::invalid_field("kind", "expected new or lost"))
        })
        .transpose()?;

    let events = state.db.follow_events_of(id, kind).await?;
    Ok(AppJson(
        events
            .into_iter()
            .map(|(account_id, kind)| FollowEventResponse { account_id, kind })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct AccountsQuery {
    limit: Option<usize>,
    search: Option<String>,
}

#[derive(Serialize)]
pub struct AccountResponse {
    account_id: AccountId,
    #[serde(flatten)]
    record: AccountRecord,
}

pub async fn list_accounts(
    state: State<SharedAppState>,
    Query(query): Query<AccountsQuery>,
) -> ApiResult<AppJson<Vec<AccountResponse>>> {
    let accounts = state
        .db
        .list_accounts(query.limit.unwrap_or(DEFAULT_LIMIT), query.search)
        .await?;
    Ok(AppJson(
        accounts
            .into_iter()
            .map(|(account_id, record)| AccountResponse { account_id, record })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct RunStats {
    total: u64,
    completed: u64,
}

#[derive(Serialize)]
pub struct Stats {
    runs: RunStats,
    accounts: u64,
    snapshots: u64,
    intervals: u64,
    frames: u64,
    posts: u64,
    raw_fetches: u64,
}

pub async fn stats(state: State<SharedAppState>) -> ApiResult<AppJson<Stats>> {
    let (total, completed) = state.db.count_runs().await?;
    Ok(AppJson(Stats {
        runs: RunStats { total, completed },
        accounts: state.db.count_accounts().await?,
        snapshots: state.db.count_snapshots().await?,
        intervals: state.db.count_intervals().await?,
        frames: state.db.count_frames().await?,
        posts: state.db.count_posts().await?,
        raw_fetches: state.db.count_raw_fetches().await?,
    }))
}

#[derive(Deserialize)]
pub struct PositionHistoryQuery {
    account_id: Option<AccountId>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct PositionHistoryResponse {
    interval_id: IntervalId,
    recorded_at: Timestamp,
    x: f64,
    y: f64,
    z: f64,
    source: String,
}

pub async fn position_history(
    state: State<SharedAppState>,
    Query(query): Query<PositionHistoryQuery>,
) -> ApiResult<AppJson<Vec<PositionHistoryResponse>>> {
    let account_id = query
        .account_id
        .ok_or_else(|| ApiError::invalid_field("account_id", "required"))?;

    let history = state
        .db
        .position_history_for(account_id, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(AppJson(
        history
            .into_iter()
            .map(|(interval_id, recorded_at, record)| PositionHistoryResponse {
                interval_id,
                recorded_at,
                x: record.position.x,
                y: record.position.y,
                z: record.position.z,
                source: record.source,
            })
            .collect(),
    ))
}
