use atlas_core::{AccountId, IntervalId, Timestamp};
use atlas_engine::attribution::{self, AttributionPayload};
use atlas_engine::frame::{FrameBuilder, FramePayload};
use atlas_engine::query;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::{AppJson, DEFAULT_LIMIT, DEFAULT_TIMEFRAME};
use crate::SharedAppState;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct FrameQuery {
    timeframe_window: Option<u32>,
    limit: Option<usize>,
}

pub async fn list_frames(
    state: State<SharedAppState>,
    Query(params): Query<FrameQuery>,
) -> ApiResult<AppJson<Vec<FramePayload>>> {
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);
    let mut frames = query::timeline_frames(
        &state.db,
        timeframe,
        params.limit.unwrap_or(DEFAULT_LIMIT),
    )
    .await?;
    // Newest first here; the timeline endpoint serves them oldest first.
    frames.reverse();
    Ok(AppJson(frames))
}

pub async fn latest_frame(
    state: State<SharedAppState>,
    Query(params): Query<FrameQuery>,
) -> ApiResult<AppJson<FramePayload>> {
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);
    let (interval_id, _) = state
        .db
        .latest_frame(timeframe)
        .await?
        .ok_or_else(|| ApiError::not_found("frame"))?;
    Ok(AppJson(
        query::frame_payload(&state.db, interval_id, timeframe).await?,
    ))
}

pub async fn get_frame(
    state: State<SharedAppState>,
    Path(interval_id): Path<IntervalId>,
    Query(params): Query<FrameQuery>,
) -> ApiResult<AppJson<FramePayload>> {
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);
    Ok(AppJson(
        query::frame_payload(&state.db, interval_id, timeframe).await?,
    ))
}

/// Latest frame for renderers; an empty structure when nothing was built.
pub async fn graph(
    state: State<SharedAppState>,
    Query(params): Query<FrameQuery>,
) -> ApiResult<AppJson<FramePayload>> {
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);
    Ok(AppJson(
        query::latest_frame_or_empty(&state.db, timeframe).await?,
    ))
}

#[derive(Deserialize)]
pub struct BuildFrameRequest {
    pub interval_id: Option<IntervalId>,
    pub timeframe_days: u32,
    pub ego_id: Option<AccountId>,
}

pub async fn build_frame(
    state: State<SharedAppState>,
    AppJson(request): AppJson<BuildFrameRequest>,
) -> ApiResult<AppJson<FramePayload>> {
    let interval_id = match request.interval_id {
        Some(interval_id) => interval_id,
        None => {
            state
                .db
                .latest_interval()
                .await?
                .ok_or_else(|| ApiError::not_found("interval"))?
                .0
        }
    };

    let ego_id = match request.ego_id {
        Some(ego_id) => ego_id,
        None => default_ego(&state).await?,
    };

    let payload = FrameBuilder::new(&state.db)
        .build_and_persist(interval_id, request.timeframe_days, &ego_id)
        .await?;
    Ok(AppJson(payload))
}

/// Without an explicit ego, fall back to the author of the most recently
/// collected post (engagement collection only stores the ego's posts).
async fn default_ego(state: &SharedAppState) -> ApiResult<AccountId> {
    state
        .db
        .posts_in_window(Timestamp::ZERO, Timestamp::MAX)
        .await?
        .into_iter()
        .next()
        .map(|(_, post)| post.author_id)
        .ok_or_else(|| ApiError::invalid_field("ego_id", "required until a run has collected posts"))
}

pub async fn timeline_frames(
    state: State<SharedAppState>,
    Query(params): Query<FrameQuery>,
) -> ApiResult<AppJson<Vec<FramePayload>>> {
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);
    Ok(AppJson(
        query::timeline_frames(
            &state.db,
            timeframe,
            params.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?,
    ))
}

#[derive(Deserialize)]
pub struct InterpolateQuery {
    from_interval_id: Option<IntervalId>,
    to_interval_id: Option<IntervalId>,
    progress: Option<f64>,
    timeframe_window: Option<u32>,
}

pub async fn interpolate(
    state: State<SharedAppState>,
    Query(params): Query<InterpolateQuery>,
) -> ApiResult<AppJson<FramePayload>> {
    let from = params
        .from_interval_id
        .ok_or_else(|| ApiError::invalid_field("from_interval_id", "required"))?;
    let to = params
        .to_interval_id
        .ok_or_else(|| ApiError::invalid_field("to_interval_id", "required"))?;
    let progress = params.progress.unwrap_or(0.0);
    let timeframe = params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME);

    Ok(AppJson(
        query::interpolate_frames(&state.db, from, to, timeframe, progress).await?,
    ))
}

#[derive(Deserialize)]
pub struct AttributionsQuery {
    timeframe_window: Option<u32>,
    limit: Option<usize>,
    rebuild: Option<bool>,
}

pub async fn attributions(
    state: State<SharedAppState>,
    Query(params): Query<AttributionsQuery>,
) -> ApiResult<AppJson<Vec<AttributionPayload>>> {
    let results = attribution::build_post_attributions(
        &state.db,
        &state.config,
        params.timeframe_window.unwrap_or(DEFAULT_TIMEFRAME),
        params.limit.unwrap_or(DEFAULT_LIMIT),
        params.rebuild.unwrap_or(false),
    )
    .await?;
    Ok(AppJson(results))
}
