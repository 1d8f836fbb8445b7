//! Read façade over derived state: frame payloads, timelines and
//! interpolation. The HTTP surface dispatches here so handlers stay thin.

use atlas_core::IntervalId;
use atlas_store::{Database, DbError};
use snafu::Snafu;

use crate::frame::{FramePayload, empty_frame};
use crate::interpolate::interpolate;

#[derive(Debug, Snafu)]
pub enum QueryError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(display("Frame for interval {interval_id} (window {timeframe_days}d) not found"))]
    FrameNotFound {
        interval_id: IntervalId,
        timeframe_days: u32,
    },
    #[snafu(display("Stored frame payload is corrupt: {source}"))]
    CorruptFrame { source: serde_json::Error },
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

fn parse_payload(payload_json: &str) -> QueryResult<FramePayload> {
    serde_json::from_str(payload_json).map_err(|source| QueryError::CorruptFrame { source })
}

pub async fn frame_payload(
    db: &Database,
    interval_id: IntervalId,
    timeframe_days: u32,
) -> QueryResult<FramePayload> {
    let record = db
        .get_frame(interval_id, timeframe_days)
        .await?
        .ok_or(QueryError::FrameNotFound {
            interval_id,
            timeframe_days,
        })?;
    parse_payload(&record.payload_json)
}

/// The latest frame for a window, or an empty structure if none was built.
pub async fn latest_frame_or_empty(
    db: &Database,
    timeframe_days: u32,
) -> QueryResult<FramePayload> {
    match db.latest_frame(timeframe_days).await? {
        Some((_, record)) => parse_payload(&record.payload_json),
        None => Ok(empty_frame(timeframe_days)),
    }
}

/// Frames for timeline scrubbing, oldest first.
pub async fn timeline_frames(
    db: &Database,
    timeframe_days: u32,
    limit: usize,
) -> QueryResult<Vec<FramePayload>> {
    let mut frames: Vec<FramePayload> = db
        .list_frames(timeframe_days, limit)
        .await?
        .into_iter()
        .map(|(_, record)| parse_payload(&record.payload_json))
        .collect::<QueryResult<_>>()?;
    frames.reverse();
    Ok(frames)
}

/// Interpolate between two stored frames.
pub async fn interpolate_frames(
    db: &Database,
    from_interval: IntervalId,
    to_interval: IntervalId,
    timeframe_days: u32,
    progress: f64,
) -> QueryResult<FramePayload> {
    let from = frame_payload(db, from_interval, timeframe_days).await?;
    let to = frame_payload(db, to_interval, timeframe_days).await?;
    Ok(interpolate(&from, &to, progress))
}
