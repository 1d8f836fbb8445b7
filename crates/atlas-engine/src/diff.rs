//! Interval diffing: compare two snapshots of the same kind and record the
//! membership changes as an interval with follow events.

use std::collections::BTreeSet;

use atlas_core::{AccountId, FollowEventKind, IntervalId, SnapshotId};
use atlas_store::{Database, DbError, IntervalRecord, KindMismatchSnafu};
use snafu::Snafu;
use tracing::info;

const LOG_TARGET: &str = "atlas::diff";

#[derive(Debug, Snafu)]
pub enum DiffError {
    #[snafu(transparent)]
    Db { source: DbError },
    #[snafu(display("Snapshot {snapshot_id} not found"))]
    SnapshotNotFound { snapshot_id: SnapshotId },
}

pub type DiffResult<T> = std::result::Result<T, DiffError>;

/// The pure core: `new = end \ start`, `lost = start \ end`.
pub fn diff_membership(
    start: &BTreeSet<AccountId>,
    end: &BTreeSet<AccountId>,
) -> (BTreeSet<AccountId>, BTreeSet<AccountId>) {
    let new = end.difference(start).cloned().collect();
    let lost = start.difference(end).cloned().collect();
    (new, lost)
}

/// Diff two snapshots and persist the interval plus one follow event per
/// changed account. Deterministic given the two snapshots; fails with a kind
/// mismatch when the snapshots are incompatible (programmer error upstream).
pub async fn compute_interval_diff(
    db: &Database,
    start_id: SnapshotId,
    end_id: SnapshotId,
) -> DiffResult<(IntervalId, IntervalRecord)> {
    let start = db
        .get_snapshot(start_id)
        .await?
        .ok_or(DiffError::SnapshotNotFound {
            snapshot_id: start_id,
        })?;
    let end = db
        .get_snapshot(end_id)
        .await?
        .ok_or(DiffError::SnapshotNotFound { snapshot_id: end_id })?;

    if start.kind != end.kind {
        return Err(KindMismatchSnafu {
            start: start.kind,
            end: end.kind,
        }
        .build()
        .into());
    }

    let start_ids = db.snapshot_member_ids(start.kind, start_id).await?;
    let end_ids = db.snapshot_member_ids(end.kind, end_id).await?;

    let (new, lost) = diff_membership(&start_ids, &end_ids);

    let record = IntervalRecord {
        kind: start.kind,
        snapshot_start_id: start_id,
        snapshot_end_id: end_id,
        start_at: start.captured_at,
        end_at: end.captured_at,
        new_count: new.len() as u64,
        lost_count: lost.len() as u64,
    };

    let events: Vec<(AccountId, FollowEventKind)> = new
        .into_iter()
        .map(|id| (id, FollowEventKind::New))
        .chain(lost.into_iter().map(|id| (id, FollowEventKind::Lost)))
        .collect();

    let interval_id = db.insert_interval(record.clone(), events).await?;

    info!(
        target: LOG_TARGET,
        %interval_id,
        kind = %record.kind,
        new = record.new_count,
        lost = record.lost_count,
        "Computed interval diff"
    );

    Ok((interval_id, record))
}
