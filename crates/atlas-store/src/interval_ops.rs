use std::collections::BTreeSet;

use atlas_core::{AccountId, FollowEventKind, IntervalId, Timestamp};
use tracing::info;

use crate::{
    Database, DbResult, IntervalRecord, LOG_TARGET, follow_events, get_last_in_range, intervals,
    intervals_by_end,
};

impl Database {
    /// Persist an interval together with its follow events. The diff itself
    /// is computed by the engine; this only records the result.
    pub async fn insert_interval(
        &self,
        record: IntervalRecord,
        events: Vec<(AccountId, FollowEventKind)>,
    ) -> DbResult<IntervalId> {
        self.write_with(|tx| {
            let mut intervals_table = tx.open_table(&intervals::TABLE)?;
            let mut by_end_table = tx.open_table(&intervals_by_end::TABLE)?;
            let mut events_table = tx.open_table(&follow_events::TABLE)?;

            let interval_id = get_last_in_range(&intervals_table, ..)?
                .map(IntervalId::next)
                .unwrap_or(IntervalId::ZERO);

            intervals_table.insert(&interval_id, &record)?;
            by_end_table.insert(&(record.end_at, interval_id), &())?;
            for (account_id, kind) in &events {
                events_table.insert(&(interval_id, account_id.clone()), kind)?;
            }

            info!(
                target: LOG_TARGET,
                %interval_id,
                kind = %record.kind,
                new = record.new_count,
                lost = record.lost_count,
                "Inserted interval"
            );
            Ok(interval_id)
        })
        .await
    }

    pub async fn get_interval(&self, interval_id: IntervalId) -> DbResult<Option<IntervalRecord>> {
        self.read_with(|tx| {
            let intervals_table = tx.open_table(&intervals::TABLE)?;
            Ok(intervals_table.get(&interval_id)?.map(|g| g.value()))
        })
        .await
    }

    /// Intervals ordered by end time, newest first.
    pub async fn list_intervals(
        &self,
        limit: usize,
    ) -> DbResult<Vec<(IntervalId, IntervalRecord)>> {
        self.read_with(move |tx| {
            let intervals_table = tx.open_table(&intervals::TABLE)?;
            let by_end_table = tx.open_table(&intervals_by_end::TABLE)?;

            let mut found = vec![];
            for entry in by_end_table.range(..)?.rev() {
                if limit <= found.len() {
                    break;
                }
                let (k, _) = entry?;
                let (_, interval_id) = k.value();
                if let Some(record) = intervals_table.get(&interval_id)?.map(|g| g.value()) {
                    found.push((interval_id, record));
                }
            }
            Ok(found)
        })
        .await
    }

    pub async fn latest_interval(&self) -> DbResult<Option<(IntervalId, IntervalRecord)>> {
        Ok(self.list_intervals(1).await?.into_iter().next())
    }

    /// Follow events of one interval, optionally filtered by kind.
    pub async fn follow_events_of(
        &self,
        interval_id: IntervalId,
        kind: Option<FollowEventKind>,
    ) -> DbResult<Vec<(AccountId, FollowEventKind)>> {
        self.read_with(move |tx| {
            let events_table = tx.open_table(&follow_events::TABLE)?;
            let mut found = vec![];
            for entry in events_table.range(
                &(interval_id, AccountId::default())..&(interval_id.next(), AccountId::default()),
            )? {
                let (k, v) = entry?;
                let event_kind = v.value();
                if kind.is_none() || kind == Some(event_kind) {
                    found.push((k.value().1, event_kind));
                }
            }
            Ok(found)
        })
        .await
    }

    /// Accounts with a `new` follow event in any of the given intervals.
    pub async fn new_follower_union(
        &self,
        interval_ids: Vec<IntervalId>,
    ) -> DbResult<BTreeSet<AccountId>> {
        self.read_with(move |tx| {
            let events_table = tx.open_table(&follow_events::TABLE)?;
            let mut union = BTreeSet::new();
            for interval_id in interval_ids {
                for entry in events_table.range(
                    &(interval_id, AccountId::default())
                        ..&(interval_id.next(), AccountId::default()),
                )? {
                    let (k, v) = entry?;
                    if v.value() == FollowEventKind::New {
                        union.insert(k.value().1);
                    }
                }
            }
            Ok(union)
        })
        .await
    }

    /// Intervals whose end falls in `[from, to]`, oldest first.
    pub async fn intervals_ending_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> DbResult<Vec<IntervalId>> {
        self.read_with(move |tx| {
            let by_end_table = tx.open_table(&intervals_by_end::TABLE)?;
            let mut found = vec![];
            for entry in
                by_end_table.range(&(from, IntervalId::ZERO)..=&(to, IntervalId::from(u64::MAX)))?
            {
                let (k, _) = entry?;
                found.push(k.value().1);
            }
            Ok(found)
        })
        .await
    }

    /// The interval preceding `interval_id` of the same kind, by end time.
    /// Its positions seed the next layout.
    pub async fn previous_interval(
        &self,
        interval_id: IntervalId,
    ) -> DbResult<Option<(IntervalId, IntervalRecord)>> {
        self.read_with(move |tx| {
            let intervals_table = tx.open_table(&intervals::TABLE)?;
            let by_end_table = tx.open_table(&intervals_by_end::TABLE)?;

            let Some(current) = intervals_table.get(&interval_id)?.map(|g| g.value()) else {
                return Ok(None);
            };

            for entry in by_end_table
                .range(&(Timestamp::ZERO, IntervalId::ZERO)..&(current.end_at, IntervalId::ZERO))?
                .rev()
            {
                let (k, _) = entry?;
                let (_, candidate_id) = k.value();
                if candidate_id == interval_id {
                    continue;
                }
                if let Some(record) = intervals_table.get(&candidate_id)?.map(|g| g.value()) {
                    if record.kind == current.kind {
                        return Ok(Some((candidate_id, record)));
                    }
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn count_intervals(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let intervals_table = tx.open_table(&intervals::TABLE)?;
            let mut count = 0;
            for entry in intervals_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    pub async fn count_snapshots(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let snapshots_table = tx.open_table(&crate::snapshots::TABLE)?;
            let mut count = 0;
            for entry in snapshots_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    pub async fn count_runs(&self) -> DbResult<(u64, u64)> {
        self.read_with(|tx| {
            let runs_table = tx.open_table(&crate::runs::TABLE)?;
            let mut total = 0;
            let mut completed = 0;
            for entry in runs_table.range(..)? {
                let (_, v) = entry?;
                total += 1;
                if v.value().status == atlas_core::RunStatus::Completed {
                    completed += 1;
                }
            }
            Ok((total, completed))
        })
        .await
    }
}
