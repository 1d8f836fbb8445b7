use std::collections::BTreeMap;

use atlas_core::{AccountId, IntervalId, PostId, Timestamp, Vec3};
use tracing::debug;

use crate::{
    CommunityRecord, Database, DbResult, EdgeRecord, FrameRecord, LOG_TARGET,
    PositionHistoryRecord, PostAttributionRecord, communities, edges, frames, position_history,
    positions, post_attributions,
};

impl Database {
    /// Replace every frame artifact for an interval in one transaction:
    /// delete the existing edges, communities and positions plus the frame
    /// row for this timeframe window, then insert the new batch. Rebuilds
    /// are idempotent and either persist a complete frame or nothing.
    ///
    /// Position history is append-only and deliberately not part of the
    /// replacement.
    #[allow(clippy::too_many_arguments)]
    pub async fn replace_frame_artifacts(
        &self,
        interval_id: IntervalId,
        timeframe_days: u32,
        new_edges: Vec<EdgeRecord>,
        new_communities: Vec<(AccountId, CommunityRecord)>,
        new_positions: Vec<(AccountId, Vec3)>,
        frame: FrameRecord,
        history_source: &str,
    ) -> DbResult<()> {
        let recorded_at = Timestamp::now();
        let history: Vec<_> = new_positions
            .iter()
            .map(|(account_id, position)| {
                (
                    (
                        account_id.clone(),
                        interval_id,
                        recorded_at,
                        self.next_event_order(),
                    ),
                    PositionHistoryRecord {
                        position: *position,
                        source: history_source.to_owned(),
                    },
                )
            })
            .collect();

        self.write_with(|tx| {
            let mut edges_table = tx.open_table(&edges::TABLE)?;
            let mut communities_table = tx.open_table(&communities::TABLE)?;
            let mut positions_table = tx.open_table(&positions::TABLE)?;
            let mut frames_table = tx.open_table(&frames::TABLE)?;
            let mut history_table = tx.open_table(&position_history::TABLE)?;

            let mut stale_edges = vec![];
            for entry in edges_table.range(&(interval_id, 0)..&(interval_id.next(), 0))? {
                let (k, _) = entry?;
                stale_edges.push(k.value());
            }
            for key in stale_edges {
                edges_table.remove(&key)?;
            }

            let mut stale_accounts = vec![];
            for entry in communities_table.range(
                &(interval_id, AccountId::default())..&(interval_id.next(), AccountId::default()),
            )? {
                let (k, _) = entry?;
                stale_accounts.push(k.value());
            }
            for key in stale_accounts {
                communities_table.remove(&key)?;
            }

            let mut stale_positions = vec![];
            for entry in positions_table.range(
                &(interval_id, AccountId::default())..&(interval_id.next(), AccountId::default()),
            )? {
                let (k, _) = entry?;
                stale_positions.push(k.value());
            }
            for key in stale_positions {
                positions_table.remove(&key)?;
            }

            frames_table.remove(&(interval_id, timeframe_days))?;

            for (seq, edge) in new_edges.iter().enumerate() {
                edges_table.insert(&(interval_id, seq as u64), edge)?;
            }
            for (account_id, record) in &new_communities {
                communities_table.insert(&(interval_id, account_id.clone()), record)?;
            }
            for (account_id, position) in &new_positions {
                positions_table.insert(&(interval_id, account_id.clone()), position)?;
            }
            frames_table.insert(&(interval_id, timeframe_days), &frame)?;
            for (key, record) in &history {
                history_table.insert(key, record)?;
            }

            debug!(
                target: LOG_TARGET,
                %interval_id,
                timeframe_days,
                edges = new_edges.len(),
                nodes = new_positions.len(),
                "Replaced frame artifacts"
            );
            Ok(())
        })
        .await
    }

    pub async fn get_frame(
        &self,
        interval_id: IntervalId,
        timeframe_days: u32,
    ) -> DbResult<Option<FrameRecord>> {
        self.read_with(move |tx| {
            let frames_table = tx.open_table(&frames::TABLE)?;
            Ok(frames_table
                .get(&(interval_id, timeframe_days))?
                .map(|g| g.value()))
        })
        .await
    }

    /// The frame for the highest interval id with this timeframe window.
    pub async fn latest_frame(
        &self,
        timeframe_days: u32,
    ) -> DbResult<Option<(IntervalId, FrameRecord)>> {
        self.read_with(move |tx| {
            let frames_table = tx.open_table(&frames::TABLE)?;
            for entry in frames_table.range(..)?.rev() {
                let (k, v) = entry?;
                let (interval_id, tf) = k.value();
                if tf == timeframe_days {
                    return Ok(Some((interval_id, v.value())));
                }
            }
            Ok(None)
        })
        .await
    }

    /// Frames for a timeframe window, newest interval first.
    pub async fn list_frames(
        &self,
        timeframe_days: u32,
        limit: usize,
    ) -> DbResult<Vec<(IntervalId, FrameRecord)>> {
        self.read_with(move |tx| {
            let frames_table = tx.open_table(&frames::TABLE)?;
            let mut found = vec![];
            for entry in frames_table.range(..)?.rev() {
                if limit <= found.len() {
                    break;
                }
                let (k, v) = entry?;
                let (interval_id, tf) = k.value();
                if tf == timeframe_days {
                    found.push((interval_id, v.value()));
                }
            }
            Ok(found)
        })
        .await
    }

    pub async fn count_frames(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let frames_table = tx.open_table(&frames::TABLE)?;
            let mut count = 0;
            for entry in frames_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }

    pub async fn positions_of(
        &self,
        interval_id: IntervalId,
    ) -> DbResult<BTreeMap<AccountId, Vec3>> {
        self.read_with(move |tx| {
            let positions_table = tx.open_table(&positions::TABLE)?;
            let mut found = BTreeMap::new();
            for entry in positions_table.range(
                &(interval_id, AccountId::default())..&(interval_id.next(), AccountId::default()),
            )? {
                let (k, v) = entry?;
                found.insert(k.value().1, v.value());
            }
            Ok(found)
        })
        .await
    }

    pub async fn communities_of(
        &self,
        interval_id: IntervalId,
    ) -> DbResult<BTreeMap<AccountId, CommunityRecord>> {
        self.read_with(move |tx| {
            let communities_table = tx.open_table(&communities::TABLE)?;
            let mut found = BTreeMap::new();
            for entry in communities_table.range(
                &(interval_id, AccountId::default())..&(interval_id.next(), AccountId::default()),
            )? {
                let (k, v) = entry?;
                found.insert(k.value().1, v.value());
            }
            Ok(found)
        })
        .await
    }

    /// One account's position trail, newest first.
    pub async fn position_history_for(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> DbResult<Vec<(IntervalId, Timestamp, PositionHistoryRecord)>> {
        self.read_with(move |tx| {
            let history_table = tx.open_table(&position_history::TABLE)?;
            let lo = (
                account_id.clone(),
                IntervalId::ZERO,
                Timestamp::ZERO,
                0u64,
            );
            let mut found = vec![];
            for entry in history_table.range(&lo..)? {
                let (k, v) = entry?;
                let (entry_account, interval_id, recorded_at, _) = k.value();
                if entry_account != account_id {
                    break;
                }
                found.push((interval_id, recorded_at, v.value()));
            }
            found.reverse();
            found.truncate(limit);
            Ok(found)
        })
        .await
    }

    pub async fn edges_of(&self, interval_id: IntervalId) -> DbResult<Vec<EdgeRecord>> {
        self.read_with(move |tx| {
            let edges_table = tx.open_table(&edges::TABLE)?;
            let mut found = vec![];
            for entry in edges_table.range(&(interval_id, 0)..&(interval_id.next(), 0))? {
                let (_, v) = entry?;
                found.push(v.value());
            }
            Ok(found)
        })
        .await
    }

    pub async fn upsert_post_attribution(
        &self,
        post_id: PostId,
        timeframe_days: u32,
        record: PostAttributionRecord,
    ) -> DbResult<()> {
        self.write_with(|tx| {
            let mut attributions_table = tx.open_table(&post_attributions::TABLE)?;
            attributions_table.insert(&(post_id.clone(), timeframe_days), &record)?;
            Ok(())
        })
        .await
    }

    /// Cached attributions for a timeframe window, newest post first.
    pub async fn list_post_attributions(
        &self,
        timeframe_days: u32,
        limit: usize,
    ) -> DbResult<Vec<(PostId, PostAttributionRecord)>> {
        self.read_with(move |tx| {
            let attributions_table = tx.open_table(&post_attributions::TABLE)?;
            let mut found = vec![];
            for entry in attributions_table.range(..)? {
                let (k, v) = entry?;
                let (post_id, tf) = k.value();
                if tf == timeframe_days {
                    found.push((post_id, v.value()));
                }
            }
            found.sort_by_key(|(_, record)| {
                std::cmp::Reverse(record.created_at.unwrap_or(Timestamp::ZERO))
            });
            found.truncate(limit);
            Ok(found)
        })
        .await
    }

    /// Drop every cached attribution for a timeframe window (rebuild).
    pub async fn delete_post_attributions(&self, timeframe_days: u32) -> DbResult<()> {
        self.write_with(|tx| {
            let mut attributions_table = tx.open_table(&post_attributions::TABLE)?;
            let mut stale = vec![];
            for entry in attributions_table.range(..)? {
                let (k, _) = entry?;
                let key = k.value();
                if key.1 == timeframe_days {
                    stale.push(key);
                }
            }
            for key in stale {
                attributions_table.remove(&key)?;
            }
            Ok(())
        })
        .await
    }
}
