use std::collections::BTreeSet;

use atlas_core::{AccountId, RunId, SnapshotId, SnapshotKind, Timestamp};
use tracing::debug;

use crate::{
    Database, DbResult, LOG_TARGET, SnapshotMemberRecord, SnapshotRecord, WriteTransactionCtx,
    get_last_in_range, snapshot_followers, snapshot_following, snapshots, snapshots_by_time,
};

impl Database {
    /// Create an empty snapshot owned by `run_id`. Membership rows follow
    /// page by page; the snapshot only becomes visible to diffing once
    /// [`Self::finalize_snapshot`] writes a non-zero account count.
    pub async fn create_snapshot(&self, run_id: RunId, kind: SnapshotKind) -> DbResult<SnapshotId> {
        self.write_with(|tx| {
            let mut snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let mut by_time_table = tx.open_table(&snapshots_by_time::TABLE)?;

            let snapshot_id = get_last_in_range(&snapshots_table, ..)?
                .map(SnapshotId::next)
                .unwrap_or(SnapshotId::ZERO);
            let captured_at = Timestamp::now();

            snapshots_table.insert(
                &snapshot_id,
                &SnapshotRecord {
                    run_id,
                    kind,
                    captured_at,
                    account_count: 0,
                },
            )?;
            by_time_table.insert(&(kind, captured_at, snapshot_id), &())?;

            debug!(target: LOG_TARGET, %snapshot_id, %kind, "Created snapshot");
            Ok(snapshot_id)
        })
        .await
    }

    /// Write one page worth of membership rows. Re-inserting an account the
    /// snapshot already contains is a no-op (uniqueness on
    /// (snapshot, account)), which makes retried pages safe.
    pub fn insert_snapshot_members_tx(
        kind: SnapshotKind,
        snapshot_id: SnapshotId,
        members: &[(AccountId, u64)],
        tx: &WriteTransactionCtx,
    ) -> DbResult<()> {
        let mut table = match kind {
            SnapshotKind::Followers => tx.open_table(&snapshot_followers::TABLE)?,
            SnapshotKind::Following => tx.open_table(&snapshot_following::TABLE)?,
        };
        for (account_id, follow_position) in members {
            let key = (snapshot_id, account_id.clone());
            if table.get(&key)?.is_some() {
                continue;
            }
            table.insert(
                &key,
                &SnapshotMemberRecord {
                    follow_position: *follow_position,
                },
            )?;
        }
        Ok(())
    }

    /// Write the final account count, sealing the snapshot.
    pub async fn finalize_snapshot(&self, snapshot_id: SnapshotId, count: u64) -> DbResult<()> {
        self.write_with(|tx| {
            let mut snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let Some(mut record) = snapshots_table.get(&snapshot_id)?.map(|g| g.value()) else {
                return Ok(());
            };
            record.account_count = count;
            snapshots_table.insert(&snapshot_id, &record)?;
            Ok(())
        })
        .await
    }

    pub async fn get_snapshot(&self, snapshot_id: SnapshotId) -> DbResult<Option<SnapshotRecord>> {
        self.read_with(|tx| {
            let snapshots_table = tx.open_table(&snapshots::TABLE)?;
            Ok(snapshots_table.get(&snapshot_id)?.map(|g| g.value()))
        })
        .await
    }

    /// Most recent finalized snapshot of the given kind.
    pub async fn latest_snapshot(
        &self,
        kind: SnapshotKind,
    ) -> DbResult<Option<(SnapshotId, SnapshotRecord)>> {
        self.read_with(|tx| {
            let snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let by_time_table = tx.open_table(&snapshots_by_time::TABLE)?;

            for entry in by_time_table
                .range(
                    &(kind, Timestamp::ZERO, SnapshotId::ZERO)
                        ..=&(kind, Timestamp::MAX, SnapshotId::from(u64::MAX)),
                )?
                .rev()
            {
                let (k, _) = entry?;
                let (_, _, snapshot_id) = k.value();
                if let Some(record) = snapshots_table.get(&snapshot_id)?.map(|g| g.value()) {
                    if record.account_count != 0 {
                        return Ok(Some((snapshot_id, record)));
                    }
                }
            }
            Ok(None)
        })
        .await
    }

    /// Most recent snapshots of a kind (or all kinds), newest first.
    pub async fn list_snapshots(
        &self,
        kind: Option<SnapshotKind>,
        limit: usize,
    ) -> DbResult<Vec<(SnapshotId, SnapshotRecord)>> {
        self.read_with(move |tx| {
            let snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let (page, _) =
                Self::paginate_table_rev(&snapshots_table, None, limit, move |k, v| {
                    Ok((kind.is_none() || kind == Some(v.kind)).then_some((k, v)))
                })?;
            Ok(page)
        })
        .await
    }

    /// The set of account ids captured by one snapshot.
    pub async fn snapshot_member_ids(
        &self,
        kind: SnapshotKind,
        snapshot_id: SnapshotId,
    ) -> DbResult<BTreeSet<AccountId>> {
        self.read_with(move |tx| {
            let table = match kind {
                SnapshotKind::Followers => tx.open_table(&snapshot_followers::TABLE)?,
                SnapshotKind::Following => tx.open_table(&snapshot_following::TABLE)?,
            };
            Self::member_ids_in_table_tx(snapshot_id, &table)
        })
        .await
    }

    pub fn member_ids_in_table_tx(
        snapshot_id: SnapshotId,
        table: &impl redb_bincode::ReadableTable<(SnapshotId, AccountId), SnapshotMemberRecord>,
    ) -> DbResult<BTreeSet<AccountId>> {
        let mut ids = BTreeSet::new();
        for entry in table.range(
            &(snapshot_id, AccountId::default())..&(snapshot_id.next(), AccountId::default()),
        )? {
            let (k, _) = entry?;
            ids.insert(k.value().1);
        }
        Ok(ids)
    }

    /// Membership of one snapshot in upstream order (position 0 = newest
    /// follower first).
    pub async fn snapshot_members_ordered(
        &self,
        kind: SnapshotKind,
        snapshot_id: SnapshotId,
    ) -> DbResult<Vec<(AccountId, u64)>> {
        self.read_with(move |tx| {
            let table = match kind {
                SnapshotKind::Followers => tx.open_table(&snapshot_followers::TABLE)?,
                SnapshotKind::Following => tx.open_table(&snapshot_following::TABLE)?,
            };
            let mut members = vec![];
            for entry in table.range(
                &(snapshot_id, AccountId::default())..&(snapshot_id.next(), AccountId::default()),
            )? {
                let (k, v) = entry?;
                members.push((k.value().1, v.value().follow_position));
            }
            members.sort_by_key(|(_, position)| *position);
            Ok(members)
        })
        .await
    }

    /// Union of membership over every finalized snapshot of `kind` captured
    /// at or before `up_to`. This is what makes frames cumulative.
    pub async fn cumulative_members(
        &self,
        kind: SnapshotKind,
        up_to: Timestamp,
    ) -> DbResult<BTreeSet<AccountId>> {
        self.read_with(move |tx| {
            let snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let by_time_table = tx.open_table(&snapshots_by_time::TABLE)?;
            let members_table = match kind {
                SnapshotKind::Followers => tx.open_table(&snapshot_followers::TABLE)?,
                SnapshotKind::Following => tx.open_table(&snapshot_following::TABLE)?,
            };

            let mut union = BTreeSet::new();
            for entry in by_time_table.range(
                &(kind, Timestamp::ZERO, SnapshotId::ZERO)
                    ..=&(kind, up_to, SnapshotId::from(u64::MAX)),
            )? {
                let (k, _) = entry?;
                let (_, _, snapshot_id) = k.value();
                let Some(record) = snapshots_table.get(&snapshot_id)?.map(|g| g.value()) else {
                    continue;
                };
                if record.account_count == 0 {
                    continue;
                }
                union.append(&mut Self::member_ids_in_table_tx(snapshot_id, &members_table)?);
            }
            Ok(union)
        })
        .await
    }
}
