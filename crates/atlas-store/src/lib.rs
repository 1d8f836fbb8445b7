mod account_ops;
mod derived_ops;
mod interval_ops;
mod paginate;
mod post_ops;
mod raw_ops;
mod run_ops;
mod snapshot_ops;
mod tables;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{ops, result};

use atlas_core::{RunStatus, SnapshotId, Timestamp};
use atlas_util_error::BoxedError;
use redb_bincode::{ReadTransaction, ReadableTable, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::{debug, info};

pub use self::tables::*;

const LOG_TARGET: &str = "atlas::store";

/// Highest schema version this binary understands.
const DB_VERSION: u64 = 0;

pub struct WriteTransactionCtx {
    dbtx: WriteTransaction,
    on_commit: std::sync::Mutex<Vec<Box<dyn FnOnce() + 'static>>>,
}

impl From<WriteTransaction> for WriteTransactionCtx {
    fn from(dbtx: WriteTransaction) -> Self {
        Self {
            dbtx,
            on_commit: std::sync::Mutex::new(vec![]),
        }
    }
}

impl ops::Deref for WriteTransactionCtx {
    type Target = WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl ops::DerefMut for WriteTransactionCtx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dbtx
    }
}

impl WriteTransactionCtx {
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.on_commit
            .lock()
            .expect("Locking failed")
            .push(Box::new(f));
    }

    fn commit(self) -> result::Result<(), redb::CommitError> {
        let Self { dbtx, on_commit } = self;

        dbtx.commit()?;

        for hook in on_commit.lock().expect("Locking failed").drain(..) {
            hook();
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    DbTxLogic {
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Snapshot kinds do not match: {start} vs {end}"))]
    #[snafu(visibility(pub))]
    KindMismatch {
        start: atlas_core::SnapshotKind,
        end: atlas_core::SnapshotKind,
        #[snafu(implicit)]
        location: Location,
    },
}
pub type DbResult<T> = std::result::Result<T, DbError>;

/// The layered store.
///
/// Single shared mutable resource in the system: one collector writes raw
/// and normalized state per run, readers build derived state keyed on
/// interval ids. redb gives read-committed snapshots for free; the
/// `event_order_counter` keeps same-second rows in order-sensitive tables
/// distinct.
#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,

    /// Monotonically increasing counter used as the tie-breaking component
    /// of `interaction_events` and `position_history` keys. Seeded past the
    /// largest sequence already on disk.
    event_order_counter: AtomicU64,
}

impl Database {
    pub fn next_event_order(&self) -> u64 {
        self.event_order_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        Self::open_inner(inner).await
    }

    async fn open_inner(inner: redb::Database) -> DbResult<Database> {
        let inner = redb_bincode::Database::from(inner);

        Self::write_with_inner(&inner, |tx| {
            Self::init_tables_tx(tx)?;
            Self::verify_db_version_tx(&mut tx.open_table(&db_version::TABLE)?)?;
            Ok(())
        })
        .await?;

        let event_order = Self::read_with_inner(&inner, |tx| {
            let interactions_table = tx.open_table(&interaction_events::TABLE)?;
            let history_table = tx.open_table(&position_history::TABLE)?;

            let mut max_seq = 0;
            for entry in interactions_table.range(..)? {
                let (k, _) = entry?;
                let (_, seq) = k.value();
                max_seq = max_seq.max(seq + 1);
            }
            for entry in history_table.range(..)? {
                let (k, _) = entry?;
                let (_, _, _, seq) = k.value();
                max_seq = max_seq.max(seq + 1);
            }
            Ok(max_seq)
        })
        .await?;

        let db = Self {
            inner,
            event_order_counter: AtomicU64::new(event_order),
        };

        db.recover_stale_state().await?;

        Ok(db)
    }

    fn init_tables_tx(tx: &WriteTransactionCtx) -> DbResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&raw_fetches::TABLE)?;
        tx.open_table(&runs::TABLE)?;
        tx.open_table(&accounts::TABLE)?;
        tx.open_table(&snapshots::TABLE)?;
        tx.open_table(&snapshots_by_time::TABLE)?;
        tx.open_table(&snapshot_followers::TABLE)?;
        tx.open_table(&snapshot_following::TABLE)?;
        tx.open_table(&posts::TABLE)?;
        tx.open_table(&posts_by_time::TABLE)?;
        tx.open_table(&interaction_events::TABLE)?;
        tx.open_table(&post_engagers::TABLE)?;
        tx.open_table(&intervals::TABLE)?;
        tx.open_table(&intervals_by_end::TABLE)?;
        tx.open_table(&follow_events::TABLE)?;
        tx.open_table(&edges::TABLE)?;
        tx.open_table(&communities::TABLE)?;
        tx.open_table(&positions::TABLE)?;
        tx.open_table(&position_history::TABLE)?;
        tx.open_table(&frames::TABLE)?;
        tx.open_table(&post_attributions::TABLE)?;
        Ok(())
    }

    fn verify_db_version_tx(table: &mut db_version::Table) -> DbResult<()> {
        let existing = table.get(&())?.map(|guard| guard.value());
        let db_ver = match existing {
            Some(v) => v,
            None => {
                table.insert(&(), &DB_VERSION)?;
                DB_VERSION
            }
        };

        if DB_VERSION < db_ver {
            return DbVersionTooHighSnafu {
                db_ver,
                code_ver: DB_VERSION,
            }
            .fail();
        }
        Ok(())
    }

    /// Startup recovery: runs left in `Running` by a dead process become
    /// `Failed`, and snapshots that never got their account count written
    /// are garbage-collected together with their membership rows. Must
    /// complete before any new run starts.
    async fn recover_stale_state(&self) -> DbResult<()> {
        self.write_with(|tx| {
            let mut runs_table = tx.open_table(&runs::TABLE)?;

            let mut stale_runs = vec![];
            for entry in runs_table.range(..)? {
                let (k, v) = entry?;
                let record = v.value();
                if record.status == RunStatus::Running {
                    stale_runs.push((k.value(), record));
                }
            }
            for (run_id, mut record) in stale_runs {
                record.status = RunStatus::Failed;
                record.finished_at = Some(Timestamp::now());
                record.notes = Some("interrupted".to_owned());
                runs_table.insert(&run_id, &record)?;
                info!(target: LOG_TARGET, %run_id, "Recovered stale run as failed");
            }

            let mut snapshots_table = tx.open_table(&snapshots::TABLE)?;
            let mut by_time_table = tx.open_table(&snapshots_by_time::TABLE)?;
            let mut followers_table = tx.open_table(&snapshot_followers::TABLE)?;
            let mut following_table = tx.open_table(&snapshot_following::TABLE)?;

            let mut empty_snapshots = vec![];
            for entry in snapshots_table.range(..)? {
                let (k, v) = entry?;
                let record = v.value();
                if record.account_count == 0 {
                    empty_snapshots.push((k.value(), record));
                }
            }
            for (snapshot_id, record) in empty_snapshots {
                snapshots_table.remove(&snapshot_id)?;
                by_time_table.remove(&(record.kind, record.captured_at, snapshot_id))?;
                Self::remove_members_tx(snapshot_id, &mut followers_table)?;
                Self::remove_members_tx(snapshot_id, &mut following_table)?;
                info!(target: LOG_TARGET, %snapshot_id, "Collected empty snapshot");
            }

            Ok(())
        })
        .await
    }

    fn remove_members_tx(
        snapshot_id: SnapshotId,
        table: &mut redb_bincode::Table<'_, (SnapshotId, atlas_core::AccountId), SnapshotMemberRecord>,
    ) -> DbResult<()> {
        let mut keys = vec![];
        for entry in table.range(
            &(snapshot_id, atlas_core::AccountId::default())
                ..&(snapshot_id.next(), atlas_core::AccountId::default()),
        )? {
            let (k, _) = entry?;
            keys.push(k.value());
        }
        for key in keys {
            table.remove(&key)?;
        }
        Ok(())
    }
}

impl Database {
    pub async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let mut dbtx = WriteTransactionCtx::from(inner.begin_write().context(TransactionSnafu)?);
            let res = f(&mut dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub async fn read_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let mut dbtx = inner.begin_read().context(TransactionSnafu)?;

            f(&mut dbtx)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::read_with_inner(&self.inner, f).await
    }
}

pub(crate) fn get_last_in_range<K, V>(
    table: &impl ReadableTable<K, V>,
    range: impl ops::RangeBounds<K>,
) -> Result<Option<K>, DbError>
where
    K: bincode::Decode<()> + bincode::Encode,
    V: bincode::Decode<()> + bincode::Encode,
{
    Ok(table
        .range(range)?
        .next_back()
        .transpose()?
        .map(|(k, _)| k.value()))
}

#[cfg(test)]
mod tests;
