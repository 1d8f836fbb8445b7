use atlas_core::RawFetchId;

use crate::{Database, DbResult, RawFetchRecord, WriteTransactionCtx, get_last_in_range, raw_fetches};

impl Database {
    /// Append one raw upstream page. The raw layer is append-only; nothing
    /// in the system mutates these rows.
    pub fn insert_raw_fetch_tx(
        record: &RawFetchRecord,
        tx: &WriteTransactionCtx,
    ) -> DbResult<RawFetchId> {
        let mut raw_table = tx.open_table(&raw_fetches::TABLE)?;

        let fetch_id = get_last_in_range(&raw_table, ..)?
            .map(RawFetchId::next)
            .unwrap_or(RawFetchId::ZERO);
        raw_table.insert(&fetch_id, record)?;
        Ok(fetch_id)
    }

    pub async fn insert_raw_fetch(&self, record: RawFetchRecord) -> DbResult<RawFetchId> {
        self.write_with(|tx| Self::insert_raw_fetch_tx(&record, tx))
            .await
    }

    pub async fn count_raw_fetches(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let raw_table = tx.open_table(&raw_fetches::TABLE)?;
            let mut count = 0;
            for entry in raw_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}
