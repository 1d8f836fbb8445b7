use atlas_core::AccountId;

use crate::{AccountRecord, Database, DbResult, WriteTransactionCtx, accounts};

impl Database {
    /// Insert or update an account from a fresh observation.
    ///
    /// Later observations overwrite earlier ones, except that a known
    /// creation timestamp is never erased by an observation lacking one.
    /// Accounts are never deleted.
    pub fn upsert_account_tx(
        account_id: &AccountId,
        observation: AccountRecord,
        table: &mut accounts::Table,
    ) -> DbResult<()> {
        let merged = match table.get(account_id)?.map(|g| g.value()) {
            Some(existing) => AccountRecord {
                created_at: observation.created_at.or(existing.created_at),
                ..observation
            },
            None => observation,
        };
        table.insert(account_id, &merged)?;
        Ok(())
    }

    pub async fn upsert_account(
        &self,
        account_id: AccountId,
        observation: AccountRecord,
    ) -> DbResult<()> {
        self.write_with(|tx| {
            let mut accounts_table = tx.open_table(&accounts::TABLE)?;
            Self::upsert_account_tx(&account_id, observation, &mut accounts_table)
        })
        .await
    }

    pub async fn upsert_accounts(
        &self,
        batch: Vec<(AccountId, AccountRecord)>,
    ) -> DbResult<()> {
        self.write_with(|tx| Self::upsert_accounts_tx(batch, tx))
            .await
    }

    pub fn upsert_accounts_tx(
        batch: Vec<(AccountId, AccountRecord)>,
        tx: &WriteTransactionCtx,
    ) -> DbResult<()> {
        let mut accounts_table = tx.open_table(&accounts::TABLE)?;
        for (account_id, observation) in batch {
            Self::upsert_account_tx(&account_id, observation, &mut accounts_table)?;
        }
        Ok(())
    }

    /// Bulk fetch for frame building; unknown ids are simply absent from the
    /// result.
    pub async fn get_accounts(
        &self,
        ids: Vec<AccountId>,
    ) -> DbResult<std::collections::BTreeMap<AccountId, AccountRecord>> {
        self.read_with(move |tx| {
            let accounts_table = tx.open_table(&accounts::TABLE)?;
            let mut found = std::collections::BTreeMap::new();
            for id in ids {
                if let Some(record) = accounts_table.get(&id)?.map(|g| g.value()) {
                    found.insert(id, record);
                }
            }
            Ok(found)
        })
        .await
    }

    pub async fn get_account(&self, account_id: AccountId) -> DbResult<Option<AccountRecord>> {
        self.read_with(|tx| {
            let accounts_table = tx.open_table(&accounts::TABLE)?;
            Ok(accounts_table.get(&account_id)?.map(|g| g.value()))
        })
        .await
    }

    /// List accounts, optionally filtered by a case-insensitive substring of
    /// handle or display name.
    pub async fn list_accounts(
        &self,
        limit: usize,
        search: Option<String>,
    ) -> DbResult<Vec<(AccountId, AccountRecord)>> {
        let needle = search.map(|s| s.to_lowercase());
        self.read_with(move |tx| {
            let accounts_table = tx.open_table(&accounts::TABLE)?;
            let (page, _) = Self::paginate_table(&accounts_table, None, limit, move |k, v| {
                let matches = match &needle {
                    None => true,
                    Some(needle) => {
                        let handle_match = v
                            .handle
                            .as_deref()
                            .is_some_and(|h| h.to_lowercase().contains(needle));
                        let name_match = v
                            .display_name
                            .as_deref()
                            .is_some_and(|n| n.to_lowercase().contains(needle));
                        handle_match || name_match
                    }
                };
                Ok(matches.then_some((k, v)))
            })?;
            Ok(page)
        })
        .await
    }

    /// Resolve an account id by exact handle, for ego resolution fallbacks.
    pub async fn find_account_by_handle(&self, handle: String) -> DbResult<Option<AccountId>> {
        self.read_with(move |tx| {
            let accounts_table = tx.open_table(&accounts::TABLE)?;
            for entry in accounts_table.range(..)? {
                let (k, v) = entry?;
                if v.value().handle.as_deref() == Some(handle.as_str()) {
                    return Ok(Some(k.value()));
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn count_accounts(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let accounts_table = tx.open_table(&accounts::TABLE)?;
            let mut count = 0;
            for entry in accounts_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}
