use std::collections::BTreeSet;

use atlas_core::{AccountId, EngagerKind, IntervalId, PostId, Timestamp};

use crate::{
    Database, DbResult, InteractionEventRecord, PostRecord, WriteTransactionCtx,
    interaction_events, post_engagers, posts, posts_by_time,
};

impl Database {
    /// Insert or refresh a post. The time index entry moves if a later
    /// observation supplies a creation timestamp the first one lacked.
    pub fn upsert_post_tx(
        post_id: &PostId,
        record: PostRecord,
        tx: &WriteTransactionCtx,
    ) -> DbResult<()> {
        let mut posts_table = tx.open_table(&posts::TABLE)?;
        let mut by_time_table = tx.open_table(&posts_by_time::TABLE)?;

        if let Some(existing) = posts_table.get(post_id)?.map(|g| g.value()) {
            let old_key = (existing.created_at.unwrap_or(Timestamp::ZERO), post_id.clone());
            by_time_table.remove(&old_key)?;
        }

        let time_key = (record.created_at.unwrap_or(Timestamp::ZERO), post_id.clone());
        by_time_table.insert(&time_key, &())?;
        posts_table.insert(post_id, &record)?;
        Ok(())
    }

    pub async fn upsert_post(&self, post_id: PostId, record: PostRecord) -> DbResult<()> {
        self.write_with(|tx| Self::upsert_post_tx(&post_id, record, tx))
            .await
    }

    pub async fn get_post(&self, post_id: PostId) -> DbResult<Option<PostRecord>> {
        self.read_with(|tx| {
            let posts_table = tx.open_table(&posts::TABLE)?;
            Ok(posts_table.get(&post_id)?.map(|g| g.value()))
        })
        .await
    }

    /// Posts created in `[from, to]`, newest first.
    pub async fn posts_in_window(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> DbResult<Vec<(PostId, PostRecord)>> {
        self.read_with(move |tx| {
            let posts_table = tx.open_table(&posts::TABLE)?;
            let by_time_table = tx.open_table(&posts_by_time::TABLE)?;

            let mut found = vec![];
            for entry in by_time_table.range(&(from, PostId::default())..)? {
                let (k, _) = entry?;
                let (ts, post_id) = k.value();
                if to < ts {
                    break;
                }
                if let Some(record) = posts_table.get(&post_id)?.map(|g| g.value()) {
                    found.push((post_id, record));
                }
            }
            // Newest first
            found.reverse();
            Ok(found)
        })
        .await
    }

    /// Append interaction events, keyed by creation time plus the database's
    /// event-order counter.
    pub async fn insert_interaction_events(
        &self,
        events: Vec<InteractionEventRecord>,
    ) -> DbResult<()> {
        let keyed: Vec<_> = events
            .into_iter()
            .map(|record| {
                let ts = record.created_at.unwrap_or(Timestamp::ZERO);
                ((ts, self.next_event_order()), record)
            })
            .collect();
        self.write_with(|tx| {
            let mut events_table = tx.open_table(&interaction_events::TABLE)?;
            for (key, record) in &keyed {
                events_table.insert(key, record)?;
            }
            Ok(())
        })
        .await
    }

    /// Interaction events created in `[from, to]`.
    pub async fn interactions_in_window(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> DbResult<Vec<InteractionEventRecord>> {
        self.read_with(move |tx| {
            let events_table = tx.open_table(&interaction_events::TABLE)?;
            let mut found = vec![];
            for entry in events_table.range(&(from, 0)..=&(to, u64::MAX))? {
                let (_, v) = entry?;
                found.push(v.value());
            }
            Ok(found)
        })
        .await
    }

    /// Source accounts of any interaction referencing the post.
    pub async fn interaction_sources_for_post(
        &self,
        post_id: PostId,
    ) -> DbResult<BTreeSet<AccountId>> {
        self.read_with(move |tx| {
            let events_table = tx.open_table(&interaction_events::TABLE)?;
            let mut sources = BTreeSet::new();
            for entry in events_table.range(..)? {
                let (_, v) = entry?;
                let record = v.value();
                if record.post_id.as_ref() == Some(&post_id) {
                    sources.insert(record.src_id);
                }
            }
            Ok(sources)
        })
        .await
    }

    /// Record engagement, unique per (interval, post, account, kind).
    pub fn insert_post_engager_tx(
        post_id: &PostId,
        interval_id: IntervalId,
        account_id: &AccountId,
        kind: EngagerKind,
        tx: &WriteTransactionCtx,
    ) -> DbResult<()> {
        let mut engagers_table = tx.open_table(&post_engagers::TABLE)?;
        engagers_table.insert(
            &(post_id.clone(), interval_id, account_id.clone(), kind),
            &(),
        )?;
        Ok(())
    }

    /// All engagers of one post, across every interval.
    pub async fn engagers_for_post(
        &self,
        post_id: PostId,
    ) -> DbResult<Vec<(IntervalId, AccountId, EngagerKind)>> {
        self.read_with(move |tx| {
            let engagers_table = tx.open_table(&post_engagers::TABLE)?;
            let lo = (
                post_id.clone(),
                IntervalId::ZERO,
                AccountId::default(),
                EngagerKind::Like,
            );
            let mut found = vec![];
            for entry in engagers_table.range(&lo..)? {
                let (k, _) = entry?;
                let (entry_post, interval_id, account_id, kind) = k.value();
                if entry_post != post_id {
                    break;
                }
                found.push((interval_id, account_id, kind));
            }
            Ok(found)
        })
        .await
    }

    /// Engagers grouped per post for every post created in `[from, to]`.
    /// Feeds co-engagement edge building.
    pub async fn engagers_by_post_in_window(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> DbResult<Vec<(PostId, BTreeSet<AccountId>)>> {
        let posts = self.posts_in_window(from, to).await?;
        let mut grouped = vec![];
        for (post_id, _) in posts {
            let engagers: BTreeSet<AccountId> = self
                .engagers_for_post(post_id.clone())
                .await?
                .into_iter()
                .map(|(_, account_id, _)| account_id)
                .collect();
            if !engagers.is_empty() {
                grouped.push((post_id, engagers));
            }
        }
        Ok(grouped)
    }

    pub async fn count_posts(&self) -> DbResult<u64> {
        self.read_with(|tx| {
            let posts_table = tx.open_table(&posts::TABLE)?;
            let mut count = 0;
            for entry in posts_table.range(..)? {
                entry?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}
