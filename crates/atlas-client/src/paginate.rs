//! Generator-style pagination.
//!
//! Each upstream endpoint is exposed as a lazy, finite, non-restartable
//! stream of [`Page`]s. The stream yields after every page, so the consumer
//! can commit to the store between pages; a crash then loses at most one
//! unfinished page.

use std::future::Future;

use futures::Stream;
use serde_json::Value;

use crate::ClientResult;

/// What an endpoint-specific fetch closure returns for one request.
pub struct RawPage<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` or empty means exhausted.
    pub next_cursor: Option<String>,
    /// The decoded upstream payload, for raw-layer storage.
    pub payload: Value,
    /// Hash of the request parameters that produced this page.
    pub params_hash: String,
}

/// One yielded page.
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor used to request this page (`None` for the first).
    pub cursor_in: Option<String>,
    /// Cursor returned for the next page (`None` when exhausted).
    pub cursor_out: Option<String>,
    /// True iff the page cap was reached while more data remained.
    pub truncated: bool,
    pub payload: Value,
    pub params_hash: String,
}

/// Drive `fetch_page` until the upstream is exhausted, the page cap is
/// reached, or a page comes back empty (defensive against cursor loops).
pub fn paginate<T, F, Fut>(
    max_pages: Option<usize>,
    fetch_page: F,
) -> impl Stream<Item = ClientResult<Page<T>>>
where
    F: Fn(Option<String>) -> Fut,
    Fut: Future<Output = ClientResult<RawPage<T>>>,
{
    async_stream::try_stream! {
        let mut cursor: Option<String> = None;
        let mut page_count = 0;

        loop {
            let cursor_in = cursor.clone();
            let raw = fetch_page(cursor_in.clone()).await?;

            let cursor_out = raw.next_cursor.filter(|c| !c.is_empty());
            page_count += 1;

            let cap_reached = max_pages.is_some_and(|cap| cap <= page_count);
            let exhausted = cursor_out.is_none();
            let empty_page = raw.items.is_empty();
            let truncated = cap_reached && !exhausted;

            yield Page {
                items: raw.items,
                cursor_in,
                cursor_out: cursor_out.clone(),
                truncated,
                payload: raw.payload,
                params_hash: raw.params_hash,
            };

            if exhausted || cap_reached || empty_page {
                break;
            }
            cursor = cursor_out;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt as _;

    use super::*;
    use crate::{ClientError, ClientResult};

    /// Fake upstream with three pages of two items each.
    async fn three_pages(cursor: Option<String>) -> ClientResult<RawPage<u32>> {
        let (items, next) = match cursor.as_deref() {
            None => (vec![1, 2], Some("c1")),
            Some("c1") => (vec![3, 4], Some("c2")),
            Some("c2") => (vec![5, 6], None),
            other => panic!("unexpected cursor {other:?}"),
        };
        Ok(RawPage {
            items,
            next_cursor: next.map(str::to_owned),
            payload: Value::Null,
            params_hash: "0".repeat(16),
        })
    }

    #[test_log::test(tokio::test)]
    async fn walks_until_cursor_exhausted() {
        let pages: Vec<_> = paginate(None, three_pages)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].cursor_in, None);
        assert_eq!(pages[0].cursor_out.as_deref(), Some("c1"));
        assert_eq!(pages[1].cursor_in.as_deref(), Some("c1"));
        assert_eq!(pages[2].cursor_out, None);
        assert!(pages.iter().all(|p| !p.truncated));

        let items: Vec<u32> = pages.into_iter().flat_map(|p| p.items).collect();
        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test_log::test(tokio::test)]
    async fn page_cap_marks_truncation() {
        let pages: Vec<_> = paginate(Some(2), three_pages)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert!(!pages[0].truncated);
        assert!(pages[1].truncated, "cap hit with more data remaining");
    }

    #[test_log::test(tokio::test)]
    async fn cap_on_final_page_is_not_truncation() {
        let pages: Vec<_> = paginate(Some(3), three_pages)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert!(!pages[2].truncated, "nothing remained past the cap");
    }

    #[test_log::test(tokio::test)]
    async fn empty_page_stops_despite_cursor() {
        let calls = AtomicUsize::new(0);
        let pages: Vec<_> = paginate(None, |_cursor| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(RawPage::<u32> {
                    items: vec![],
                    next_cursor: Some("loop".to_owned()),
                    payload: Value::Null,
                    params_hash: "0".repeat(16),
                })
            }
        })
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn empty_cursor_string_means_exhausted() {
        let pages: Vec<_> = paginate(None, |_cursor| async {
            Ok(RawPage {
                items: vec![1u32],
                next_cursor: Some(String::new()),
                payload: Value::Null,
                params_hash: "0".repeat(16),
            })
        })
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].cursor_out, None);
    }

    #[test_log::test(tokio::test)]
    async fn error_ends_stream() {
        let mut stream = std::pin::pin!(paginate(None, |_cursor| async {
            Err::<RawPage<u32>, _>(ClientError::TransientStatus { status: 503 })
        }));

        let first = stream.next().await.expect("one item");
        assert!(first.is_err());
        assert!(stream.next().await.is_none());
    }
}
