//! Ingestion client for the two upstreams.
//!
//! The primary bulk provider serves profiles, follower/following lists,
//! posts, replies, quotes, retweeters and mentions; the optional fallback
//! provider is only consulted for like-lists. Both are normalized into the
//! canonical shapes in [`models`] at this boundary, so nothing downstream
//! knows which upstream a payload came from.

mod models;
mod paginate;

use std::time::Duration;

use backon::Retryable as _;
use reqwest::Client;
use serde_json::Value;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, warn};
use url::Url;

pub use self::models::{PostSummary, UserProfile};
pub use self::paginate::{Page, RawPage, paginate};
use self::models::{
    FallbackUsersEnvelope, FollowersEnvelope, FollowingsEnvelope, PrimaryTweet, PrimaryUser,
    PrimaryUserInfoEnvelope, TweetsEnvelope, UsersEnvelope,
};

const LOG_TARGET: &str = "atlas::client";

const PRIMARY_BASE_URL: &str = "https://api.twitterapi.io/";
const FALLBACK_BASE_URL: &str = "https://api.twitter.com/2/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Backoff schedule: 2 s base doubling up to 30 s, two retries after the
/// initial attempt (three attempts total).
const RETRY_MIN_DELAY: Duration = Duration::from_secs(2);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
const RETRY_TIMES: usize = 2;

const MAX_PAGE_SIZE: usize = 200;
const FALLBACK_MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Snafu)]
pub enum ClientError {
    #[snafu(display("Transient transport failure: {source}"))]
    Transport { source: reqwest::Error },
    #[snafu(display("Transient upstream status {status}"))]
    TransientStatus { status: u16 },
    #[snafu(display("Upstream HTTP {status}: {body}"))]
    Hard { status: u16, body: String },
    #[snafu(display("Failed to decode upstream payload: {source}"))]
    Decode { source: serde_json::Error },
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Rate limits, server errors and connection failures get retried;
    /// everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::TransientStatus { .. })
    }

    /// 403/404 during bulk enumeration may be skipped (suspended or
    /// protected accounts).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Hard { status: 403 | 404, .. })
    }
}

/// Blake3 of the sorted `key=value` request parameters, truncated to
/// 16 hex digits. Lets identical requests be correlated across runs.
pub fn params_hash(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    sorted.sort_unstable();
    let hash = blake3::hash(sorted.join("&").as_bytes());
    data_encoding::HEXLOWER.encode(&hash.as_bytes()[..8])
}

pub struct ClientOpts {
    /// API key for the primary bulk provider.
    pub api_key: String,
    /// Bearer token for the fallback provider; enables like-lists.
    pub fallback_bearer_token: Option<String>,
}

pub struct NetworkClient {
    primary: Client,
    primary_base: Url,
    fallback: Option<(Client, Url)>,
}

impl NetworkClient {
    pub fn new(opts: ClientOpts) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            reqwest::header::HeaderValue::from_str(&opts.api_key)
                .expect("API key must be a valid header value"),
        );
        let primary = Client::builder()
            .user_agent("atlas/0.1")
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        let fallback = opts.fallback_bearer_token.map(|token| {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .expect("Bearer token must be a valid header value"),
            );
            let client = Client::builder()
                .user_agent("atlas/0.1")
                .default_headers(headers)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client");
            (
                client,
                Url::parse(FALLBACK_BASE_URL).expect("Static URL is valid"),
            )
        });

        Self {
            primary,
            primary_base: Url::parse(PRIMARY_BASE_URL).expect("Static URL is valid"),
            fallback,
        }
    }

    /// Whether like-lists can be fetched at all.
    pub fn has_like_lists(&self) -> bool {
        self.fallback.is_some()
    }

    async fn get_json_once(
        client: &Client,
        base: &Url,
        path: &str,
        params: &[(&str, String)],
    ) -> ClientResult<Value> {
        // Paths are given absolute for readability; joining a relative path
        // keeps the fallback's `/2` base segment intact.
        let url = base
            .join(path.trim_start_matches('/'))
            .expect("Endpoint paths are valid");
        let response = client
            .get(url)
            .query(params)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await.context(TransportSnafu)?;
            return serde_json::from_str(&body).context(DecodeSnafu);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            TransientStatusSnafu {
                status: status.as_u16(),
            }
            .fail()
        } else {
            HardSnafu {
                status: status.as_u16(),
                body,
            }
            .fail()
        }
    }

    async fn get_json(
        client: &Client,
        base: &Url,
        path: &str,
        params: &[(&str, String)],
    ) -> ClientResult<Value> {
        (|| async { Self::get_json_once(client, base, path, params).await })
            .retry(
                backon::ExponentialBuilder::default()
                    .with_min_delay(RETRY_MIN_DELAY)
                    .with_max_delay(RETRY_MAX_DELAY)
                    .with_max_times(RETRY_TIMES),
            )
            .when(ClientError::is_transient)
            .notify(|err, dur| {
                warn!(target: LOG_TARGET, %err, delay_secs = dur.as_secs(), path, "Retrying upstream request")
            })
            .await
    }

    async fn primary_get(&self, path: &str, params: &[(&str, String)]) -> ClientResult<Value> {
        Self::get_json(&self.primary, &self.primary_base, path, params).await
    }

    fn decode<T>(value: Value) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_value(value).context(DecodeSnafu)
    }

    /// Resolve a profile by handle.
    pub async fn user_by_handle(&self, handle: &str) -> ClientResult<UserProfile> {
        let params = [("userName", handle.to_owned())];
        let value = self.primary_get("/twitter/user/info", &params).await?;
        let envelope: PrimaryUserInfoEnvelope = Self::decode(value)?;
        envelope.normalized_user()
    }

    /// Followers of a user, newest first, one [`Page`] per upstream page.
    pub fn followers<'c>(
        &'c self,
        handle: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<UserProfile>>> + 'c {
        let handle = handle.to_owned();
        paginate(max_pages, move |cursor| {
            let handle = handle.clone();
            async move {
                let mut params = vec![
                    ("userName", handle),
                    ("pageSize", MAX_PAGE_SIZE.to_string()),
                ];
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self.primary_get("/twitter/user/followers", &params).await?;
                let envelope: FollowersEnvelope = Self::decode(value.clone())?;
                Ok(RawPage {
                    items: envelope
                        .followers
                        .into_iter()
                        .filter_map(PrimaryUser::normalize)
                        .collect(),
                    next_cursor: envelope.next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// Accounts the user follows, newest first.
    pub fn following<'c>(
        &'c self,
        handle: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<UserProfile>>> + 'c {
        let handle = handle.to_owned();
        paginate(max_pages, move |cursor| {
            let handle = handle.clone();
            async move {
                let mut params = vec![
                    ("userName", handle),
                    ("pageSize", MAX_PAGE_SIZE.to_string()),
                ];
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self
                    .primary_get("/twitter/user/followings", &params)
                    .await?;
                let envelope: FollowingsEnvelope = Self::decode(value.clone())?;
                Ok(RawPage {
                    items: envelope
                        .followings
                        .into_iter()
                        .filter_map(PrimaryUser::normalize)
                        .collect(),
                    next_cursor: envelope.next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// The user's latest posts.
    pub fn user_posts<'c>(
        &'c self,
        handle: &str,
        include_replies: bool,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<PostSummary>>> + 'c {
        let handle = handle.to_owned();
        paginate(max_pages, move |cursor| {
            let handle = handle.clone();
            async move {
                let mut params = vec![("userName", handle)];
                if include_replies {
                    params.push(("includeReplies", "true".to_owned()));
                }
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self
                    .primary_get("/twitter/user/last_tweets", &params)
                    .await?;
                let envelope: TweetsEnvelope = Self::decode(value.clone())?;
                let next_cursor = envelope.next_cursor.clone();
                Ok(RawPage {
                    items: envelope
                        .into_tweets()
                        .into_iter()
                        .filter_map(PrimaryTweet::normalize)
                        .collect(),
                    next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// Replies to a post.
    pub fn post_replies<'c>(
        &'c self,
        post_id: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<PostSummary>>> + 'c {
        self.tweet_page_stream("/twitter/tweet/replies", post_id, max_pages)
    }

    /// Quote posts of a post.
    pub fn post_quotes<'c>(
        &'c self,
        post_id: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<PostSummary>>> + 'c {
        self.tweet_page_stream("/twitter/tweet/quotes", post_id, max_pages)
    }

    fn tweet_page_stream<'c>(
        &'c self,
        path: &'static str,
        post_id: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<PostSummary>>> + 'c {
        let post_id = post_id.to_owned();
        paginate(max_pages, move |cursor| {
            let post_id = post_id.clone();
            async move {
                let mut params = vec![("tweetId", post_id)];
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self.primary_get(path, &params).await?;
                let envelope: TweetsEnvelope = Self::decode(value.clone())?;
                let next_cursor = envelope.next_cursor.clone();
                Ok(RawPage {
                    items: envelope
                        .into_tweets()
                        .into_iter()
                        .filter_map(PrimaryTweet::normalize)
                        .collect(),
                    next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// Accounts that reposted a post.
    pub fn post_retweeters<'c>(
        &'c self,
        post_id: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<UserProfile>>> + 'c {
        let post_id = post_id.to_owned();
        paginate(max_pages, move |cursor| {
            let post_id = post_id.clone();
            async move {
                let mut params = vec![("tweetId", post_id)];
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self
                    .primary_get("/twitter/tweet/retweeters", &params)
                    .await?;
                let envelope: UsersEnvelope = Self::decode(value.clone())?;
                Ok(RawPage {
                    items: envelope
                        .users
                        .into_iter()
                        .filter_map(PrimaryUser::normalize)
                        .collect(),
                    next_cursor: envelope.next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// Posts mentioning a user.
    pub fn mentions<'c>(
        &'c self,
        handle: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<PostSummary>>> + 'c {
        let handle = handle.to_owned();
        paginate(max_pages, move |cursor| {
            let handle = handle.clone();
            async move {
                let mut params = vec![("userName", handle)];
                if let Some(cursor) = &cursor {
                    params.push(("cursor", cursor.clone()));
                }
                let hash = params_hash(&params);
                let value = self.primary_get("/twitter/user/mentions", &params).await?;
                let envelope: TweetsEnvelope = Self::decode(value.clone())?;
                let next_cursor = envelope.next_cursor.clone();
                Ok(RawPage {
                    items: envelope
                        .into_tweets()
                        .into_iter()
                        .filter_map(PrimaryTweet::normalize)
                        .collect(),
                    next_cursor,
                    payload: value,
                    params_hash: hash,
                })
            }
        })
    }

    /// Accounts that liked a post, via the fallback upstream. Yields nothing
    /// when no fallback credential is configured.
    pub fn post_likers<'c>(
        &'c self,
        post_id: &str,
        max_pages: Option<usize>,
    ) -> impl futures::Stream<Item = ClientResult<Page<UserProfile>>> + 'c {
        let post_id = post_id.to_owned();
        async_stream::try_stream! {
            let Some((client, base)) = &self.fallback else {
                debug!(target: LOG_TARGET, "No like-list upstream configured, skipping");
                return;
            };

            let path = format!("/tweets/{post_id}/liking_users");
            let pages = paginate(max_pages, move |cursor| {
                let path = path.clone();
                async move {
                    let mut params = vec![
                        ("max_results", FALLBACK_MAX_PAGE_SIZE.to_string()),
                        (
                            "user.fields",
                            "id,name,username,profile_image_url,public_metrics,created_at,description,location"
                                .to_owned(),
                        ),
                    ];
                    if let Some(cursor) = &cursor {
                        params.push(("pagination_token", cursor.clone()));
                    }
                    let hash = params_hash(&params);
                    let value = Self::get_json(client, base, &path, &params).await?;
                    let envelope: FallbackUsersEnvelope = Self::decode(value.clone())?;
                    Ok(RawPage {
                        items: envelope
                            .data
                            .into_iter()
                            .filter_map(models::FallbackUser::normalize)
                            .collect(),
                        next_cursor: envelope.meta.next_token,
                        payload: value,
                        params_hash: hash,
                    })
                }
            });
            futures::pin_mut!(pages);
            while let Some(page) = futures::StreamExt::next(&mut pages).await {
                yield page?;
            }
        }
    }
}

impl PrimaryUserInfoEnvelope {
    fn normalized_user(self) -> ClientResult<UserProfile> {
        self.data.normalize().ok_or_else(|| ClientError::Hard {
            status: 200,
            body: "user payload missing id".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_hash_is_order_insensitive() {
        let a = params_hash(&[("a", "1".to_owned()), ("b", "2".to_owned())]);
        let b = params_hash(&[("b", "2".to_owned()), ("a", "1".to_owned())]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn transient_classification() {
        assert!(
            ClientError::TransientStatus { status: 429 }.is_transient()
        );
        assert!(
            !ClientError::Hard {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ClientError::Hard {
                status: 404,
                body: String::new()
            }
            .is_permission_denied()
        );
        assert!(
            !ClientError::Hard {
                status: 401,
                body: String::new()
            }
            .is_permission_denied()
        );
    }
}
