//! Canonical user and post shapes, plus the per-upstream adapters mapping
//! into them. Downstream code only ever sees the canonical shapes.

use atlas_core::{AccountId, PostId, Timestamp};
use serde::{Deserialize, Serialize};

/// Canonical account payload, whichever upstream produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: AccountId,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub tweet_count: Option<u64>,
    pub media_count: Option<u64>,
    pub favourites_count: Option<u64>,
    pub is_automated: bool,
    pub can_dm: Option<bool>,
    pub possibly_sensitive: bool,
    pub created_at: Option<Timestamp>,
}

/// Canonical post payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: PostId,
    pub text: String,
    pub created_at: Option<Timestamp>,
    /// Raw public-metrics blob (like/retweet/reply/quote counts).
    pub metrics: serde_json::Value,
    pub conversation_id: Option<PostId>,
    pub in_reply_to: Option<PostId>,
    pub author: Option<UserProfile>,
}

/// Best-effort timestamp parsing: RFC 3339, else raw unix seconds rendered
/// as digits. Anything else is dropped rather than guessed at.
pub(crate) fn parse_upstream_time(raw: &str) -> Option<Timestamp> {
    if let Ok(dt) = time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
    {
        return u64::try_from(dt.unix_timestamp()).ok().map(Timestamp::from);
    }
    raw.parse::<u64>().ok().map(Timestamp::from)
}

// ============================================================================
// Primary bulk provider payloads
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PrimaryUser {
    pub id: Option<String>,
    pub user_name: Option<String>,
    pub name: Option<String>,
    pub profile_picture: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub statuses_count: Option<u64>,
    pub media_count: Option<u64>,
    pub favourites_count: Option<u64>,
    pub created_at: Option<String>,
    pub is_automated: Option<bool>,
    pub possibly_sensitive: Option<bool>,
    pub can_dm: Option<bool>,
}

impl PrimaryUser {
    pub fn normalize(self) -> Option<UserProfile> {
        let id = self.id?;
        Some(UserProfile {
            id: AccountId::from(id),
            handle: self.user_name,
            display_name: self.name,
            avatar_url: self.profile_picture,
            bio: self.description,
            location: self.location,
            followers_count: self.followers,
            following_count: self.following,
            tweet_count: self.statuses_count,
            media_count: self.media_count,
            favourites_count: self.favourites_count,
            is_automated: self.is_automated.unwrap_or(false),
            can_dm: self.can_dm,
            possibly_sensitive: self.possibly_sensitive.unwrap_or(false),
            created_at: self.created_at.as_deref().and_then(parse_upstream_time),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PrimaryTweet {
    pub id: Option<String>,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub like_count: Option<u64>,
    pub retweet_count: Option<u64>,
    pub reply_count: Option<u64>,
    pub quote_count: Option<u64>,
    pub conversation_id: Option<String>,
    pub in_reply_to_id: Option<String>,
    pub author: Option<PrimaryUser>,
}

impl PrimaryTweet {
    pub fn normalize(self) -> Option<PostSummary> {
        let id = self.id?;
        let metrics = serde_json::json!({
            "like_count": self.like_count.unwrap_or(0),
            "retweet_count": self.retweet_count.unwrap_or(0),
            "reply_count": self.reply_count.unwrap_or(0),
            "quote_count": self.quote_count.unwrap_or(0),
        });
        Some(PostSummary {
            id: PostId::from(id),
            text: self.text.unwrap_or_default(),
            created_at: self.created_at.as_deref().and_then(parse_upstream_time),
            metrics,
            conversation_id: self.conversation_id.map(PostId::from),
            in_reply_to: self.in_reply_to_id.map(PostId::from),
            author: self.author.and_then(PrimaryUser::normalize),
        })
    }
}

// Page envelopes. The provider is inconsistent about the list field name, so
// each endpoint names its own.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PrimaryUserInfoEnvelope {
    pub data: PrimaryUser,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FollowersEnvelope {
    pub followers: Vec<PrimaryUser>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FollowingsEnvelope {
    pub followings: Vec<PrimaryUser>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct TweetsEnvelope {
    pub tweets: Vec<PrimaryTweet>,
    /// Some reply endpoints use `replies` instead of `tweets`.
    pub replies: Vec<PrimaryTweet>,
    pub next_cursor: Option<String>,
}

impl TweetsEnvelope {
    pub fn into_tweets(self) -> Vec<PrimaryTweet> {
        if self.tweets.is_empty() {
            self.replies
        } else {
            self.tweets
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UsersEnvelope {
    pub users: Vec<PrimaryUser>,
    pub next_cursor: Option<String>,
}

// ============================================================================
// Fallback provider payloads (like-lists only)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FallbackUser {
    pub id: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub profile_image_url: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub public_metrics: FallbackUserMetrics,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FallbackUserMetrics {
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub tweet_count: Option<u64>,
    pub listed_count: Option<u64>,
}

impl FallbackUser {
    pub fn normalize(self) -> Option<UserProfile> {
        let id = self.id?;
        Some(UserProfile {
            id: AccountId::from(id),
            handle: self.username,
            display_name: self.name,
            avatar_url: self.profile_image_url,
            bio: self.description,
            location: self.location,
            followers_count: self.public_metrics.followers_count,
            following_count: self.public_metrics.following_count,
            tweet_count: self.public_metrics.tweet_count,
            media_count: None,
            favourites_count: None,
            is_automated: false,
            can_dm: None,
            possibly_sensitive: false,
            created_at: self.created_at.as_deref().and_then(parse_upstream_time),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FallbackUsersEnvelope {
    pub data: Vec<FallbackUser>,
    pub meta: FallbackMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FallbackMeta {
    pub next_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_user_normalizes_full_field_set() {
        let raw = serde_json::json!({
            "id": "123",
            "userName": "alice",
            "name": "Alice",
            "profilePicture": "https://img.example/alice.png",
            "description": "hello",
            "followers": 500,
            "following": 100,
            "statusesCount": 42,
            "mediaCount": 7,
            "favouritesCount": 99,
            "isAutomated": true,
            "canDm": false,
            "createdAt": "2020-01-01T00:00:00Z",
        });
        let user: PrimaryUser = serde_json::from_value(raw).unwrap();
        let profile = user.normalize().unwrap();

        assert_eq!(profile.id.as_str(), "123");
        assert_eq!(profile.handle.as_deref(), Some("alice"));
        assert_eq!(profile.followers_count, Some(500));
        assert_eq!(profile.media_count, Some(7));
        assert!(profile.is_automated);
        assert_eq!(profile.can_dm, Some(false));
        assert_eq!(
            profile.created_at,
            Some(Timestamp::from(1_577_836_800)),
            "2020-01-01 in unix seconds"
        );
    }

    #[test]
    fn user_without_id_is_dropped() {
        let user: PrimaryUser = serde_json::from_value(serde_json::json!({
            "userName": "ghost"
        }))
        .unwrap();
        assert!(user.normalize().is_none());
    }

    #[test]
    fn fallback_user_maps_nested_metrics() {
        let raw = serde_json::json!({
            "id": "9",
            "username": "bob",
            "public_metrics": {"followers_count": 12, "following_count": 3},
        });
        let user: FallbackUser = serde_json::from_value(raw).unwrap();
        let profile = user.normalize().unwrap();
        assert_eq!(profile.followers_count, Some(12));
        assert_eq!(profile.media_count, None);
    }

    #[test]
    fn tweet_metrics_default_to_zero() {
        let tweet: PrimaryTweet = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "text": "hi",
        }))
        .unwrap();
        let post = tweet.normalize().unwrap();
        assert_eq!(post.metrics["like_count"], 0);
        assert_eq!(post.text, "hi");
    }

    #[test]
    fn replies_envelope_falls_back_to_replies_field() {
        let envelope: TweetsEnvelope = serde_json::from_value(serde_json::json!({
            "replies": [{"id": "r1", "text": "reply"}],
            "next_cursor": "abc",
        }))
        .unwrap();
        let tweets = envelope.into_tweets();
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].id.as_deref(), Some("r1"));
    }

    #[test]
    fn timestamp_parsing_variants() {
        assert_eq!(
            parse_upstream_time("2020-01-01T00:00:00Z"),
            Some(Timestamp::from(1_577_836_800))
        );
        assert_eq!(parse_upstream_time("1600000000"), Some(Timestamp::from(1_600_000_000)));
        assert_eq!(parse_upstream_time("yesterday"), None);
    }
}
