//! Closed enums for the handful of string-typed discriminators the upstream
//! and the store share.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(display("Unknown kind `{value}`"))]
pub struct KindParseError {
    pub value: String,
}

macro_rules! impl_kind_str {
    ($t:ident, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = KindParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    _ => Err(KindParseError { value: s.to_owned() }),
                }
            }
        }
    };
}

/// Which side of the ego's relationships a snapshot captured.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Followers,
    Following,
}

impl_kind_str!(SnapshotKind, {
    Followers => "followers",
    Following => "following",
});

#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl_kind_str!(RunStatus, {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Direction of a membership change inside one interval.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum FollowEventKind {
    New,
    Lost,
}

impl_kind_str!(FollowEventKind, {
    New => "new",
    Lost => "lost",
});

/// Post-level interaction between two accounts.
///
/// The static base-weight table replaces the original system's per-type
/// dynamic dispatch; exhaustive matching keeps new variants from silently
/// defaulting to a weight.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Reply,
    Quote,
    Mention,
    Retweet,
    Like,
}

impl InteractionKind {
    /// Base edge weight before recency decay.
    pub fn base_weight(self) -> f64 {
        match self {
            Self::Reply => 4.0,
            Self::Quote => 3.0,
            Self::Mention => 2.0,
            Self::Retweet => 1.0,
            Self::Like => 0.5,
        }
    }
}

impl_kind_str!(InteractionKind, {
    Reply => "reply",
    Quote => "quote",
    Mention => "mention",
    Retweet => "retweet",
    Like => "like",
});

/// How an account engaged with a specific post.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum EngagerKind {
    Like,
    Retweet,
    Reply,
    Quote,
}

impl_kind_str!(EngagerKind, {
    Like => "like",
    Retweet => "retweet",
    Reply => "reply",
    Quote => "quote",
});

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [SnapshotKind::Followers, SnapshotKind::Following] {
            assert_eq!(SnapshotKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(SnapshotKind::from_str("friends").is_err());
    }

    #[test]
    fn reply_weight_highest() {
        for kind in [
            InteractionKind::Quote,
            InteractionKind::Mention,
            InteractionKind::Retweet,
            InteractionKind::Like,
        ] {
            assert!(kind.base_weight() < InteractionKind::Reply.base_weight());
        }
    }
}
