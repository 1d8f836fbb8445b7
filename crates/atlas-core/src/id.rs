//! Identifier newtypes.
//!
//! Sequence ids (`RunId`, `SnapshotId`, `IntervalId`, `RawFetchId`) are
//! store-assigned `u64`s; `AccountId` and `PostId` are the upstream's stable
//! external identifiers and stay opaque strings.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

macro_rules! define_seq_id {
    (
        $(#[$outer:meta])*
        $t:ident
    ) => {
        $(#[$outer])*
        #[derive(
            Encode,
            Decode,
            Serialize,
            Deserialize,
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
        )]
        #[serde(transparent)]
        pub struct $t(u64);

        impl $t {
            pub const ZERO: Self = Self(0);

            pub fn as_u64(self) -> u64 {
                self.0
            }

            /// The next id in sequence; used as an exclusive range bound for
            /// prefix scans over `(id, …)` keys.
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl From<u64> for $t {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $t {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

define_seq_id! {
    /// One collector invocation.
    RunId
}
define_seq_id! {
    /// One captured follower/following membership set.
    SnapshotId
}
define_seq_id! {
    /// The span between two consecutive snapshots of the same kind.
    IntervalId
}
define_seq_id! {
    /// One stored upstream page.
    RawFetchId
}

macro_rules! define_external_id {
    (
        $(#[$outer:meta])*
        $t:ident
    ) => {
        $(#[$outer])*
        #[derive(
            Encode,
            Decode,
            Serialize,
            Deserialize,
            Debug,
            Clone,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
        )]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $t {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }
    };
}

define_external_id! {
    /// Stable external account identifier assigned by the upstream.
    AccountId
}
define_external_id! {
    /// Stable external post identifier assigned by the upstream.
    PostId
}
