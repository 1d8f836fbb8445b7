pub mod id;
pub mod kind;

mod edge;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub use self::edge::EdgeKind;
pub use self::id::{AccountId, IntervalId, PostId, RawFetchId, RunId, SnapshotId};
pub use self::kind::{EngagerKind, FollowEventKind, InteractionKind, RunStatus, SnapshotKind};

pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Seconds since the Unix epoch.
///
/// Used both as a table-key component (bincode keeps the numeric ordering)
/// and in frame payloads. Sub-second precision is never needed: upstream
/// timestamps are second-granular and all decay math works in whole seconds.
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
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Time went backwards")
                .as_secs(),
        )
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Seconds elapsed since `earlier`; zero if `earlier` is in the future.
    pub fn secs_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn saturating_sub_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    pub fn saturating_sub_days(self, days: u64) -> Self {
        self.saturating_sub_secs(days.saturating_mul(SECS_PER_DAY))
    }

    pub fn saturating_add_days(self, days: u64) -> Self {
        self.saturating_add_secs(days.saturating_mul(SECS_PER_DAY))
    }

    /// Absolute distance in seconds, for nearest-interval resolution.
    pub fn abs_diff(self, other: Timestamp) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match time::OffsetDateTime::from_unix_timestamp(self.0 as i64)
            .ok()
            .and_then(|dt| {
                dt.format(&time::format_description::well_known::Rfc3339)
                    .ok()
            }) {
            Some(s) => f.write_str(&s),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A point in the 3-D layout space.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}
