//! The temporal graph-construction engine: collection runs, interval
//! diffing, frame building, post attribution and frame interpolation.

pub mod attribution;
pub mod collector;
pub mod diff;
pub mod frame;
pub mod interpolate;
pub mod query;

use serde::Serialize;

/// Process-wide configuration, loaded once at startup and never mutated.
/// Serialized verbatim into every run row as the frozen config snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub config_version: String,
    pub max_top_posts_per_run: usize,
    pub max_engagers_per_post: usize,
    pub co_engagement_window_hours: u64,
    pub attribution_lookback_days: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: "1.0.0".to_owned(),
            max_top_posts_per_run: 20,
            max_engagers_per_post: 500,
            co_engagement_window_hours: 72,
            attribution_lookback_days: 7,
        }
    }
}
