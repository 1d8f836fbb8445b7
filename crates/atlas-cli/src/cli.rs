use atlas_core::{AccountId, IntervalId};
use clap::{Args, Parser, Subcommand};

/// Temporal follower-graph atlas for a single microblogging account.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Process-wide settings, every one overridable from the environment.
#[derive(Debug, Args)]
pub struct Settings {
    /// Path of the database file (`:memory:` for a throwaway store)
    #[arg(long, env = "SOCIAL_GRAPH_DATABASE_URL", default_value = "./social_graph.redb")]
    pub database_url: String,

    /// API key for the primary bulk provider
    #[arg(long, env = "SOCIAL_GRAPH_TWITTER_BEARER_TOKEN", default_value = "")]
    pub twitter_bearer_token: String,

    /// Bearer token for the fallback provider (enables like-lists)
    #[arg(long, env = "SOCIAL_GRAPH_X_BEARER_TOKEN")]
    pub x_bearer_token: Option<String>,

    #[arg(long, env = "SOCIAL_GRAPH_MAX_TOP_POSTS_PER_RUN", default_value = "20")]
    pub max_top_posts_per_run: usize,

    #[arg(long, env = "SOCIAL_GRAPH_MAX_ENGAGERS_PER_POST", default_value = "500")]
    pub max_engagers_per_post: usize,

    #[arg(long, env = "SOCIAL_GRAPH_CO_ENGAGEMENT_WINDOW_HOURS", default_value = "72")]
    pub co_engagement_window_hours: u64,

    #[arg(long, env = "SOCIAL_GRAPH_ATTRIBUTION_LOOKBACK_DAYS", default_value = "7")]
    pub attribution_lookback_days: u64,

    #[arg(long, env = "SOCIAL_GRAPH_CONFIG_VERSION", default_value = "1.0.0")]
    pub config_version: String,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Serve the HTTP API
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8000")]
        listen: String,

        /// Set SO_REUSEPORT on the listening socket
        #[arg(long)]
        reuseport: bool,
    },

    /// Run one collection cycle
    Collect {
        /// Handle of the account to observe
        #[arg(long, short = 'u')]
        username: Option<String>,

        /// External id of the account to observe (must be known already)
        #[arg(long)]
        user_id: Option<AccountId>,

        /// Cap on pages per membership fetch
        #[arg(long)]
        max_pages: Option<usize>,
    },

    /// Show store statistics
    Stats,

    /// List collection runs
    Runs {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// List computed intervals
    Intervals {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Frame operations
    Frame {
        #[command(subcommand)]
        cmd: FrameCmd,
    },

    /// Build or list post attributions
    Attributions {
        /// Timeframe window in days (0 = all)
        #[arg(long, default_value = "30")]
        timeframe: u32,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Drop the cache and recompute
        #[arg(long)]
        rebuild: bool,
    },

    /// Re-resolve every known account profile and upsert the result
    RefreshProfiles,
}

#[derive(Debug, Subcommand)]
pub enum FrameCmd {
    /// Build and persist the frame for an interval
    Build {
        /// Interval to build for; latest when omitted
        #[arg(long)]
        interval_id: Option<IntervalId>,

        /// Timeframe window in days (0 = all)
        #[arg(long, default_value = "30")]
        timeframe_days: u32,

        /// Focal account; inferred from collected posts when omitted
        #[arg(long)]
        ego_id: Option<AccountId>,
    },
}
