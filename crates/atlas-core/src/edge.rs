use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Every way an edge can enter a frame.
///
/// `Tier` carries the tier of the *source* endpoint and whether the routing
/// search had to skip past an empty tier (which scales the weight).
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    DirectInteraction,
    CoEngagement,
    EgoFollow,
    NetworkGrowth,
    Cohort,
    Tier { tier: u8, skipped: bool },
    FallbackEgo,
    Mutual,
    YouFollow,
    FollowersYou,
}

impl EdgeKind {
    /// Wire label, stable for renderers.
    pub fn label(self) -> String {
        match self {
            Self::DirectInteraction => "direct_interaction".to_owned(),
            Self::CoEngagement => "co_engagement".to_owned(),
            Self::EgoFollow => "ego_follow".to_owned(),
            Self::NetworkGrowth => "network_growth".to_owned(),
            Self::Cohort => "cohort".to_owned(),
            Self::Tier { tier, skipped } => {
                if skipped {
                    format!("tier_{tier}_skip")
                } else {
                    format!("tier_{tier}_link")
                }
            }
            Self::FallbackEgo => "fallback_ego".to_owned(),
            Self::Mutual => "mutual".to_owned(),
            Self::YouFollow => "you_follow".to_owned(),
            Self::FollowersYou => "followers_you".to_owned(),
        }
    }

    /// Rank among the structural (routing/growth) strategies, used to break
    /// exact weight ties when several strategies produce the same
    /// `(src, dst)` pair. `None` for evidence edges, which are never deduped
    /// against structural ones.
    pub fn structural_rank(self) -> Option<u8> {
        match self {
            Self::Mutual => Some(7),
            Self::Tier { .. } => Some(6),
            Self::YouFollow | Self::FollowersYou => Some(5),
            Self::NetworkGrowth => Some(4),
            Self::Cohort => Some(3),
            Self::EgoFollow => Some(2),
            Self::FallbackEgo => Some(1),
            Self::DirectInteraction | Self::CoEngagement => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_labels() {
        assert_eq!(
            EdgeKind::Tier {
                tier: 3,
                skipped: false
            }
            .label(),
            "tier_3_link"
        );
        assert_eq!(
            EdgeKind::Tier {
                tier: 5,
                skipped: true
            }
            .label(),
            "tier_5_skip"
        );
    }

    #[test]
    fn precedence_ordering() {
        let ranked = [
            EdgeKind::Mutual,
            EdgeKind::Tier {
                tier: 1,
                skipped: false,
            },
            EdgeKind::YouFollow,
            EdgeKind::NetworkGrowth,
            EdgeKind::Cohort,
            EdgeKind::EgoFollow,
            EdgeKind::FallbackEgo,
        ];
        for pair in ranked.windows(2) {
            assert!(pair[0].structural_rank() > pair[1].structural_rank());
        }
        assert_eq!(EdgeKind::DirectInteraction.structural_rank(), None);
    }
}
