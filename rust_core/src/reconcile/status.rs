//! Match status transitions.

use super::merge::Merge;
use crate::models::MatchStatus;
use std::str::FromStr;

/// How a status that moves backwards in the lifecycle is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Keep the stored status and log the rejected transition
    #[default]
    RejectRegressions,
    /// The latest crawl always wins
    LastWriteWins,
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject_regressions" => Ok(StatusPolicy::RejectRegressions),
            "last_write_wins" => Ok(StatusPolicy::LastWriteWins),
            other => Err(format!("unknown status policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDecision {
    Create(MatchStatus),
    Overwrite(MatchStatus),
    Unchanged,
    /// Incoming status is behind the stored one
    Rejected(MatchStatus),
}

/// Decide what to store for `incoming` given the current snapshot. The
/// payload merges field by field so that a status-only sighting keeps the
/// known scores.
pub fn decide(current: Option<&MatchStatus>, incoming: &MatchStatus, policy: StatusPolicy) -> StatusDecision {
    let Some(current) = current else {
        return StatusDecision::Create(incoming.clone());
    };
    if incoming.name.rank() < current.name.rank() && policy == StatusPolicy::RejectRegressions {
        return StatusDecision::Rejected(incoming.clone());
    }
    let next = MatchStatus {
        name: incoming.name,
        status: current.status.merged_with(&incoming.status),
    };
    if &next == current {
        StatusDecision::Unchanged
    } else {
        StatusDecision::Overwrite(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchStatusKind, StatusPayload};

    fn status(name: MatchStatusKind, scores: (Option<u32>, Option<u32>)) -> MatchStatus {
        MatchStatus {
            name,
            status: StatusPayload {
                team1_score: scores.0,
                team2_score: scores.1,
                match_format: None,
            },
        }
    }

    #[test]
    fn test_first_sighting_creates() {
        let incoming = status(MatchStatusKind::Scheduled, (None, None));
        assert_eq!(
            decide(None, &incoming, StatusPolicy::default()),
            StatusDecision::Create(incoming)
        );
    }

    #[test]
    fn test_forward_transitions_overwrite() {
        let scheduled = status(MatchStatusKind::Scheduled, (None, None));
        let live = status(MatchStatusKind::Live, (Some(1), Some(0)));
        let finished = status(MatchStatusKind::Finished, (Some(2), Some(1)));
        assert_eq!(
            decide(Some(&scheduled), &live, StatusPolicy::default()),
            StatusDecision::Overwrite(live.clone())
        );
        assert_eq!(
            decide(Some(&live), &finished, StatusPolicy::default()),
            StatusDecision::Overwrite(finished)
        );
    }

    #[test]
    fn test_same_payload_is_noop() {
        let live = status(MatchStatusKind::Live, (Some(1), Some(0)));
        assert_eq!(decide(Some(&live), &live, StatusPolicy::default()), StatusDecision::Unchanged);
        // status-only sighting keeps the scores
        let bare = status(MatchStatusKind::Live, (None, None));
        assert_eq!(decide(Some(&live), &bare, StatusPolicy::default()), StatusDecision::Unchanged);
    }

    #[test]
    fn test_regression_policy() {
        let finished = status(MatchStatusKind::Finished, (Some(2), Some(0)));
        let scheduled = status(MatchStatusKind::Scheduled, (None, None));
        assert_eq!(
            decide(Some(&finished), &scheduled, StatusPolicy::RejectRegressions),
            StatusDecision::Rejected(scheduled.clone())
        );
        assert_eq!(
            decide(Some(&finished), &scheduled, StatusPolicy::LastWriteWins),
            StatusDecision::Overwrite(status(MatchStatusKind::Scheduled, (Some(2), Some(0))))
        );
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("last_write_wins".parse(), Ok(StatusPolicy::LastWriteWins));
        assert_eq!(" Reject_Regressions ".parse(), Ok(StatusPolicy::RejectRegressions));
        assert!("newest".parse::<StatusPolicy>().is_err());
    }
}
