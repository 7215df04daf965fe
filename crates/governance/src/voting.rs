//! Capital-weighted vote tallying
//!
//! Each vote carries the voter's voting power at the time it was cast, which
//! tracks their ownership percentage. Quorum is measured in the same units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proposal::{ProposalStatus, Vote, VoteChoice};

/// Result of a vote tally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingResult {
    pub yes_votes: usize,
    pub no_votes: usize,
    /// Sum of voting power across all votes cast
    pub total_voting_power: f64,
    pub yes_power: f64,
    /// Yes power as a percentage of participating power
    pub approval_percentage: f64,
    pub quorum_met: bool,
    pub approval_met: bool,
}

/// Tally `votes` against a quorum and an approval threshold, both in
/// percentage points. Votes are expected to be one per member.
pub fn tally_votes(votes: &[Vote], quorum_requirement: f64, required_approval: f64) -> VotingResult {
    let yes_votes = votes.iter().filter(|v| v.vote == VoteChoice::Yes).count();
    let no_votes = votes.len() - yes_votes;

    let total_voting_power: f64 = votes.iter().map(|v| v.voting_power).sum();
    let yes_power: f64 = votes
        .iter()
        .filter(|v| v.vote == VoteChoice::Yes)
        .map(|v| v.voting_power)
        .sum();

    let approval_percentage = if total_voting_power > 0.0 {
        yes_power / total_voting_power * 100.0
    } else {
        0.0
    };

    VotingResult {
        yes_votes,
        no_votes,
        total_voting_power,
        yes_power,
        approval_percentage,
        quorum_met: total_voting_power >= quorum_requirement,
        approval_met: total_voting_power > 0.0 && approval_percentage >= required_approval,
    }
}

/// Decide whether a tally settles the proposal.
///
/// Without quorum nothing resolves. With quorum, meeting the threshold
/// passes immediately; otherwise the proposal is rejected once `now` is past
/// the deadline and stays open before it.
pub fn resolution(
    result: &VotingResult,
    voting_deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<ProposalStatus> {
    if !result.quorum_met {
        return None;
    }
    if result.approval_met {
        Some(ProposalStatus::Passed)
    } else if now > voting_deadline {
        Some(ProposalStatus::Rejected)
    } else {
        None
    }
}
