use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use coopgrid_common::utils::generate_prefixed_id;
use coopgrid_common::{Error, Result};
use coopgrid_storage::{Collection, Record};

use crate::rules::{GovernanceRules, ProposalType};
use crate::voting::{resolution, tally_votes, VotingResult};

/// Lifecycle of a proposal. `Passed` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Open,
    Passed,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Open)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Open => "open",
            ProposalStatus::Passed => "passed",
            ProposalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
}

/// A member's vote, weighted by their voting power when cast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub member_id: String,
    pub vote: VoteChoice,
    pub voting_power: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A governance proposal and, once resolved, the decision it became
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub cluster_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub proposed_by: String,
    pub proposed_at: DateTime<Utc>,
    pub voting_deadline: DateTime<Utc>,
    pub votes: Vec<Vote>,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Tally at the moment of resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<VotingResult>,
    /// When a passed decision's effects were applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implemented_at: Option<DateTime<Utc>>,
    /// Type-specific attributes, e.g. `purchase_request_id`
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Proposal {
    /// Open a proposal, with its deadline taken from the type's discussion
    /// period. Fails if the cluster does not accept `proposal_type`.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        cluster_id: impl Into<String>,
        proposal_type: ProposalType,
        title: impl Into<String>,
        description: impl Into<String>,
        proposed_by: impl Into<String>,
        metadata: BTreeMap<String, String>,
        rules: &GovernanceRules,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(Error::invalid_argument("proposal title must not be empty"));
        }
        let period = rules.discussion_period(proposal_type)?;

        Ok(Self {
            id: generate_prefixed_id("proposal"),
            cluster_id: cluster_id.into(),
            title,
            description: description.into(),
            proposal_type,
            proposed_by: proposed_by.into(),
            proposed_at: now,
            voting_deadline: now + period,
            votes: Vec::new(),
            status: ProposalStatus::Open,
            resolved_at: None,
            result: None,
            implemented_at: None,
            metadata,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == ProposalStatus::Open
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.voting_deadline
    }

    /// Passed and not yet carried out
    pub fn awaits_implementation(&self) -> bool {
        self.status == ProposalStatus::Passed && self.implemented_at.is_none()
    }

    /// Record a vote, replacing any earlier vote by the same member
    pub fn cast_vote(&mut self, vote: Vote) -> Result<()> {
        if !self.is_open() {
            return Err(Error::invalid_argument(format!(
                "proposal {} is {}; voting is closed",
                self.id, self.status
            )));
        }
        if !(vote.voting_power.is_finite() && vote.voting_power >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "voting power must be a non-negative number, got {}",
                vote.voting_power
            )));
        }

        let replaced = self.votes.len();
        self.votes.retain(|v| v.member_id != vote.member_id);
        if self.votes.len() != replaced {
            debug!("Member {} changed their vote on {}", vote.member_id, self.id);
        }
        self.votes.push(vote);
        Ok(())
    }

    pub fn tally(&self, rules: &GovernanceRules) -> VotingResult {
        tally_votes(
            &self.votes,
            rules.quorum_requirement,
            rules.required_approval(self.proposal_type),
        )
    }

    /// Resolve the proposal if its tally settles it at `now`. Returns the
    /// new status when a transition happened.
    pub fn try_resolve(&mut self, rules: &GovernanceRules, now: DateTime<Utc>) -> Option<ProposalStatus> {
        if !self.is_open() {
            return None;
        }

        let result = self.tally(rules);
        let status = resolution(&result, self.voting_deadline, now)?;

        info!(
            "Proposal {} ({}) {} with {:.2}% approval of {:.2} voting power",
            self.id, self.proposal_type, status, result.approval_percentage, result.total_voting_power
        );
        self.status = status;
        self.resolved_at = Some(now);
        self.result = Some(result);
        Some(status)
    }
}

impl Record for Proposal {
    const COLLECTION: Collection = Collection::Decisions;

    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rules() -> GovernanceRules {
        GovernanceRules::standard(60.0, 50.0, "monthly", Utc::now())
    }

    fn vote(member: &str, choice: VoteChoice, power: f64) -> Vote {
        Vote {
            member_id: member.to_string(),
            vote: choice,
            voting_power: power,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    fn proposal(now: DateTime<Utc>) -> Proposal {
        Proposal::open(
            "c1",
            ProposalType::BudgetAllocation,
            "Fence repairs",
            "Replace the fence around the array",
            "alice",
            BTreeMap::new(),
            &rules(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_deadline_follows_discussion_period() {
        let now = Utc::now();
        let p = proposal(now);
        assert_eq!(p.voting_deadline, now + Duration::days(5));
        assert!(p.is_open());
    }

    #[test]
    fn test_unknown_type_refused() {
        let mut rules = rules();
        rules.proposal_types.clear();
        let err = Proposal::open(
            "c1",
            ProposalType::Maintenance,
            "Clean panels",
            "",
            "alice",
            BTreeMap::new(),
            &rules,
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_revote_replaces_previous() {
        let mut p = proposal(Utc::now());
        p.cast_vote(vote("alice", VoteChoice::No, 60.0)).unwrap();
        p.cast_vote(vote("bob", VoteChoice::No, 40.0)).unwrap();
        p.cast_vote(vote("alice", VoteChoice::Yes, 60.0)).unwrap();

        assert_eq!(p.votes.len(), 2);
        assert_eq!(p.votes[1].member_id, "alice");
        assert_eq!(p.tally(&rules()).yes_power, 60.0);
    }

    #[test]
    fn test_passes_early_and_then_closes() {
        let now = Utc::now();
        let mut p = proposal(now);
        p.cast_vote(vote("alice", VoteChoice::Yes, 75.0)).unwrap();

        assert_eq!(p.try_resolve(&rules(), now), Some(ProposalStatus::Passed));
        assert_eq!(p.resolved_at, Some(now));
        assert!(p.result.as_ref().unwrap().approval_met);

        let err = p.cast_vote(vote("bob", VoteChoice::No, 25.0)).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(p.try_resolve(&rules(), now), None);
        assert_eq!(p.status, ProposalStatus::Passed);
    }

    #[test]
    fn test_split_vote_rejected_after_deadline() {
        let now = Utc::now();
        let mut p = proposal(now);
        p.cast_vote(vote("alice", VoteChoice::Yes, 50.0)).unwrap();
        p.cast_vote(vote("bob", VoteChoice::No, 50.0)).unwrap();

        assert_eq!(p.try_resolve(&rules(), now + Duration::days(1)), None);
        assert_eq!(
            p.try_resolve(&rules(), now + Duration::days(6)),
            Some(ProposalStatus::Rejected)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let p = proposal(Utc::now());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "budget_allocation");
        assert_eq!(json["status"], "open");
        assert!(json.get("votingDeadline").is_some());
        assert!(json.get("resolvedAt").is_none());
    }
}
