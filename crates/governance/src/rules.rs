use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coopgrid_common::{Error, Result};

/// Kinds of decision a cluster can vote on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    /// Buy shared equipment from pooled funds
    EquipmentPurchase,
    /// Admit a new member
    NewMember,
    /// Allocate part of the budget
    BudgetAllocation,
    Maintenance,
    /// Change governance or trading rules
    RuleChange,
    /// Wind the cluster up
    Dissolution,
}

impl ProposalType {
    pub const ALL: [ProposalType; 6] = [
        ProposalType::EquipmentPurchase,
        ProposalType::NewMember,
        ProposalType::BudgetAllocation,
        ProposalType::Maintenance,
        ProposalType::RuleChange,
        ProposalType::Dissolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalType::EquipmentPurchase => "equipment_purchase",
            ProposalType::NewMember => "new_member",
            ProposalType::BudgetAllocation => "budget_allocation",
            ProposalType::Maintenance => "maintenance",
            ProposalType::RuleChange => "rule_change",
            ProposalType::Dissolution => "dissolution",
        }
    }
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProposalType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown proposal type: {}", s)))
    }
}

/// Approval threshold and voting window for one proposal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalTypeRule {
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    /// Percentage of participating voting power that must vote yes
    pub required_approval: f64,
    /// Length of the voting window in days
    pub discussion_period: u32,
}

impl ProposalTypeRule {
    pub fn new(proposal_type: ProposalType, required_approval: f64, discussion_period: u32) -> Self {
        Self {
            proposal_type,
            required_approval,
            discussion_period,
        }
    }
}

/// A cluster's voting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceRules {
    /// Fallback approval percentage
    pub voting_threshold: f64,
    /// Participating voting power needed before anything resolves
    pub quorum_requirement: f64,
    pub proposal_types: Vec<ProposalTypeRule>,
    pub meeting_schedule: String,
    pub next_meeting: DateTime<Utc>,
}

impl GovernanceRules {
    /// Rules with the standard set of proposal types
    pub fn standard(
        voting_threshold: f64,
        quorum_requirement: f64,
        meeting_schedule: impl Into<String>,
        next_meeting: DateTime<Utc>,
    ) -> Self {
        Self {
            voting_threshold,
            quorum_requirement,
            proposal_types: vec![
                ProposalTypeRule::new(ProposalType::EquipmentPurchase, 60.0, 7),
                ProposalTypeRule::new(ProposalType::NewMember, 51.0, 3),
                ProposalTypeRule::new(ProposalType::BudgetAllocation, 60.0, 5),
                ProposalTypeRule::new(ProposalType::Maintenance, 51.0, 3),
                ProposalTypeRule::new(ProposalType::RuleChange, 67.0, 14),
                ProposalTypeRule::new(ProposalType::Dissolution, 75.0, 14),
            ],
            meeting_schedule: meeting_schedule.into(),
            next_meeting,
        }
    }

    pub fn rule_for(&self, proposal_type: ProposalType) -> Option<&ProposalTypeRule> {
        self.proposal_types
            .iter()
            .find(|r| r.proposal_type == proposal_type)
    }

    /// Approval percentage needed for `proposal_type`
    pub fn required_approval(&self, proposal_type: ProposalType) -> f64 {
        self.rule_for(proposal_type)
            .map(|r| r.required_approval)
            .unwrap_or(self.voting_threshold)
    }

    /// Voting window for `proposal_type`; `InvalidArgument` if the cluster
    /// does not accept that type
    pub fn discussion_period(&self, proposal_type: ProposalType) -> Result<Duration> {
        self.rule_for(proposal_type)
            .map(|r| Duration::days(i64::from(r.discussion_period)))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "proposal type {} is not configured for this cluster",
                    proposal_type
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| v > 0.0 && v <= 100.0;

        if !in_range(self.voting_threshold) {
            return Err(Error::invalid_argument(format!(
                "voting threshold must be in (0, 100], got {}",
                self.voting_threshold
            )));
        }
        if !in_range(self.quorum_requirement) {
            return Err(Error::invalid_argument(format!(
                "quorum requirement must be in (0, 100], got {}",
                self.quorum_requirement
            )));
        }
        for (i, rule) in self.proposal_types.iter().enumerate() {
            if !in_range(rule.required_approval) {
                return Err(Error::invalid_argument(format!(
                    "required approval for {} must be in (0, 100]",
                    rule.proposal_type
                )));
            }
            if self.proposal_types[..i]
                .iter()
                .any(|r| r.proposal_type == rule.proposal_type)
            {
                return Err(Error::invalid_argument(format!(
                    "proposal type {} configured twice",
                    rule.proposal_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> GovernanceRules {
        GovernanceRules::standard(60.0, 50.0, "monthly", Utc::now())
    }

    #[test]
    fn test_lookup_by_type() {
        let rules = rules();
        assert_eq!(rules.required_approval(ProposalType::Dissolution), 75.0);
        assert_eq!(
            rules.discussion_period(ProposalType::EquipmentPurchase).unwrap(),
            Duration::days(7)
        );
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_unconfigured_type_rejected() {
        let mut rules = rules();
        rules
            .proposal_types
            .retain(|r| r.proposal_type != ProposalType::Maintenance);

        assert!(rules
            .discussion_period(ProposalType::Maintenance)
            .unwrap_err()
            .is_invalid_argument());
        assert_eq!(rules.required_approval(ProposalType::Maintenance), 60.0);
    }

    #[test]
    fn test_validate_catches_duplicates_and_ranges() {
        let mut rules = rules();
        rules
            .proposal_types
            .push(ProposalTypeRule::new(ProposalType::NewMember, 80.0, 1));
        assert!(rules.validate().is_err());

        let mut rules = self::rules();
        rules.quorum_requirement = 0.0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_type_strings() {
        assert_eq!(
            "equipment_purchase".parse::<ProposalType>().unwrap(),
            ProposalType::EquipmentPurchase
        );
        assert!("coffee_machine".parse::<ProposalType>().is_err());
        assert_eq!(
            serde_json::to_string(&ProposalType::BudgetAllocation).unwrap(),
            "\"budget_allocation\""
        );
    }
}
