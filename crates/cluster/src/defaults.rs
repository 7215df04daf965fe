//! Rules given to clusters created without their own

use chrono::{DateTime, Duration, Utc};

use coopgrid_common::config::{GovernanceDefaults, TradingDefaults};
use coopgrid_energy::{PriorityAllocation, SurplusHandling, TradingHours, TradingRules};
use coopgrid_governance::GovernanceRules;

pub fn default_governance_rules(defaults: &GovernanceDefaults, now: DateTime<Utc>) -> GovernanceRules {
    GovernanceRules::standard(
        defaults.voting_threshold,
        defaults.quorum_requirement,
        defaults.meeting_schedule.clone(),
        now + Duration::days(defaults.meeting_interval_days),
    )
}

pub fn default_trading_rules(defaults: &TradingDefaults) -> TradingRules {
    TradingRules {
        internal_rate: defaults.internal_rate,
        external_rate: defaults.external_rate,
        trading_hours: TradingHours {
            start: defaults.trading_start_hour,
            end: defaults.trading_end_hour,
        },
        priority_allocation: PriorityAllocation::ContributionBased,
        surplus_handling: SurplusHandling::SellExternal,
        minimum_reserve: defaults.minimum_reserve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coopgrid_governance::ProposalType;

    #[test]
    fn test_defaults_from_config() {
        let now = Utc::now();
        let rules = default_governance_rules(&GovernanceDefaults::default(), now);
        assert_eq!(rules.voting_threshold, 60.0);
        assert_eq!(rules.quorum_requirement, 50.0);
        assert_eq!(rules.next_meeting, now + Duration::days(30));
        assert_eq!(rules.required_approval(ProposalType::Dissolution), 75.0);

        let trading = default_trading_rules(&TradingDefaults::default());
        assert_eq!(trading.trading_hours, TradingHours { start: 6, end: 22 });
        assert_eq!(trading.priority_allocation, PriorityAllocation::ContributionBased);
        assert!(trading.validate().is_ok());
    }
}
