use serde::{Deserialize, Serialize};

use coopgrid_common::{Error, Result};

/// How available energy is split between active members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityAllocation {
    /// In proportion to ownership
    ContributionBased,
    /// Up to 110% of usage, capped at an equal share
    NeedBased,
    EqualShare,
}

/// What happens to energy nobody consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurplusHandling {
    SellExternal,
    StoreBattery,
    MemberCredit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingHours {
    pub start: u8,
    pub end: u8,
}

/// A cluster's energy trading policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingRules {
    /// Member tariff, ZMW per kWh
    pub internal_rate: f64,
    /// Open-market tariff, ZMW per kWh
    pub external_rate: f64,
    pub trading_hours: TradingHours,
    pub priority_allocation: PriorityAllocation,
    pub surplus_handling: SurplusHandling,
    /// kWh held back from every distribution
    pub minimum_reserve: f64,
}

impl TradingRules {
    pub fn validate(&self) -> Result<()> {
        if !(self.internal_rate.is_finite() && self.internal_rate >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "internal rate must be non-negative, got {}",
                self.internal_rate
            )));
        }
        if !(self.external_rate.is_finite() && self.external_rate >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "external rate must be non-negative, got {}",
                self.external_rate
            )));
        }
        if !(self.minimum_reserve.is_finite() && self.minimum_reserve >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "minimum reserve must be non-negative, got {}",
                self.minimum_reserve
            )));
        }
        if self.trading_hours.start > 23 || self.trading_hours.end > 24 {
            return Err(Error::invalid_argument("trading hours must lie within a day"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_serialize_with_policy_names() {
        let rules = TradingRules {
            internal_rate: 0.8,
            external_rate: 1.2,
            trading_hours: TradingHours { start: 6, end: 22 },
            priority_allocation: PriorityAllocation::NeedBased,
            surplus_handling: SurplusHandling::StoreBattery,
            minimum_reserve: 5.0,
        };
        assert!(rules.validate().is_ok());

        let json = serde_json::to_value(&rules).unwrap();
        assert_eq!(json["priorityAllocation"], "need_based");
        assert_eq!(json["surplusHandling"], "store_battery");
        assert_eq!(json["minimumReserve"], 5.0);
    }
}
