//! Periodic financial return per member

use serde::{Deserialize, Serialize};

use crate::assets::SharedAsset;

/// Market parameters the returns are measured against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnsParameters {
    /// Grid tariff a member would pay outside the cluster, ZMW per kWh
    pub market_rate: f64,
    /// Member tariff inside the cluster, ZMW per kWh
    pub internal_rate: f64,
    /// Yearly appreciation of asset value, 0.05 = 5%
    pub annual_appreciation_rate: f64,
    /// Profit shared out by ownership
    pub base_profit_pool: f64,
}

/// A member's position going into the calculation
#[derive(Debug, Clone, PartialEq)]
pub struct MemberStake {
    pub member_id: String,
    pub share_percentage: f64,
    /// Capital the member has contributed, ZMW
    pub contribution_amount: f64,
    /// kWh credited to the member for the period
    pub energy_received: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberReturn {
    pub member_id: String,
    pub energy_received: f64,
    pub cost_savings: f64,
    pub asset_appreciation: f64,
    pub profit_sharing: f64,
    pub total_return: f64,
    /// Total return relative to contributed capital; zero without capital
    pub return_percentage: f64,
}

/// Derive each member's return. Asset appreciation uses the ownership
/// snapshot recorded on each asset, not the member's current share.
pub fn calculate_returns(
    stakes: &[MemberStake],
    assets: &[SharedAsset],
    params: &ReturnsParameters,
) -> Vec<MemberReturn> {
    stakes
        .iter()
        .map(|stake| {
            let cost_savings = stake.energy_received * (params.market_rate - params.internal_rate);

            let owned_value: f64 = assets
                .iter()
                .map(|asset| asset.ownership_of(&stake.member_id) / 100.0 * asset.cost)
                .sum();
            let asset_appreciation = owned_value * params.annual_appreciation_rate;

            let profit_sharing = params.base_profit_pool * stake.share_percentage / 100.0;
            let total_return = cost_savings + asset_appreciation + profit_sharing;

            let return_percentage = if stake.contribution_amount > 0.0 {
                total_return / stake.contribution_amount * 100.0
            } else {
                0.0
            };

            MemberReturn {
                member_id: stake.member_id.clone(),
                energy_received: stake.energy_received,
                cost_savings,
                asset_appreciation,
                profit_sharing,
                total_return,
                return_percentage,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetCondition, AssetOwnership, MaintenanceSchedule};
    use chrono::{Duration, Utc};

    fn asset(cost: f64, owners: &[(&str, f64)]) -> SharedAsset {
        let now = Utc::now();
        SharedAsset {
            id: "asset-1".into(),
            asset_type: "battery".into(),
            brand: "Volt".into(),
            model: "V10".into(),
            cost,
            capacity: 10.0,
            ownership: owners
                .iter()
                .map(|(member, pct)| AssetOwnership {
                    member_id: member.to_string(),
                    share_percentage: *pct,
                    contribution_amount: cost * pct / 100.0,
                })
                .collect(),
            installation_date: now,
            warranty_expiry: now + Duration::days(3650),
            current_condition: AssetCondition::Good,
            maintenance_schedule: MaintenanceSchedule {
                interval_days: 180,
                next_due: now + Duration::days(180),
            },
            performance_history: Vec::new(),
        }
    }

    fn params() -> ReturnsParameters {
        ReturnsParameters {
            market_rate: 1.5,
            internal_rate: 0.8,
            annual_appreciation_rate: 0.05,
            base_profit_pool: 1000.0,
        }
    }

    #[test]
    fn test_return_components() {
        let stakes = vec![MemberStake {
            member_id: "alice".into(),
            share_percentage: 75.0,
            contribution_amount: 3000.0,
            energy_received: 100.0,
        }];
        let assets = vec![asset(2000.0, &[("alice", 75.0), ("bob", 25.0)])];

        let returns = calculate_returns(&stakes, &assets, &params());
        let alice = &returns[0];

        assert!((alice.cost_savings - 70.0).abs() < 1e-9);
        assert!((alice.asset_appreciation - 75.0).abs() < 1e-9);
        assert!((alice.profit_sharing - 750.0).abs() < 1e-9);
        assert!((alice.total_return - 895.0).abs() < 1e-9);
        assert!((alice.return_percentage - 895.0 / 3000.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_member_without_capital_or_assets() {
        let stakes = vec![MemberStake {
            member_id: "carol".into(),
            share_percentage: 0.0,
            contribution_amount: 0.0,
            energy_received: 10.0,
        }];
        let assets = vec![asset(2000.0, &[("alice", 100.0)])];

        let returns = calculate_returns(&stakes, &assets, &params());
        assert_eq!(returns[0].asset_appreciation, 0.0);
        assert_eq!(returns[0].return_percentage, 0.0);
        assert!((returns[0].total_return - 7.0).abs() < 1e-9);
    }
}
