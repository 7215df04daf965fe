//! Splitting a period's generation between members
//!
//! The reserve is taken off the top, the rest is allocated to active members
//! under the cluster's allocation policy, and whatever was generated but not
//! consumed becomes surplus. Every kWh generated ends up consumed, held in
//! reserve or in the surplus; the function checks this before returning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use coopgrid_common::utils::{approx_eq, generate_prefixed_id, FLOAT_TOLERANCE};
use coopgrid_common::{Error, Result};
use coopgrid_storage::{Collection, Record};

use crate::trading::{PriorityAllocation, SurplusHandling, TradingRules};

/// What the distribution needs to know about a member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEnergyProfile {
    pub member_id: String,
    pub share_percentage: f64,
    /// kWh the member needs over the period
    pub energy_usage: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAllocation {
    pub member_id: String,
    pub allocated_energy: f64,
    pub consumed_energy: f64,
    /// Allocated but unconsumed energy, plus any surplus credit
    pub credit_balance: f64,
    /// Consumed energy at the internal rate, ZMW
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Surplus offered to the open market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTrade {
    pub id: String,
    pub energy_amount: f64,
    pub rate: f64,
    pub total_value: f64,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyDistribution {
    pub id: String,
    pub cluster_id: String,
    pub distribution_date: DateTime<Utc>,
    pub total_generated: f64,
    pub total_consumed: f64,
    /// Portion of the minimum reserve actually held this period
    pub reserve_held: f64,
    /// Generated minus consumed minus reserve; may be zero or negative
    pub surplus: f64,
    /// Member demand that went unmet
    pub deficit: f64,
    pub member_allocations: Vec<MemberAllocation>,
    pub external_trades: Vec<ExternalTrade>,
    pub battery_storage: f64,
}

impl EnergyDistribution {
    pub fn allocation_for(&self, member_id: &str) -> Option<&MemberAllocation> {
        self.member_allocations
            .iter()
            .find(|a| a.member_id == member_id)
    }
}

impl Record for EnergyDistribution {
    const COLLECTION: Collection = Collection::Distributions;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Allocate `total_generated` kWh across `members` under `rules`.
///
/// The reserve held is `min(minimum_reserve, total_generated)`. If
/// contribution-based allocations overshoot the available energy through
/// share rounding, they are scaled back to fit.
pub fn distribute_energy(
    cluster_id: &str,
    members: &[MemberEnergyProfile],
    rules: &TradingRules,
    total_generated: f64,
    now: DateTime<Utc>,
) -> Result<EnergyDistribution> {
    if !(total_generated.is_finite() && total_generated >= 0.0) {
        return Err(Error::invalid_argument(format!(
            "total generated must be a non-negative number, got {}",
            total_generated
        )));
    }
    rules.validate()?;

    let reserve_held = rules.minimum_reserve.min(total_generated);
    let available = total_generated - reserve_held;

    let active: Vec<&MemberEnergyProfile> = members.iter().filter(|m| m.is_active).collect();
    let member_count = active.len() as f64;

    let mut allocations: Vec<f64> = active
        .iter()
        .map(|m| match rules.priority_allocation {
            PriorityAllocation::ContributionBased => available * m.share_percentage.max(0.0) / 100.0,
            PriorityAllocation::NeedBased => {
                (m.energy_usage * 1.1).min(available / member_count)
            }
            PriorityAllocation::EqualShare => available / member_count,
        })
        .collect();

    let allocated: f64 = allocations.iter().sum();
    if allocated > available && allocated > 0.0 {
        let scale = available / allocated;
        debug!("Scaling allocations by {:.6} to fit {:.3} kWh", scale, available);
        for allocation in &mut allocations {
            *allocation *= scale;
        }
    }

    let mut member_allocations: Vec<MemberAllocation> = active
        .iter()
        .zip(allocations)
        .map(|(member, allocation)| {
            let consumed = allocation.min(member.energy_usage.max(0.0));
            MemberAllocation {
                member_id: member.member_id.clone(),
                allocated_energy: allocation,
                consumed_energy: consumed,
                credit_balance: allocation - consumed,
                cost: consumed * rules.internal_rate,
            }
        })
        .collect();

    let total_consumed: f64 = member_allocations.iter().map(|a| a.consumed_energy).sum();
    let total_demand: f64 = active.iter().map(|m| m.energy_usage.max(0.0)).sum();
    let surplus = total_generated - total_consumed - reserve_held;
    let deficit = (total_demand - total_consumed).max(0.0);

    let mut external_trades = Vec::new();
    let mut battery_storage = 0.0;

    if surplus > FLOAT_TOLERANCE {
        match rules.surplus_handling {
            SurplusHandling::SellExternal => {
                external_trades.push(ExternalTrade {
                    id: generate_prefixed_id("trade"),
                    energy_amount: surplus,
                    rate: rules.external_rate,
                    total_value: surplus * rules.external_rate,
                    status: TradeStatus::Pending,
                    created_at: now,
                });
            }
            SurplusHandling::StoreBattery => {
                battery_storage = surplus;
            }
            SurplusHandling::MemberCredit => {
                if member_allocations.is_empty() {
                    warn!(
                        "Cluster {} has no active members to credit {:.3} kWh surplus",
                        cluster_id, surplus
                    );
                } else {
                    let credit = surplus / member_count;
                    for allocation in &mut member_allocations {
                        allocation.credit_balance += credit;
                    }
                }
            }
        }
    }

    let accounted = total_consumed + reserve_held + surplus.max(0.0);
    if !approx_eq(accounted, total_generated, FLOAT_TOLERANCE) {
        return Err(Error::invariant(format!(
            "cluster {} accounted for {:.6} kWh of {:.6} generated",
            cluster_id, accounted, total_generated
        )));
    }

    debug!(
        "Cluster {} distribution: generated {:.3}, consumed {:.3}, reserve {:.3}, surplus {:.3}, deficit {:.3}",
        cluster_id, total_generated, total_consumed, reserve_held, surplus, deficit
    );

    Ok(EnergyDistribution {
        id: generate_prefixed_id("distribution"),
        cluster_id: cluster_id.to_string(),
        distribution_date: now,
        total_generated,
        total_consumed,
        reserve_held,
        surplus,
        deficit,
        member_allocations,
        external_trades,
        battery_storage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::TradingHours;
    use proptest::prelude::*;

    fn rules(priority: PriorityAllocation, surplus: SurplusHandling, reserve: f64) -> TradingRules {
        TradingRules {
            internal_rate: 0.8,
            external_rate: 1.2,
            trading_hours: TradingHours { start: 6, end: 22 },
            priority_allocation: priority,
            surplus_handling: surplus,
            minimum_reserve: reserve,
        }
    }

    fn member(id: &str, share: f64, usage: f64) -> MemberEnergyProfile {
        MemberEnergyProfile {
            member_id: id.to_string(),
            share_percentage: share,
            energy_usage: usage,
            is_active: true,
        }
    }

    #[test]
    fn test_contribution_based_with_external_sale() {
        let members = vec![member("alice", 75.0, 50.0), member("bob", 25.0, 40.0)];
        let rules = rules(PriorityAllocation::ContributionBased, SurplusHandling::SellExternal, 20.0);

        let d = distribute_energy("c1", &members, &rules, 120.0, Utc::now()).unwrap();

        let alice = d.allocation_for("alice").unwrap();
        assert!((alice.allocated_energy - 75.0).abs() < 1e-9);
        assert!((alice.consumed_energy - 50.0).abs() < 1e-9);
        assert!((alice.credit_balance - 25.0).abs() < 1e-9);
        assert!((alice.cost - 40.0).abs() < 1e-9);

        let bob = d.allocation_for("bob").unwrap();
        assert!((bob.consumed_energy - 25.0).abs() < 1e-9);

        assert!((d.total_consumed - 75.0).abs() < 1e-9);
        assert!((d.surplus - 25.0).abs() < 1e-9);
        assert!((d.deficit - 15.0).abs() < 1e-9);
        assert_eq!(d.external_trades.len(), 1);
        assert!((d.external_trades[0].total_value - 30.0).abs() < 1e-9);
        assert_eq!(d.external_trades[0].status, TradeStatus::Pending);
        assert_eq!(d.battery_storage, 0.0);
    }

    #[test]
    fn test_need_based_caps_at_equal_share() {
        let members = vec![member("a", 50.0, 10.0), member("b", 50.0, 100.0)];
        let rules = rules(PriorityAllocation::NeedBased, SurplusHandling::StoreBattery, 0.0);

        let d = distribute_energy("c1", &members, &rules, 100.0, Utc::now()).unwrap();

        assert!((d.allocation_for("a").unwrap().allocated_energy - 11.0).abs() < 1e-9);
        assert!((d.allocation_for("b").unwrap().allocated_energy - 50.0).abs() < 1e-9);
        assert!((d.surplus - 40.0).abs() < 1e-9);
        assert!((d.battery_storage - 40.0).abs() < 1e-9);
        assert!(d.external_trades.is_empty());
    }

    #[test]
    fn test_equal_share_with_member_credit_skips_inactive() {
        let mut idle = member("c", 10.0, 30.0);
        idle.is_active = false;
        let members = vec![member("a", 60.0, 10.0), member("b", 30.0, 10.0), idle];
        let rules = rules(PriorityAllocation::EqualShare, SurplusHandling::MemberCredit, 0.0);

        let d = distribute_energy("c1", &members, &rules, 60.0, Utc::now()).unwrap();

        assert_eq!(d.member_allocations.len(), 2);
        assert!((d.surplus - 40.0).abs() < 1e-9);
        let a = d.allocation_for("a").unwrap();
        assert!((a.allocated_energy - 30.0).abs() < 1e-9);
        assert!((a.credit_balance - (20.0 + 20.0)).abs() < 1e-9);
        assert!(d.allocation_for("c").is_none());
    }

    #[test]
    fn test_zero_generation_is_all_zero() {
        let members = vec![member("a", 60.0, 10.0), member("b", 40.0, 5.0)];
        for priority in [
            PriorityAllocation::ContributionBased,
            PriorityAllocation::NeedBased,
            PriorityAllocation::EqualShare,
        ] {
            let rules = rules(priority, SurplusHandling::SellExternal, 10.0);
            let d = distribute_energy("c1", &members, &rules, 0.0, Utc::now()).unwrap();

            assert!(d
                .member_allocations
                .iter()
                .all(|a| a.allocated_energy == 0.0 && a.consumed_energy == 0.0 && a.cost == 0.0));
            assert_eq!(d.surplus, 0.0);
            assert_eq!(d.reserve_held, 0.0);
            assert!(d.external_trades.is_empty());
            assert_eq!(d.battery_storage, 0.0);
        }
    }

    #[test]
    fn test_no_active_members() {
        let rules = rules(PriorityAllocation::EqualShare, SurplusHandling::MemberCredit, 5.0);
        let d = distribute_energy("c1", &[], &rules, 50.0, Utc::now()).unwrap();
        assert!(d.member_allocations.is_empty());
        assert!((d.surplus - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_generation_rejected() {
        let rules = rules(PriorityAllocation::EqualShare, SurplusHandling::SellExternal, 0.0);
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let err = distribute_energy("c1", &[], &rules, bad, Utc::now()).unwrap_err();
            assert!(err.is_invalid_argument());
        }
    }

    #[test]
    fn test_rounded_shares_never_overshoot() {
        let members = vec![
            member("a", 33.34, 1000.0),
            member("b", 33.34, 1000.0),
            member("c", 33.34, 1000.0),
        ];
        let rules = rules(PriorityAllocation::ContributionBased, SurplusHandling::SellExternal, 0.0);
        let d = distribute_energy("c1", &members, &rules, 300.0, Utc::now()).unwrap();

        assert!(d.total_consumed <= 300.0 + 1e-9);
        assert!(d.surplus >= -1e-9);
    }

    fn policy() -> impl Strategy<Value = PriorityAllocation> {
        prop_oneof![
            Just(PriorityAllocation::ContributionBased),
            Just(PriorityAllocation::NeedBased),
            Just(PriorityAllocation::EqualShare),
        ]
    }

    fn handling() -> impl Strategy<Value = SurplusHandling> {
        prop_oneof![
            Just(SurplusHandling::SellExternal),
            Just(SurplusHandling::StoreBattery),
            Just(SurplusHandling::MemberCredit),
        ]
    }

    proptest! {
        #[test]
        fn energy_is_conserved(
            weights in prop::collection::vec((1.0f64..100.0, 0.0f64..500.0, any::<bool>()), 0..12),
            generated in 0.0f64..10_000.0,
            reserve in 0.0f64..200.0,
            priority in policy(),
            surplus_handling in handling(),
        ) {
            let total_weight: f64 = weights.iter().map(|(w, _, _)| w).sum();
            let members: Vec<MemberEnergyProfile> = weights
                .iter()
                .enumerate()
                .map(|(i, (w, usage, active))| MemberEnergyProfile {
                    member_id: format!("m{}", i),
                    share_percentage: w / total_weight * 100.0,
                    energy_usage: *usage,
                    is_active: *active,
                })
                .collect();
            let rules = rules(priority, surplus_handling, reserve);

            let d = distribute_energy("c1", &members, &rules, generated, Utc::now()).unwrap();

            let accounted = d.total_consumed + d.reserve_held + d.surplus.max(0.0);
            prop_assert!((accounted - generated).abs() <= 1e-6 * generated.max(1.0));
            for a in &d.member_allocations {
                prop_assert!(a.consumed_energy <= a.allocated_energy + 1e-9);
                prop_assert!(a.credit_balance >= -1e-9);
            }
        }
    }
}
