//! Founding a cluster, admitting members and keeping shares in step with capital

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use coopgrid_common::utils::generate_prefixed_id;
use coopgrid_common::{Error, Result};
use coopgrid_energy::TradingRules;
use coopgrid_governance::GovernanceRules;
use coopgrid_ledger::{check_ownership_sum, OwnershipShare};

use crate::model::{Cluster, ClusterStatus, Member, MemberRole, NewCluster};

/// Active members needed before a forming cluster becomes active
pub const ACTIVATION_MEMBER_COUNT: usize = 3;

fn check_amount(amount: f64) -> Result<()> {
    if !(amount.is_finite() && amount > 0.0) {
        return Err(Error::invalid_argument(format!(
            "contribution must be a positive amount, got {}",
            amount
        )));
    }
    Ok(())
}

impl Cluster {
    /// A new cluster with the founder as sole coordinator at 100%.
    /// Rules missing from `data` are taken from the supplied defaults.
    pub fn found(
        data: &NewCluster,
        founder_id: &str,
        default_governance: GovernanceRules,
        default_trading: TradingRules,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let funding = data.validate()?;
        if founder_id.trim().is_empty() {
            return Err(Error::invalid_argument("founder id is required"));
        }

        let founder = Member::new(founder_id, MemberRole::Coordinator, funding, 100.0, now);
        Ok(Self {
            id: generate_prefixed_id("cluster"),
            name: data.name.clone(),
            cluster_type: data.cluster_type.clone(),
            location: data.location.clone(),
            members: vec![founder],
            shared_assets: Vec::new(),
            pooled_funds: funding,
            energy_capacity: data.energy_capacity.unwrap_or(0.0),
            current_generation: 0.0,
            governance_rules: data.governance_rules.clone().unwrap_or(default_governance),
            trading_rules: data.trading_rules.clone().unwrap_or(default_trading),
            created_at: now,
            status: ClusterStatus::Forming,
            reputation: 0.0,
            version: 0,
        })
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    /// The member, failing with `NotFound` unless they are active
    pub fn active_member(&self, user_id: &str) -> Result<&Member> {
        self.member(user_id)
            .filter(|m| m.is_active)
            .ok_or_else(|| {
                Error::not_found(format!("{} is not an active member of cluster {}", user_id, self.id))
            })
    }

    pub(crate) fn active_member_mut(&mut self, user_id: &str) -> Result<&mut Member> {
        let cluster_id = self.id.clone();
        self.members
            .iter_mut()
            .find(|m| m.user_id == user_id && m.is_active)
            .ok_or_else(|| {
                Error::not_found(format!("{} is not an active member of cluster {}", user_id, cluster_id))
            })
    }

    pub fn active_member_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_active).count()
    }

    pub fn total_share(&self) -> f64 {
        self.members.iter().map(|m| m.share_percentage).sum()
    }

    pub fn is_dissolved(&self) -> bool {
        self.status == ClusterStatus::Dissolved
    }

    /// Fails with `InvalidArgument` once the cluster is dissolved
    pub fn ensure_accepting_changes(&self) -> Result<()> {
        if self.is_dissolved() {
            return Err(Error::invalid_argument(format!(
                "cluster {} is dissolved",
                self.id
            )));
        }
        Ok(())
    }

    /// Admit `user_id` with `contribution`, diluting everyone else
    pub fn admit_member(&mut self, user_id: &str, contribution: f64, now: DateTime<Utc>) -> Result<()> {
        self.ensure_accepting_changes()?;
        check_amount(contribution)?;
        if user_id.trim().is_empty() {
            return Err(Error::invalid_argument("member id is required"));
        }

        if self.member(user_id).is_some() {
            return Err(Error::conflict(format!(
                "{} is already a member of cluster {}",
                user_id, self.id
            )));
        }
        self.members
            .push(Member::new(user_id, MemberRole::Member, 0.0, 0.0, now));

        self.dilute_in(user_id, contribution);

        if self.status == ClusterStatus::Forming && self.active_member_count() >= ACTIVATION_MEMBER_COUNT {
            info!("Cluster {} is now active with {} members", self.id, self.active_member_count());
            self.status = ClusterStatus::Active;
        }
        Ok(())
    }

    /// Further capital from an existing active member
    pub fn add_capital(&mut self, user_id: &str, amount: f64) -> Result<()> {
        self.ensure_accepting_changes()?;
        check_amount(amount)?;
        self.active_member(user_id)?;
        self.dilute_in(user_id, amount);
        Ok(())
    }

    /// Apply a signed correction to the pool
    pub fn adjust_pooled_funds(&mut self, delta: f64) -> Result<()> {
        let adjusted = self.pooled_funds + delta;
        if adjusted < 0.0 {
            return Err(Error::invalid_argument(format!(
                "pooled funds of {:.2} ZMW cannot absorb a correction of {:+.2} ZMW",
                self.pooled_funds, delta
            )));
        }
        self.pooled_funds = adjusted;
        Ok(())
    }

    // Existing shares keep `pooled / new_total` of their weight; the
    // contributor adds `amount / new_total`.
    fn dilute_in(&mut self, user_id: &str, amount: f64) {
        let previous = self.pooled_funds.max(0.0);
        let new_total = previous + amount;
        let retained = previous / new_total;

        for member in &mut self.members {
            let mut share = member.share_percentage * retained;
            if member.user_id == user_id {
                share += amount / new_total * 100.0;
                member.contribution_amount += amount;
            }
            member.set_share(share);
        }
        self.pooled_funds = new_total;
        debug!(
            "Cluster {} pool now {:.2} ZMW after {:.2} ZMW from {}",
            self.id, new_total, amount, user_id
        );
    }

    /// Overwrite shares, voting power and contributed amounts with the
    /// ledger's ownership. Members missing from `shares` hold nothing.
    pub fn apply_ownership(&mut self, shares: &[OwnershipShare]) -> Result<()> {
        if let Some(stranger) = shares.iter().find(|s| self.member(&s.user_id).is_none()) {
            return Err(Error::invariant(format!(
                "ledger credits {} who is not a member of cluster {}",
                stranger.user_id, self.id
            )));
        }
        check_ownership_sum(shares)?;

        for member in &mut self.members {
            match shares.iter().find(|s| s.user_id == member.user_id) {
                Some(share) => {
                    member.contribution_amount = share.amount_zmw;
                    member.set_share(share.pct);
                }
                None => {
                    member.contribution_amount = 0.0;
                    member.set_share(0.0);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coopgrid_energy::{PriorityAllocation, SurplusHandling, TradingHours};
    use proptest::prelude::*;

    fn trading() -> TradingRules {
        TradingRules {
            internal_rate: 0.8,
            external_rate: 1.2,
            trading_hours: TradingHours { start: 6, end: 22 },
            priority_allocation: PriorityAllocation::ContributionBased,
            surplus_handling: SurplusHandling::SellExternal,
            minimum_reserve: 0.0,
        }
    }

    fn cluster(funding: f64) -> Cluster {
        let now = Utc::now();
        Cluster::found(
            &NewCluster::new("Kabwata Solar", "solar", "Lusaka", funding),
            "alice",
            GovernanceRules::standard(60.0, 50.0, "monthly", now),
            trading(),
            now,
        )
        .unwrap()
    }

    fn share(c: &Cluster, user: &str) -> f64 {
        c.member(user).unwrap().share_percentage
    }

    #[test]
    fn test_founder_holds_everything() {
        let c = cluster(3000.0);
        let founder = c.member("alice").unwrap();
        assert_eq!(founder.role, MemberRole::Coordinator);
        assert_eq!(founder.share_percentage, 100.0);
        assert_eq!(founder.voting_power, 100.0);
        assert_eq!(c.status, ClusterStatus::Forming);
        assert_eq!(c.pooled_funds, 3000.0);
    }

    #[test]
    fn test_join_dilutes_existing_members() {
        let mut c = cluster(3000.0);
        c.admit_member("bob", 1000.0, Utc::now()).unwrap();

        assert_eq!(c.pooled_funds, 4000.0);
        assert!((share(&c, "alice") - 75.0).abs() < 1e-9);
        assert!((share(&c, "bob") - 25.0).abs() < 1e-9);
        assert!((c.total_share() - 100.0).abs() < 1e-9);
        assert_eq!(c.member("bob").unwrap().voting_power, share(&c, "bob"));
    }

    #[test]
    fn test_duplicate_join_is_conflict() {
        let mut c = cluster(3000.0);
        c.admit_member("bob", 1000.0, Utc::now()).unwrap();
        let before = c.clone();

        let err = c.admit_member("bob", 500.0, Utc::now()).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(c, before);
    }

    #[test]
    fn test_inactive_member_record_still_blocks_rejoin() {
        let mut c = cluster(3000.0);
        c.admit_member("bob", 1000.0, Utc::now()).unwrap();
        c.members[1].is_active = false;
        let before = c.clone();

        assert!(c.admit_member("bob", 500.0, Utc::now()).unwrap_err().is_conflict());
        assert_eq!(c, before);
    }

    #[test]
    fn test_third_member_activates_cluster() {
        let mut c = cluster(3000.0);
        c.admit_member("bob", 1000.0, Utc::now()).unwrap();
        assert_eq!(c.status, ClusterStatus::Forming);
        c.admit_member("carol", 1000.0, Utc::now()).unwrap();
        assert_eq!(c.status, ClusterStatus::Active);
    }

    #[test]
    fn test_dissolved_cluster_refuses_members() {
        let mut c = cluster(3000.0);
        c.status = ClusterStatus::Dissolved;
        assert!(c.admit_member("bob", 1000.0, Utc::now()).unwrap_err().is_invalid_argument());
        assert!(c.add_capital("alice", 10.0).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_apply_ownership_rejects_strangers() {
        let mut c = cluster(3000.0);
        let shares = vec![OwnershipShare {
            user_id: "mallory".into(),
            amount_zmw: 10.0,
            pct: 100.0,
        }];
        let err = c.apply_ownership(&shares).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn test_correction_cannot_overdraw_pool() {
        let mut c = cluster(3000.0);
        c.adjust_pooled_funds(-500.0).unwrap();
        assert_eq!(c.pooled_funds, 2500.0);
        assert!(c.adjust_pooled_funds(-3000.0).unwrap_err().is_invalid_argument());
    }

    proptest! {
        #[test]
        fn prop_dilution_keeps_total_at_100(
            founding in 1.0f64..100_000.0,
            joins in prop::collection::vec(1.0f64..100_000.0, 1..12),
            top_ups in prop::collection::vec((0usize..12, 1.0f64..10_000.0), 0..8),
        ) {
            let mut c = cluster(founding);
            for (i, amount) in joins.iter().enumerate() {
                c.admit_member(&format!("member-{}", i), *amount, Utc::now()).unwrap();
            }
            for (index, amount) in top_ups {
                let user = c.members[index % c.members.len()].user_id.clone();
                c.add_capital(&user, amount).unwrap();
            }
            prop_assert!((c.total_share() - 100.0).abs() < 1e-6);
        }
    }
}
