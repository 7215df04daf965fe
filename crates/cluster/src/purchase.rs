//! Completing group purchases against the pool

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use coopgrid_common::utils::generate_prefixed_id;
use coopgrid_common::{Error, Result};
use coopgrid_energy::{AssetCondition, AssetOwnership, MaintenanceSchedule, SharedAsset};

use crate::model::{Cluster, EquipmentRequest};

impl Cluster {
    /// Fails with `InvalidArgument` if the pool cannot cover `cost`
    pub fn ensure_affordable(&self, cost: f64) -> Result<()> {
        if cost > self.pooled_funds {
            return Err(Error::invalid_argument(format!(
                "cost of {:.2} ZMW exceeds pooled funds of {:.2} ZMW in cluster {}",
                cost, self.pooled_funds, self.id
            )));
        }
        Ok(())
    }

    /// Buy the equipment: debit the pool, add the asset with an ownership
    /// snapshot of the current shares, and grow the cluster's capacity
    pub fn complete_purchase(&mut self, request: &EquipmentRequest, now: DateTime<Utc>) -> Result<SharedAsset> {
        request.validate()?;
        self.ensure_affordable(request.estimated_cost)?;

        let cost = request.estimated_cost;
        let ownership = self
            .members
            .iter()
            .filter(|m| m.share_percentage > 0.0)
            .map(|m| AssetOwnership {
                member_id: m.user_id.clone(),
                share_percentage: m.share_percentage,
                contribution_amount: cost * m.share_percentage / 100.0,
            })
            .collect();

        let interval = request.maintenance_interval_days;
        let asset = SharedAsset {
            id: generate_prefixed_id("asset"),
            asset_type: request.asset_type.clone(),
            brand: request.brand.clone(),
            model: request.model.clone(),
            cost,
            capacity: request.capacity,
            ownership,
            installation_date: now,
            warranty_expiry: now + Duration::days(365 * i64::from(request.warranty_years)),
            current_condition: AssetCondition::Excellent,
            maintenance_schedule: MaintenanceSchedule {
                interval_days: interval,
                next_due: now + Duration::days(i64::from(interval)),
            },
            performance_history: Vec::new(),
        };

        self.pooled_funds -= cost;
        self.energy_capacity += request.capacity;
        self.shared_assets.push(asset.clone());

        info!(
            "Cluster {} bought {} {} {} for {:.2} ZMW; pool now {:.2} ZMW",
            self.id, asset.asset_type, asset.brand, asset.model, cost, self.pooled_funds
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCluster;
    use coopgrid_energy::{PriorityAllocation, SurplusHandling, TradingHours, TradingRules};
    use coopgrid_governance::GovernanceRules;

    fn cluster() -> Cluster {
        let now = Utc::now();
        let mut c = Cluster::found(
            &NewCluster::new("Chilenje Grid", "solar", "Lusaka", 3000.0),
            "alice",
            GovernanceRules::standard(60.0, 50.0, "monthly", now),
            TradingRules {
                internal_rate: 0.8,
                external_rate: 1.2,
                trading_hours: TradingHours { start: 6, end: 22 },
                priority_allocation: PriorityAllocation::ContributionBased,
                surplus_handling: SurplusHandling::SellExternal,
                minimum_reserve: 0.0,
            },
            now,
        )
        .unwrap();
        c.admit_member("bob", 1000.0, now).unwrap();
        c
    }

    #[test]
    fn test_purchase_snapshots_ownership() {
        let mut c = cluster();
        let mut request = EquipmentRequest::new("solar_panel", "Helios", "H-400", 2000.0, 4.0);
        request.warranty_years = 10;

        let asset = c.complete_purchase(&request, Utc::now()).unwrap();

        assert_eq!(c.pooled_funds, 2000.0);
        assert_eq!(c.energy_capacity, 4.0);
        assert_eq!(c.shared_assets.len(), 1);
        assert!((asset.ownership_of("alice") - 75.0).abs() < 1e-9);
        assert!((asset.ownership[1].contribution_amount - 500.0).abs() < 1e-9);

        c.admit_member("carol", 2000.0, Utc::now()).unwrap();
        assert!((c.shared_assets[0].ownership_of("alice") - 75.0).abs() < 1e-9);
        assert_eq!(c.shared_assets[0].ownership_of("carol"), 0.0);
    }

    #[test]
    fn test_purchase_beyond_pool_changes_nothing() {
        let mut c = cluster();
        let before = c.clone();
        let request = EquipmentRequest::new("battery", "Volt", "V10", 4000.01, 10.0);

        assert!(c.complete_purchase(&request, Utc::now()).unwrap_err().is_invalid_argument());
        assert_eq!(c, before);
    }
}
