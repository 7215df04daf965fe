//! The cluster aggregate and the records it owns

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coopgrid_common::utils::generate_prefixed_id;
use coopgrid_common::{Error, Result};
use coopgrid_energy::{SharedAsset, TradingRules};
use coopgrid_governance::GovernanceRules;
use coopgrid_storage::{Collection, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Forming,
    Active,
    Dissolved,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterStatus::Forming => "forming",
            ClusterStatus::Active => "active",
            ClusterStatus::Dissolved => "dissolved",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Coordinator,
    Member,
}

/// A member as embedded in its cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    /// Net capital contributed, ZMW
    pub contribution_amount: f64,
    pub share_percentage: f64,
    pub role: MemberRole,
    /// Always equal to `share_percentage`
    pub voting_power: f64,
    /// kWh the member expects to draw per period
    pub energy_usage: f64,
    pub is_active: bool,
}

impl Member {
    pub fn new(
        user_id: impl Into<String>,
        role: MemberRole,
        contribution_amount: f64,
        share_percentage: f64,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            joined_at,
            contribution_amount,
            share_percentage,
            role,
            voting_power: share_percentage,
            energy_usage: 0.0,
            is_active: true,
        }
    }

    pub(crate) fn set_share(&mut self, share_percentage: f64) {
        self.share_percentage = share_percentage;
        self.voting_power = share_percentage;
    }
}

/// An energy cooperative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: String,
    pub location: String,
    pub members: Vec<Member>,
    pub shared_assets: Vec<SharedAsset>,
    /// Capital available for purchases, ZMW
    pub pooled_funds: f64,
    /// Installed capacity, kW
    pub energy_capacity: f64,
    /// Generation of the most recent distribution, kWh
    pub current_generation: f64,
    pub governance_rules: GovernanceRules,
    pub trading_rules: TradingRules,
    pub created_at: DateTime<Utc>,
    pub status: ClusterStatus,
    pub reputation: f64,
    /// Bumped on every write
    #[serde(default)]
    pub version: u64,
}

impl Record for Cluster {
    const COLLECTION: Collection = Collection::Clusters;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Option<u64> {
        Some(self.version)
    }
}

/// Caller-supplied fields for a new cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCluster {
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: String,
    pub location: String,
    pub initial_funding: Option<f64>,
    #[serde(default)]
    pub energy_capacity: Option<f64>,
    #[serde(default)]
    pub governance_rules: Option<GovernanceRules>,
    #[serde(default)]
    pub trading_rules: Option<TradingRules>,
}

impl NewCluster {
    pub fn new(
        name: impl Into<String>,
        cluster_type: impl Into<String>,
        location: impl Into<String>,
        initial_funding: f64,
    ) -> Self {
        Self {
            name: name.into(),
            cluster_type: cluster_type.into(),
            location: location.into(),
            initial_funding: Some(initial_funding),
            ..Default::default()
        }
    }

    /// Checks the required fields and returns the initial funding
    pub fn validate(&self) -> Result<f64> {
        for (field, value) in [
            ("name", &self.name),
            ("type", &self.cluster_type),
            ("location", &self.location),
        ] {
            if value.trim().is_empty() {
                return Err(Error::invalid_argument(format!("cluster {} is required", field)));
            }
        }

        let funding = self
            .initial_funding
            .ok_or_else(|| Error::invalid_argument("cluster initialFunding is required"))?;
        if !(funding.is_finite() && funding > 0.0) {
            return Err(Error::invalid_argument(format!(
                "initial funding must be positive, got {}",
                funding
            )));
        }

        if let Some(capacity) = self.energy_capacity {
            if !(capacity.is_finite() && capacity >= 0.0) {
                return Err(Error::invalid_argument(format!(
                    "energy capacity must be non-negative, got {}",
                    capacity
                )));
            }
        }
        if let Some(rules) = &self.governance_rules {
            rules.validate()?;
        }
        if let Some(rules) = &self.trading_rules {
            rules.validate()?;
        }
        Ok(funding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Equipment a cluster proposes to buy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentRequest {
    pub asset_type: String,
    pub brand: String,
    pub model: String,
    /// ZMW
    pub estimated_cost: f64,
    /// kW added to the cluster once installed
    pub capacity: f64,
    #[serde(default)]
    pub warranty_years: u32,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_days: u32,
}

fn default_maintenance_interval() -> u32 {
    180
}

impl EquipmentRequest {
    pub fn new(
        asset_type: impl Into<String>,
        brand: impl Into<String>,
        model: impl Into<String>,
        estimated_cost: f64,
        capacity: f64,
    ) -> Self {
        Self {
            asset_type: asset_type.into(),
            brand: brand.into(),
            model: model.into(),
            estimated_cost,
            capacity,
            warranty_years: 0,
            maintenance_interval_days: default_maintenance_interval(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset_type.trim().is_empty() {
            return Err(Error::invalid_argument("equipment asset type is required"));
        }
        if !(self.estimated_cost.is_finite() && self.estimated_cost > 0.0) {
            return Err(Error::invalid_argument(format!(
                "estimated cost must be positive, got {}",
                self.estimated_cost
            )));
        }
        if !(self.capacity.is_finite() && self.capacity >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "equipment capacity must be non-negative, got {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// A group purchase awaiting, or settled by, its proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub id: String,
    pub cluster_id: String,
    pub equipment_request: EquipmentRequest,
    pub requested_by: String,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<DateTime<Utc>>,
    /// The asset created when the purchase completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

impl PurchaseRequest {
    pub fn new(
        cluster_id: impl Into<String>,
        equipment_request: EquipmentRequest,
        requested_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_prefixed_id("purchase"),
            cluster_id: cluster_id.into(),
            equipment_request,
            requested_by: requested_by.into(),
            approval_status: ApprovalStatus::Pending,
            created_at: now,
            proposal_id: None,
            purchase_date: None,
            asset_id: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.approval_status == ApprovalStatus::Pending
    }
}

impl Record for PurchaseRequest {
    const COLLECTION: Collection = Collection::PurchaseRequests;

    fn record_id(&self) -> &str {
        &self.id
    }
}
