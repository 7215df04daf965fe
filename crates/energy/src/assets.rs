//! Generation and storage equipment owned jointly by a cluster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCondition {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// A member's stake in one asset, frozen when the asset was bought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetOwnership {
    pub member_id: String,
    pub share_percentage: f64,
    /// Portion of the purchase cost attributed to this member
    pub contribution_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSchedule {
    pub interval_days: u32,
    pub next_due: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub recorded_at: DateTime<Utc>,
    /// kWh produced over the recorded period
    pub energy_generated: f64,
    /// Output relative to rated capacity, 0.0 to 1.0
    pub efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedAsset {
    pub id: String,
    pub asset_type: String,
    pub brand: String,
    pub model: String,
    /// Purchase cost in ZMW
    pub cost: f64,
    /// Rated capacity in kW
    pub capacity: f64,
    pub ownership: Vec<AssetOwnership>,
    pub installation_date: DateTime<Utc>,
    pub warranty_expiry: DateTime<Utc>,
    pub current_condition: AssetCondition,
    pub maintenance_schedule: MaintenanceSchedule,
    #[serde(default)]
    pub performance_history: Vec<PerformanceRecord>,
}

impl SharedAsset {
    /// The member's percentage of this asset, zero if they hold none
    pub fn ownership_of(&self, member_id: &str) -> f64 {
        self.ownership
            .iter()
            .find(|o| o.member_id == member_id)
            .map(|o| o.share_percentage)
            .unwrap_or(0.0)
    }
}
