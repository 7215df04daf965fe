//! Ownership as a fold over the contribution ledger

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use coopgrid_common::utils::round_to;
use coopgrid_common::{Error, Result};

use crate::contribution::Contribution;

/// A member's share of a cluster's contributed capital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipShare {
    pub user_id: String,
    #[serde(rename = "amountZMW")]
    pub amount_zmw: f64,
    /// Percentage of total capital, rounded to two decimals
    pub pct: f64,
}

/// Compute per-member ownership of `cluster_id` from its contributions.
///
/// Entries for other clusters are ignored. Members appear in order of their
/// first entry; members whose net capital is not positive are left out. An
/// empty list comes back when the cluster has no capital.
pub fn compute_ownership(contributions: &[Contribution], cluster_id: &str) -> Vec<OwnershipShare> {
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, f64> = HashMap::new();

    for entry in contributions.iter().filter(|c| c.cluster_id == cluster_id) {
        let total = totals.entry(entry.user_id.as_str()).or_insert_with(|| {
            order.push(entry.user_id.as_str());
            0.0
        });
        *total += entry.amount_zmw;
    }

    let holders: Vec<(&str, f64)> = order
        .into_iter()
        .filter_map(|user| {
            let amount = totals.get(user).copied().unwrap_or(0.0);
            (amount > 0.0).then_some((user, amount))
        })
        .collect();

    let total_amount: f64 = holders.iter().map(|(_, amount)| amount).sum();
    if total_amount <= 0.0 {
        return Vec::new();
    }

    holders
        .into_iter()
        .map(|(user, amount)| OwnershipShare {
            user_id: user.to_string(),
            amount_zmw: amount,
            pct: round_to(amount / total_amount * 100.0, 2),
        })
        .collect()
}

/// Fail with `InvariantViolation` unless the shares sum to 100 within the
/// rounding allowance of 0.01 per member
pub fn check_ownership_sum(shares: &[OwnershipShare]) -> Result<()> {
    if shares.is_empty() {
        return Ok(());
    }

    let sum: f64 = shares.iter().map(|s| s.pct).sum();
    let allowance = 0.01 * shares.len() as f64 + 1e-9;
    if (sum - 100.0).abs() > allowance {
        return Err(Error::invariant(format!(
            "ownership sums to {:.4}% across {} members",
            sum,
            shares.len()
        )));
    }
    Ok(())
}
