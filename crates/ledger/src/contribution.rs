use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coopgrid_common::utils::generate_prefixed_id;
use coopgrid_common::{Error, Result};
use coopgrid_storage::{Collection, Record};

/// A capital contribution, or a correction of one, in ZMW
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub contribution_id: String,
    pub cluster_id: String,
    pub user_id: String,
    /// Positive for contributions; a signed adjustment for corrections
    #[serde(rename = "amountZMW")]
    pub amount_zmw: f64,
    pub timestamp: DateTime<Utc>,
    /// Id of the contribution this entry corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Contribution {
    pub fn new(
        cluster_id: impl Into<String>,
        user_id: impl Into<String>,
        amount_zmw: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            contribution_id: generate_prefixed_id("contrib"),
            cluster_id: cluster_id.into(),
            user_id: user_id.into(),
            amount_zmw,
            timestamp,
            corrects: None,
            reason: None,
        }
    }

    /// A correction of `original` by `delta` ZMW
    pub fn correction(
        original: &Contribution,
        delta: f64,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            contribution_id: generate_prefixed_id("contrib"),
            cluster_id: original.cluster_id.clone(),
            user_id: original.user_id.clone(),
            amount_zmw: delta,
            timestamp,
            corrects: Some(original.contribution_id.clone()),
            reason,
        }
    }

    pub fn is_correction(&self) -> bool {
        self.corrects.is_some()
    }

    /// Check that this entry may be appended to `history`.
    ///
    /// A plain contribution needs a positive amount. A correction needs a
    /// non-zero delta, an original in `history` with the same cluster and
    /// user that is not itself a correction, and must leave the original's
    /// effective amount non-negative.
    pub fn validate_against(&self, history: &[Contribution]) -> Result<()> {
        if self.cluster_id.trim().is_empty() || self.user_id.trim().is_empty() {
            return Err(Error::invalid_argument(
                "contribution requires a cluster id and a user id",
            ));
        }
        if !self.amount_zmw.is_finite() {
            return Err(Error::invalid_argument(format!(
                "contribution amount must be finite, got {}",
                self.amount_zmw
            )));
        }

        let original_id = match &self.corrects {
            None => {
                if self.amount_zmw <= 0.0 {
                    return Err(Error::invalid_argument(format!(
                        "contribution amount must be positive, got {}",
                        self.amount_zmw
                    )));
                }
                return Ok(());
            }
            Some(id) => id,
        };

        if self.amount_zmw == 0.0 {
            return Err(Error::invalid_argument("correction delta must be non-zero"));
        }

        let original = history
            .iter()
            .find(|c| &c.contribution_id == original_id)
            .ok_or_else(|| {
                Error::conflict(format!(
                    "correction references unknown contribution {}",
                    original_id
                ))
            })?;

        if original.is_correction() {
            return Err(Error::conflict(format!(
                "contribution {} is itself a correction",
                original_id
            )));
        }
        if original.cluster_id != self.cluster_id || original.user_id != self.user_id {
            return Err(Error::conflict(format!(
                "contribution {} belongs to a different cluster or member",
                original_id
            )));
        }

        let effective = original.amount_zmw
            + history
                .iter()
                .filter(|c| c.corrects.as_deref() == Some(original_id.as_str()))
                .map(|c| c.amount_zmw)
                .sum::<f64>()
            + self.amount_zmw;
        if effective < 0.0 {
            return Err(Error::invalid_argument(format!(
                "correction would leave contribution {} at {:.2} ZMW",
                original_id, effective
            )));
        }

        Ok(())
    }
}

impl Record for Contribution {
    const COLLECTION: Collection = Collection::Contributions;

    fn record_id(&self) -> &str {
        &self.contribution_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_contribution_must_be_positive() {
        let now = Utc::now();
        assert!(Contribution::new("c", "alice", 100.0, now).validate_against(&[]).is_ok());

        let err = Contribution::new("c", "alice", 0.0, now)
            .validate_against(&[])
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = Contribution::new("c", "alice", f64::NAN, now)
            .validate_against(&[])
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_correction_rules() {
        let now = Utc::now();
        let original = Contribution::new("c", "alice", 1000.0, now);
        let history = vec![original.clone()];

        let fix = Contribution::correction(&original, -200.0, Some("typo".into()), now);
        assert!(fix.validate_against(&history).is_ok());

        let too_much = Contribution::correction(&original, -1000.01, None, now);
        assert!(too_much.validate_against(&history).unwrap_err().is_invalid_argument());

        let mut dangling = fix.clone();
        dangling.corrects = Some("contrib-missing".into());
        assert!(dangling.validate_against(&history).unwrap_err().is_conflict());

        let mut wrong_member = fix.clone();
        wrong_member.user_id = "bob".into();
        assert!(wrong_member.validate_against(&history).unwrap_err().is_conflict());
    }

    #[test]
    fn test_corrections_accumulate() {
        let now = Utc::now();
        let original = Contribution::new("c", "alice", 500.0, now);
        let first = Contribution::correction(&original, -300.0, None, now);
        let history = vec![original.clone(), first.clone()];

        let second = Contribution::correction(&original, -250.0, None, now);
        assert!(second.validate_against(&history).unwrap_err().is_invalid_argument());

        let chained = Contribution::correction(&first, 10.0, None, now);
        assert!(chained.validate_against(&history).unwrap_err().is_conflict());
    }
}
