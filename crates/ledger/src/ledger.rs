use std::sync::Arc;

use tracing::{debug, info};

use coopgrid_common::Result;
use coopgrid_storage::{RecordStore, Repository};

use crate::contribution::Contribution;

/// Append-only log of capital contributions.
///
/// Validation of a correction reads the cluster's history and then appends;
/// callers mutating the same cluster concurrently must serialize around
/// [`ContributionLedger::record`].
pub struct ContributionLedger<R> {
    repository: Arc<Repository<R>>,
}

impl<R: RecordStore> ContributionLedger<R> {
    pub fn new(repository: Arc<Repository<R>>) -> Self {
        Self { repository }
    }

    /// Append an entry to the ledger
    pub async fn record(&self, entry: Contribution) -> Result<Contribution> {
        let history = self.list_by_cluster(&entry.cluster_id).await?;
        entry.validate_against(&history)?;

        self.repository.insert(entry.clone()).await?;

        if let Some(original) = &entry.corrects {
            info!(
                "Recorded correction {} of {} for {} in cluster {}: {:+.2} ZMW",
                entry.contribution_id, original, entry.user_id, entry.cluster_id, entry.amount_zmw
            );
        } else {
            info!(
                "Recorded contribution {} for {} in cluster {}: {:.2} ZMW",
                entry.contribution_id, entry.user_id, entry.cluster_id, entry.amount_zmw
            );
        }
        Ok(entry)
    }

    /// Every entry for a cluster, in insertion order
    pub async fn list_by_cluster(&self, cluster_id: &str) -> Result<Vec<Contribution>> {
        let entries = self
            .repository
            .filter(|c: &Contribution| c.cluster_id == cluster_id)
            .await?;
        debug!("Loaded {} ledger entries for cluster {}", entries.len(), cluster_id);
        Ok(entries)
    }

    pub async fn get(&self, contribution_id: &str) -> Result<Option<Contribution>> {
        Ok(self.repository.find(contribution_id).await?)
    }
}
