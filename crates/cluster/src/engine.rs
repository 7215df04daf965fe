//! The cluster engine service
//!
//! Every mutating operation holds the cluster's lock for its whole
//! read-modify-write sequence, validates and computes the new state in
//! memory, and only then writes. Cluster records additionally carry a
//! version that the repository checks at write time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use coopgrid_common::config::EngineConfig;
use coopgrid_common::{Clock, Error, Result, SystemClock};
use coopgrid_energy::{
    calculate_returns, distribute_energy, EnergyDistribution, MemberEnergyProfile, MemberReturn,
    MemberStake, ReturnsParameters,
};
use coopgrid_governance::{Proposal, ProposalStatus, ProposalType, Vote, VoteChoice};
use coopgrid_ledger::{compute_ownership, Contribution, ContributionLedger, OwnershipShare};
use coopgrid_storage::{
    FileStorage, JsonRecordStore, MemoryStorage, RecordStore, Repository, StorageOptions,
};

use crate::defaults::{default_governance_rules, default_trading_rules};
use crate::model::{
    ApprovalStatus, Cluster, ClusterStatus, EquipmentRequest, NewCluster, PurchaseRequest,
};

/// Metadata key linking an equipment purchase proposal to its request
pub const PURCHASE_REQUEST_KEY: &str = "purchase_request_id";

/// Which energy figure the returns calculation credits each member with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnsBasis {
    /// The member's reported usage
    #[default]
    EnergyUsage,
    /// What the member consumed in the most recent distribution
    LatestDistribution,
}

/// Writes produced by carrying out a decision
#[derive(Debug, Default)]
struct DecisionEffects {
    purchase: Option<PurchaseRequest>,
    cluster_changed: bool,
}

pub struct ClusterEngine<R> {
    repository: Arc<Repository<R>>,
    ledger: ContributionLedger<R>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClusterEngine<JsonRecordStore> {
    /// An engine persisting to `config.storage.data_dir`
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let storage = FileStorage::new(config.storage.data_dir.clone())
            .await?
            .with_options(StorageOptions {
                sync_write: config.storage.sync_writes,
            });
        info!("Opened record store at {}", storage.root().display());

        let store = Arc::new(JsonRecordStore::new(Arc::new(storage)));
        Ok(Self::new(store, config, Arc::new(SystemClock)))
    }

    /// An engine over a fresh in-memory store
    pub fn in_memory(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(JsonRecordStore::new(Arc::new(MemoryStorage::new())));
        Self::new(store, config, clock)
    }
}

impl<R: RecordStore> ClusterEngine<R> {
    pub fn new(store: Arc<R>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let repository = Arc::new(Repository::new(store));
        Self {
            ledger: ContributionLedger::new(repository.clone()),
            repository,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn lock_cluster(&self, cluster_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn load_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.repository
            .find::<Cluster>(cluster_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("cluster {}", cluster_id)))
    }

    async fn store_cluster(&self, cluster: &mut Cluster) -> Result<()> {
        cluster.version += 1;
        self.repository.save(cluster.clone()).await?;
        debug!("Stored cluster {} at version {}", cluster.id, cluster.version);
        Ok(())
    }

    async fn load_proposal(&self, cluster_id: &str, proposal_id: &str) -> Result<Proposal> {
        self.repository
            .find::<Proposal>(proposal_id)
            .await?
            .filter(|p| p.cluster_id == cluster_id)
            .ok_or_else(|| {
                Error::not_found(format!("proposal {} in cluster {}", proposal_id, cluster_id))
            })
    }

    /// Set shares from the ledger fold, as it will stand once `entry` is
    /// appended. Nothing is written.
    async fn reconcile_ownership(&self, cluster: &mut Cluster, entry: &Contribution) -> Result<()> {
        let mut history = self.ledger.list_by_cluster(&cluster.id).await?;
        entry.validate_against(&history)?;
        history.push(entry.clone());

        let shares = compute_ownership(&history, &cluster.id);
        if shares.is_empty() && cluster.active_member_count() > 0 {
            return Err(Error::invalid_argument(format!(
                "cluster {} cannot be left with no net capital while it has members",
                cluster.id
            )));
        }
        cluster.apply_ownership(&shares)
    }

    // ---- Cluster and membership ----

    /// Found a cluster with `founder_id` as its only member
    pub async fn create_cluster(&self, data: NewCluster, founder_id: &str) -> Result<Cluster> {
        let now = self.now();
        let mut cluster = Cluster::found(
            &data,
            founder_id,
            default_governance_rules(&self.config.governance, now),
            default_trading_rules(&self.config.trading),
            now,
        )?;
        let _guard = self.lock_cluster(&cluster.id).await;

        self.ledger
            .record(Contribution::new(&cluster.id, founder_id, cluster.pooled_funds, now))
            .await?;
        self.store_cluster(&mut cluster).await?;

        info!(
            "Created cluster {} ({}) in {} founded by {} with {:.2} ZMW",
            cluster.id, cluster.name, cluster.location, founder_id, cluster.pooled_funds
        );
        Ok(cluster)
    }

    pub async fn join_cluster(&self, user_id: &str, cluster_id: &str, contribution: f64) -> Result<Cluster> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let mut cluster = self.load_cluster(cluster_id).await?;

        cluster.admit_member(user_id, contribution, now)?;
        let entry = Contribution::new(cluster_id, user_id, contribution, now);
        self.reconcile_ownership(&mut cluster, &entry).await?;

        self.ledger.record(entry).await?;
        self.store_cluster(&mut cluster).await?;

        info!(
            "{} joined cluster {} with {:.2} ZMW ({:.2}%)",
            user_id,
            cluster_id,
            contribution,
            cluster.member(user_id).map(|m| m.share_percentage).unwrap_or(0.0)
        );
        Ok(cluster)
    }

    /// Further capital from an active member
    pub async fn contribute(&self, cluster_id: &str, user_id: &str, amount: f64) -> Result<Cluster> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let mut cluster = self.load_cluster(cluster_id).await?;

        cluster.add_capital(user_id, amount)?;
        let entry = Contribution::new(cluster_id, user_id, amount, now);
        self.reconcile_ownership(&mut cluster, &entry).await?;

        self.ledger.record(entry).await?;
        self.store_cluster(&mut cluster).await?;
        Ok(cluster)
    }

    /// Correct an earlier contribution by a signed `delta`
    pub async fn correct_contribution(
        &self,
        cluster_id: &str,
        user_id: &str,
        original_id: &str,
        delta: f64,
        reason: Option<String>,
    ) -> Result<Cluster> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let mut cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;

        if cluster.member(user_id).is_none() {
            return Err(Error::not_found(format!(
                "{} is not a member of cluster {}",
                user_id, cluster_id
            )));
        }
        let original = self
            .ledger
            .get(original_id)
            .await?
            .filter(|c| c.cluster_id == cluster_id && c.user_id == user_id)
            .ok_or_else(|| {
                Error::conflict(format!(
                    "no contribution {} by {} in cluster {}",
                    original_id, user_id, cluster_id
                ))
            })?;

        let entry = Contribution::correction(&original, delta, reason, now);
        cluster.adjust_pooled_funds(delta)?;
        self.reconcile_ownership(&mut cluster, &entry).await?;

        self.ledger.record(entry).await?;
        self.store_cluster(&mut cluster).await?;
        Ok(cluster)
    }

    /// Set a member's expected energy usage in kWh
    pub async fn record_energy_usage(&self, cluster_id: &str, member_id: &str, usage: f64) -> Result<Cluster> {
        if !(usage.is_finite() && usage >= 0.0) {
            return Err(Error::invalid_argument(format!(
                "energy usage must be non-negative, got {}",
                usage
            )));
        }

        let _guard = self.lock_cluster(cluster_id).await;
        let mut cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;
        cluster.active_member_mut(member_id)?.energy_usage = usage;

        self.store_cluster(&mut cluster).await?;
        debug!("{} in cluster {} now uses {:.3} kWh", member_id, cluster_id, usage);
        Ok(cluster)
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.load_cluster(cluster_id).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.repository.list().await?)
    }

    /// Ownership as folded from the cluster's ledger
    pub async fn ownership(&self, cluster_id: &str) -> Result<Vec<OwnershipShare>> {
        self.load_cluster(cluster_id).await?;
        let history = self.ledger.list_by_cluster(cluster_id).await?;
        Ok(compute_ownership(&history, cluster_id))
    }

    pub async fn list_contributions(&self, cluster_id: &str) -> Result<Vec<Contribution>> {
        self.load_cluster(cluster_id).await?;
        self.ledger.list_by_cluster(cluster_id).await
    }

    // ---- Purchases and governance ----

    /// Open a purchase request and the equipment proposal that decides it
    pub async fn initiate_group_purchase(
        &self,
        cluster_id: &str,
        equipment: EquipmentRequest,
        proposed_by: &str,
    ) -> Result<(PurchaseRequest, Proposal)> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;
        cluster.active_member(proposed_by)?;
        equipment.validate()?;
        cluster.ensure_affordable(equipment.estimated_cost)?;

        let mut request = PurchaseRequest::new(cluster_id, equipment, proposed_by, now);
        let equipment = &request.equipment_request;
        let mut metadata = BTreeMap::new();
        metadata.insert(PURCHASE_REQUEST_KEY.to_string(), request.id.clone());

        let proposal = Proposal::open(
            cluster_id,
            ProposalType::EquipmentPurchase,
            format!("Purchase {} {} {}", equipment.brand, equipment.model, equipment.asset_type),
            format!(
                "{} {} ({}) for {:.2} ZMW adding {:.2} kW",
                equipment.brand, equipment.model, equipment.asset_type, equipment.estimated_cost, equipment.capacity
            ),
            proposed_by,
            metadata,
            &cluster.governance_rules,
            now,
        )?;
        request.proposal_id = Some(proposal.id.clone());

        self.repository.insert(request.clone()).await?;
        self.repository.insert(proposal.clone()).await?;

        info!(
            "{} proposed purchase {} in cluster {} for {:.2} ZMW",
            proposed_by, request.id, cluster_id, request.equipment_request.estimated_cost
        );
        Ok((request, proposal))
    }

    /// Open a proposal. Equipment purchases go through
    /// [`ClusterEngine::initiate_group_purchase`] instead.
    pub async fn create_proposal(
        &self,
        cluster_id: &str,
        proposal_type: ProposalType,
        title: &str,
        description: &str,
        proposed_by: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Proposal> {
        if proposal_type == ProposalType::EquipmentPurchase {
            return Err(Error::invalid_argument(
                "equipment purchases are proposed with a purchase request",
            ));
        }

        let _guard = self.lock_cluster(cluster_id).await;
        let cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;
        cluster.active_member(proposed_by)?;

        let proposal = Proposal::open(
            cluster_id,
            proposal_type,
            title,
            description,
            proposed_by,
            metadata,
            &cluster.governance_rules,
            self.now(),
        )?;
        self.repository.insert(proposal.clone()).await?;

        info!(
            "{} opened {} proposal {} in cluster {}, voting until {}",
            proposed_by, proposal_type, proposal.id, cluster_id, proposal.voting_deadline
        );
        Ok(proposal)
    }

    /// Cast or replace `member_id`'s vote, weighted by their current voting
    /// power, then resolve and implement the proposal if the vote settles it
    pub async fn vote_on_proposal(
        &self,
        cluster_id: &str,
        proposal_id: &str,
        member_id: &str,
        vote: VoteChoice,
        reason: Option<String>,
    ) -> Result<Proposal> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let mut cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;
        let mut proposal = self.load_proposal(cluster_id, proposal_id).await?;

        let voting_power = cluster.active_member(member_id)?.voting_power;
        proposal.cast_vote(Vote {
            member_id: member_id.to_string(),
            vote,
            voting_power,
            timestamp: now,
            reason,
        })?;
        debug!(
            "{} voted {:?} on {} with {:.2} voting power",
            member_id, vote, proposal_id, voting_power
        );

        self.settle(&mut cluster, &mut proposal, now).await?;
        Ok(proposal)
    }

    /// Resolve a proposal if its votes or its deadline settle it now
    pub async fn resolve_proposal(&self, cluster_id: &str, proposal_id: &str) -> Result<Proposal> {
        let _guard = self.lock_cluster(cluster_id).await;
        let mut proposal = self.load_proposal(cluster_id, proposal_id).await?;
        if !proposal.is_open() {
            return Ok(proposal);
        }

        let mut cluster = self.load_cluster(cluster_id).await?;
        self.settle(&mut cluster, &mut proposal, self.now()).await?;
        Ok(proposal)
    }

    /// Resolve every open proposal whose deadline has passed. Returns the
    /// proposals that reached a terminal state.
    pub async fn resolve_expired(&self) -> Result<Vec<Proposal>> {
        let now = self.now();
        let candidates = self
            .repository
            .filter(|p: &Proposal| p.is_open() && p.is_expired(now))
            .await?;
        debug!("{} expired proposals to re-evaluate", candidates.len());

        let mut resolved = Vec::new();
        for candidate in candidates {
            match self.resolve_proposal(&candidate.cluster_id, &candidate.id).await {
                Ok(proposal) if proposal.status.is_terminal() => resolved.push(proposal),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    warn!("Skipping proposal {}: {}", candidate.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }

    /// Carry out a passed decision that has not been implemented yet
    pub async fn implement_decision(&self, cluster_id: &str, proposal_id: &str) -> Result<Proposal> {
        let _guard = self.lock_cluster(cluster_id).await;
        let now = self.now();
        let mut proposal = self.load_proposal(cluster_id, proposal_id).await?;
        if !proposal.awaits_implementation() {
            return Err(Error::invalid_argument(format!(
                "proposal {} is {} and has {} been implemented",
                proposal_id,
                proposal.status,
                if proposal.implemented_at.is_some() { "already" } else { "not" }
            )));
        }

        let mut cluster = self.load_cluster(cluster_id).await?;
        let effects = self.apply_decision(&mut cluster, &mut proposal, now).await?;
        self.commit(&mut cluster, &proposal, effects).await?;
        Ok(proposal)
    }

    /// Try to resolve `proposal`, apply the decision if it resolved, and
    /// write the result
    async fn settle(&self, cluster: &mut Cluster, proposal: &mut Proposal, now: DateTime<Utc>) -> Result<()> {
        let effects = match proposal.try_resolve(&cluster.governance_rules, now) {
            Some(_) => self.apply_decision(cluster, proposal, now).await?,
            None => DecisionEffects::default(),
        };
        self.commit(cluster, proposal, effects).await
    }

    async fn commit(&self, cluster: &mut Cluster, proposal: &Proposal, effects: DecisionEffects) -> Result<()> {
        if let Some(purchase) = effects.purchase {
            self.repository.save(purchase).await?;
        }
        if effects.cluster_changed {
            self.store_cluster(cluster).await?;
        }
        self.repository.save(proposal.clone()).await?;
        Ok(())
    }

    async fn linked_purchase(&self, decision: &Proposal) -> Result<PurchaseRequest> {
        let request_id = decision.metadata.get(PURCHASE_REQUEST_KEY).ok_or_else(|| {
            Error::invariant(format!("proposal {} has no purchase request", decision.id))
        })?;
        self.repository
            .find::<PurchaseRequest>(request_id)
            .await?
            .filter(|r| r.cluster_id == decision.cluster_id)
            .ok_or_else(|| Error::not_found(format!("purchase request {}", request_id)))
    }

    /// Work out what a resolved decision changes, in memory
    async fn apply_decision(
        &self,
        cluster: &mut Cluster,
        decision: &mut Proposal,
        now: DateTime<Utc>,
    ) -> Result<DecisionEffects> {
        let mut effects = DecisionEffects::default();

        match decision.status {
            ProposalStatus::Open => return Ok(effects),
            ProposalStatus::Rejected => {
                if decision.proposal_type == ProposalType::EquipmentPurchase {
                    let mut request = self.linked_purchase(decision).await?;
                    if request.is_pending() {
                        request.approval_status = ApprovalStatus::Rejected;
                        info!("Purchase {} rejected by vote on {}", request.id, decision.id);
                        effects.purchase = Some(request);
                    }
                }
                return Ok(effects);
            }
            ProposalStatus::Passed => {}
        }

        if decision.implemented_at.is_some() {
            return Ok(effects);
        }

        match decision.proposal_type {
            ProposalType::EquipmentPurchase => {
                let mut request = self.linked_purchase(decision).await?;
                if request.is_pending() {
                    match cluster.complete_purchase(&request.equipment_request, now) {
                        Ok(asset) => {
                            request.approval_status = ApprovalStatus::Approved;
                            request.purchase_date = Some(now);
                            request.asset_id = Some(asset.id);
                            effects.cluster_changed = true;
                        }
                        Err(Error::InvalidArgument(reason)) => {
                            warn!("Purchase {} passed but cannot complete: {}", request.id, reason);
                            request.approval_status = ApprovalStatus::Rejected;
                        }
                        Err(e) => return Err(e),
                    }
                    effects.purchase = Some(request);
                }
            }
            ProposalType::Dissolution => {
                info!("Cluster {} dissolved by decision {}", cluster.id, decision.id);
                cluster.status = ClusterStatus::Dissolved;
                effects.cluster_changed = true;
            }
            ProposalType::NewMember
            | ProposalType::BudgetAllocation
            | ProposalType::Maintenance
            | ProposalType::RuleChange => {
                info!(
                    "Decision {} ({}) in cluster {} acknowledged",
                    decision.id, decision.proposal_type, cluster.id
                );
            }
        }

        decision.implemented_at = Some(now);
        Ok(effects)
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        self.repository
            .find::<Proposal>(proposal_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("proposal {}", proposal_id)))
    }

    pub async fn list_proposals(&self, cluster_id: &str) -> Result<Vec<Proposal>> {
        self.load_cluster(cluster_id).await?;
        Ok(self
            .repository
            .filter(|p: &Proposal| p.cluster_id == cluster_id)
            .await?)
    }

    pub async fn list_purchase_requests(&self, cluster_id: &str) -> Result<Vec<PurchaseRequest>> {
        self.load_cluster(cluster_id).await?;
        Ok(self
            .repository
            .filter(|r: &PurchaseRequest| r.cluster_id == cluster_id)
            .await?)
    }

    // ---- Energy ----

    /// Split `total_generated` kWh between the cluster's members and keep
    /// the result in the distribution history
    pub async fn distribute_energy(&self, cluster_id: &str, total_generated: f64) -> Result<EnergyDistribution> {
        let _guard = self.lock_cluster(cluster_id).await;
        let mut cluster = self.load_cluster(cluster_id).await?;
        cluster.ensure_accepting_changes()?;

        let profiles: Vec<MemberEnergyProfile> = cluster
            .members
            .iter()
            .map(|m| MemberEnergyProfile {
                member_id: m.user_id.clone(),
                share_percentage: m.share_percentage,
                energy_usage: m.energy_usage,
                is_active: m.is_active,
            })
            .collect();
        let distribution = distribute_energy(
            cluster_id,
            &profiles,
            &cluster.trading_rules,
            total_generated,
            self.now(),
        )?;

        cluster.current_generation = total_generated;
        self.repository.insert(distribution.clone()).await?;
        self.store_cluster(&mut cluster).await?;

        info!(
            "Distributed {:.3} kWh in cluster {}: consumed {:.3}, surplus {:.3}, deficit {:.3}",
            total_generated, cluster_id, distribution.total_consumed, distribution.surplus, distribution.deficit
        );
        Ok(distribution)
    }

    /// Distribution history, oldest first
    pub async fn list_distributions(&self, cluster_id: &str) -> Result<Vec<EnergyDistribution>> {
        self.load_cluster(cluster_id).await?;
        Ok(self
            .repository
            .filter(|d: &EnergyDistribution| d.cluster_id == cluster_id)
            .await?)
    }

    /// Each active member's return for the period
    pub async fn calculate_returns(&self, cluster_id: &str, basis: ReturnsBasis) -> Result<Vec<MemberReturn>> {
        let cluster = self.load_cluster(cluster_id).await?;

        let latest = match basis {
            ReturnsBasis::EnergyUsage => None,
            ReturnsBasis::LatestDistribution => Some(
                self.list_distributions(cluster_id)
                    .await?
                    .pop()
                    .ok_or_else(|| {
                        Error::not_found(format!("no distribution recorded for cluster {}", cluster_id))
                    })?,
            ),
        };

        let stakes: Vec<MemberStake> = cluster
            .members
            .iter()
            .filter(|m| m.is_active)
            .map(|m| MemberStake {
                member_id: m.user_id.clone(),
                share_percentage: m.share_percentage,
                contribution_amount: m.contribution_amount,
                energy_received: match &latest {
                    None => m.energy_usage,
                    Some(distribution) => distribution
                        .allocation_for(&m.user_id)
                        .map(|a| a.consumed_energy)
                        .unwrap_or(0.0),
                },
            })
            .collect();

        let params = ReturnsParameters {
            market_rate: self.config.returns.market_rate,
            internal_rate: cluster.trading_rules.internal_rate,
            annual_appreciation_rate: self.config.returns.annual_appreciation_rate,
            base_profit_pool: self.config.returns.base_profit_pool,
        };
        Ok(calculate_returns(&stakes, &cluster.shared_assets, &params))
    }
}
