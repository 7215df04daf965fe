//! Governance for CoopGrid clusters
//!
//! Proposals are opened against a cluster's [`GovernanceRules`], collect
//! capital-weighted votes, and resolve to `passed` or `rejected` once quorum
//! is met and either the approval threshold is reached or the voting
//! deadline has passed. Resolution is evaluated lazily, when a vote arrives
//! or when someone asks.

pub mod proposal;
pub mod rules;
pub mod voting;

pub use proposal::{Proposal, ProposalStatus, Vote, VoteChoice};
pub use rules::{GovernanceRules, ProposalType, ProposalTypeRule};
pub use voting::{resolution, tally_votes, VotingResult};
