//! Energy cooperative clusters for CoopGrid
//!
//! The [`Cluster`] aggregate holds members, pooled funds, shared assets and
//! the cluster's rules. [`ClusterEngine`] is the service every operation goes
//! through: it serializes work per cluster, keeps ownership in step with the
//! contribution ledger, and carries out governance decisions.

pub mod defaults;
pub mod engine;
pub mod membership;
pub mod model;
pub mod purchase;
pub mod ticker;

pub use engine::{ClusterEngine, ReturnsBasis, PURCHASE_REQUEST_KEY};
pub use membership::ACTIVATION_MEMBER_COUNT;
pub use model::{
    ApprovalStatus, Cluster, ClusterStatus, EquipmentRequest, Member, MemberRole, NewCluster,
    PurchaseRequest,
};
pub use ticker::DeadlineTicker;
