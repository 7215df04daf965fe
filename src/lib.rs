//! CoopGrid
//!
//! Energy cooperative clusters: capital contributions become ownership,
//! ownership weights governance votes, and each period's generation is
//! split between members under the cluster's trading rules.

/// Module version information
pub mod version {
    /// The current version of the CoopGrid library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Error taxonomy, configuration, logging and clocks
pub mod common {
    pub use coopgrid_common::*;
}

/// Record persistence
pub mod storage {
    pub use coopgrid_storage::*;
}

/// Contribution ledger and ownership fold
pub mod ledger {
    pub use coopgrid_ledger::*;
}

/// Proposals, votes and resolution
pub mod governance {
    pub use coopgrid_governance::*;
}

/// Energy distribution and member returns
pub mod energy {
    pub use coopgrid_energy::*;
}

/// The cluster aggregate and engine
pub mod cluster {
    pub use coopgrid_cluster::*;
}

pub use coopgrid_cluster::{ClusterEngine, DeadlineTicker, ReturnsBasis};
pub use coopgrid_common::{Error, Result};
