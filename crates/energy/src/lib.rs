//! Energy economics for CoopGrid clusters
//!
//! Pure computations: how a period's generation is split between members
//! and what happens to the surplus, and what each member earns from their
//! stake. Nothing here touches storage; the cluster engine persists results.

pub mod assets;
pub mod distribution;
pub mod returns;
pub mod trading;

pub use assets::{AssetCondition, AssetOwnership, MaintenanceSchedule, PerformanceRecord, SharedAsset};
pub use distribution::{
    distribute_energy, EnergyDistribution, ExternalTrade, MemberAllocation, MemberEnergyProfile,
    TradeStatus,
};
pub use returns::{calculate_returns, MemberReturn, MemberStake, ReturnsParameters};
pub use trading::{PriorityAllocation, SurplusHandling, TradingHours, TradingRules};
