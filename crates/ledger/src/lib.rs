//! Contribution ledger for CoopGrid
//!
//! Capital contributions are appended, never edited or deleted. Mistakes are
//! fixed by appending a correction that references the original entry, and
//! ownership is always recomputed as a fold over the full history.

pub mod contribution;
pub mod ledger;
pub mod ownership;

pub use contribution::Contribution;
pub use ledger::ContributionLedger;
pub use ownership::{check_ownership_sum, compute_ownership, OwnershipShare};
