//! Common utilities and types for CoopGrid

pub mod config;
pub mod error;
pub mod logging;
pub mod time;
pub mod utils;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
