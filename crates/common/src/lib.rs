//! Shared types used across the recharge crates.

mod types;

pub use types::{TransactionId, UserId};
