//! Domain layer for the recharge saga.
//!
//! This crate provides the types every other crate speaks:
//! - `Money` and `Currency` value objects
//! - `Transaction` records and the `TransactionStatus` state machine
//! - `RechargeRequest`, the caller's immutable input
//! - `OperatorRegistry`, the validated operator/currency configuration
//! - `quote`, which turns a request into charge and settlement amounts

pub mod error;
pub mod money;
pub mod pricing;
pub mod recharge;
pub mod registry;
pub mod status;
pub mod transaction;

pub use common::{TransactionId, UserId};
pub use error::{RegistryError, TransitionError, ValidationError};
pub use money::{Currency, Money};
pub use pricing::{Quote, Settlement, quote, settlement_amount};
pub use recharge::{PayerInfo, PaymentMethod, RechargeRequest};
pub use registry::{Destination, FeeRule, Operator, OperatorRegistry, PrefixRule, RegistryConfig};
pub use status::TransactionStatus;
pub use transaction::{NewTransaction, Transaction, TransactionPatch};
