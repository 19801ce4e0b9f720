//! Domain error types.

use thiserror::Error;

use crate::{Currency, Money, TransactionStatus};

/// Input rejected before any external call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown origin country: {0}")]
    UnknownCountry(String),

    #[error("Invalid phone number {phone}: expected {expected} digits for {country}, got {actual}")]
    InvalidPhone {
        phone: String,
        country: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {amount} {currency} outside operator range {min}..={max}")]
    AmountOutOfRange {
        amount: Money,
        currency: Currency,
        min: Money,
        max: Money,
    },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Currency {currency} is not supported by the {method} gateway")]
    UnsupportedCurrency { currency: Currency, method: String },
}

/// Operator/currency configuration that failed validation at load time.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Missing exchange rate for {0}")]
    MissingRate(String),

    #[error("Missing fee rule for {0}")]
    MissingFee(String),

    #[error("Missing phone rule for destination country {0}")]
    MissingPhoneRule(String),

    #[error("Duplicate operator id: {0}")]
    DuplicateOperator(String),

    #[error("Invalid entry {entry}: {reason}")]
    InvalidEntry { entry: String, reason: String },

    #[error("Failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse registry file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A status change or mutation the lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Transaction is {0} and can no longer be modified")]
    Immutable(TransactionStatus),
}
