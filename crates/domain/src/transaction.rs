//! The ledger's transaction record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Currency, Money, PaymentMethod, Quote, RechargeRequest, TransactionId, TransactionStatus,
    TransitionError, UserId,
};

/// One user-initiated recharge attempt.
///
/// `amount` is the total charged (face value plus fee) in `currency`. It is
/// fixed when the record is created and every later step reads it back
/// from here rather than recomputing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub phone_number: String,
    pub operator_id: String,
    pub origin_country: String,
    pub face_amount: Money,
    pub amount: Money,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub correlation_id: Option<String>,
    pub refund_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a fresh `pending` record. Stores call this when assigning the id.
    pub fn from_new(id: TransactionId, new: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            phone_number: new.phone_number,
            operator_id: new.operator_id,
            origin_country: new.origin_country,
            face_amount: new.face_amount,
            amount: new.amount,
            currency: new.currency,
            status: TransactionStatus::Pending,
            payment_method: new.payment_method,
            payment_id: None,
            provider_transaction_id: None,
            correlation_id: None,
            refund_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The request this record was created from.
    pub fn request(&self) -> RechargeRequest {
        RechargeRequest {
            origin_country: self.origin_country.clone(),
            phone_number: self.phone_number.clone(),
            operator_id: self.operator_id.clone(),
            face_amount: self.face_amount,
            payment_method: self.payment_method,
        }
    }

    /// Checks that `patch` is a legal mutation of this record.
    pub fn check_patch(&self, patch: &TransactionPatch) -> Result<(), TransitionError> {
        if self.status.is_immutable() && !patch.is_empty() {
            return Err(TransitionError::Immutable(self.status));
        }
        if let Some(next) = patch.status
            && next != self.status
            && !self.status.can_transition_to(next)
        {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }

    /// Applies `patch` without checking it. Callers run `check_patch` first.
    pub fn apply(&mut self, patch: TransactionPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(v) = patch.payment_id {
            self.payment_id = Some(v);
        }
        if let Some(v) = patch.provider_transaction_id {
            self.provider_transaction_id = Some(v);
        }
        if let Some(v) = patch.correlation_id {
            self.correlation_id = Some(v);
        }
        if let Some(v) = patch.refund_id {
            self.refund_id = Some(v);
        }
        if let Some(v) = patch.error_message {
            self.error_message = v;
        }
        self.updated_at = now;
    }
}

/// Fields supplied when a record is created. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub phone_number: String,
    pub operator_id: String,
    pub origin_country: String,
    pub face_amount: Money,
    pub amount: Money,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
}

impl NewTransaction {
    pub fn from_quote(user_id: UserId, request: &RechargeRequest, quote: &Quote) -> Self {
        Self {
            user_id,
            phone_number: request.phone_number.clone(),
            operator_id: request.operator_id.clone(),
            origin_country: request.origin_country.clone(),
            face_amount: quote.face,
            amount: quote.total,
            currency: quote.origin_currency.clone(),
            payment_method: request.payment_method,
        }
    }
}

/// A partial update. `None` leaves a field untouched.
///
/// `error_message` is doubly optional so that a step can clear a stale
/// diagnostic (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub payment_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub correlation_id: Option<String>,
    pub refund_id: Option<String>,
    pub error_message: Option<Option<String>>,
}

impl TransactionPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_payment_id(mut self, id: impl Into<String>) -> Self {
        self.payment_id = Some(id.into());
        self
    }

    pub fn with_provider_transaction_id(mut self, id: Option<String>) -> Self {
        self.provider_transaction_id = id;
        self
    }

    pub fn with_correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_refund_id(mut self, id: impl Into<String>) -> Self {
        self.refund_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: TransactionStatus) -> Transaction {
        let new = NewTransaction {
            user_id: UserId::new("user-1"),
            phone_number: "37123456".into(),
            operator_id: "NMHT".into(),
            origin_country: "BR".into(),
            face_amount: Money::from_major(5),
            amount: Money::from_major(7),
            currency: Currency::brl(),
            payment_method: PaymentMethod::InstantTransfer,
        };
        let mut tx = Transaction::from_new(TransactionId::new(), new, Utc::now());
        tx.status = status;
        tx
    }

    #[test]
    fn new_record_is_pending_without_ids() {
        let tx = record(TransactionStatus::Pending);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.payment_id.is_none());
        assert_eq!(tx.created_at, tx.updated_at);
        assert_eq!(tx.request().face_amount, Money::from_major(5));
    }

    #[test]
    fn check_patch_rejects_backwards_moves() {
        let tx = record(TransactionStatus::PaymentConfirmed);
        let err = tx
            .check_patch(&TransactionPatch::status(TransactionStatus::PaymentPending))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: TransactionStatus::PaymentConfirmed,
                to: TransactionStatus::PaymentPending,
            }
        );
    }

    #[test]
    fn immutable_records_reject_any_change() {
        let tx = record(TransactionStatus::Refunded);
        assert_eq!(
            tx.check_patch(&TransactionPatch::default().with_error("late")),
            Err(TransitionError::Immutable(TransactionStatus::Refunded))
        );
        assert!(tx.check_patch(&TransactionPatch::default()).is_ok());
    }

    #[test]
    fn apply_sets_fields_and_clears_error() {
        let mut tx = record(TransactionStatus::PaymentConfirmed);
        tx.error_message = Some("stale".into());
        let patch = TransactionPatch::status(TransactionStatus::Success)
            .with_provider_transaction_id(Some("DC-1".into()))
            .clear_error();
        tx.check_patch(&patch).unwrap();
        tx.apply(patch, Utc::now());

        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.provider_transaction_id.as_deref(), Some("DC-1"));
        assert!(tx.error_message.is_none());
    }
}
