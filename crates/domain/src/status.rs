//! Transaction status state machine.

use serde::{Deserialize, Serialize};

/// The status of a recharge transaction.
///
/// State transitions:
/// ```text
/// Pending ──► PaymentPending ──► PaymentConfirmed ──┬──► Success
///    │              │                  │            │
///    │              │                  │            └──► Processing ──► Success
///    │              │                  │                     │
///    │              │                  ├──► Refunded ◄───────┤
///    ▼              ▼                  ▼                     │
///  Failed ◄─────────┴──────────────────┴─────────────────────┘
///    │
///    └──► Refunded (late compensation of a stranded charge)
/// ```
///
/// `Success` and `Refunded` are immutable once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Ledger record created, no charge yet.
    #[default]
    Pending,

    /// Charge created, waiting for the payer.
    PaymentPending,

    /// Gateway confirmed the charge, the top-up window is open.
    PaymentConfirmed,

    /// Top-up accepted by the provider but settled asynchronously.
    Processing,

    /// Top-up delivered (terminal).
    Success,

    /// Charge creation failed, payment never approved, or compensation failed.
    Failed,

    /// Charge refunded after a failed top-up (terminal).
    Refunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 7] = [
        TransactionStatus::Pending,
        TransactionStatus::PaymentPending,
        TransactionStatus::PaymentConfirmed,
        TransactionStatus::Processing,
        TransactionStatus::Success,
        TransactionStatus::Failed,
        TransactionStatus::Refunded,
    ];

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, PaymentPending)
                | (Pending, Failed)
                | (PaymentPending, PaymentConfirmed)
                | (PaymentPending, Failed)
                | (PaymentConfirmed, Success)
                | (PaymentConfirmed, Processing)
                | (PaymentConfirmed, Refunded)
                | (PaymentConfirmed, Failed)
                | (Processing, Success)
                | (Processing, Refunded)
                | (Processing, Failed)
                | (Failed, Refunded)
        )
    }

    /// Returns true if no saga step will move this record forward on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Refunded
        )
    }

    /// Returns true if the record can no longer be modified at all.
    pub fn is_immutable(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Refunded)
    }

    /// Returns true while the customer's money is captured and no outcome is recorded.
    pub fn holds_captured_funds(&self) -> bool {
        matches!(
            self,
            TransactionStatus::PaymentConfirmed | TransactionStatus::Processing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::PaymentPending => "payment_pending",
            TransactionStatus::PaymentConfirmed => "payment_confirmed",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transaction status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Pending.can_transition_to(PaymentPending));
        assert!(PaymentPending.can_transition_to(PaymentConfirmed));
        assert!(PaymentConfirmed.can_transition_to(Success));
        assert!(PaymentConfirmed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Success));
    }

    #[test]
    fn no_transition_reverses() {
        assert!(!PaymentPending.can_transition_to(Pending));
        assert!(!PaymentConfirmed.can_transition_to(PaymentPending));
        assert!(!Processing.can_transition_to(PaymentConfirmed));
        assert!(!Failed.can_transition_to(PaymentConfirmed));
        assert!(!Pending.can_transition_to(Success));
    }

    #[test]
    fn immutable_states_have_no_outgoing_edges() {
        for from in [Success, Refunded] {
            assert!(from.is_immutable());
            for to in TransactionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_and_captured_states_are_disjoint() {
        let terminal: Vec<_> = TransactionStatus::ALL
            .into_iter()
            .filter(TransactionStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![Success, Failed, Refunded]);

        for status in TransactionStatus::ALL {
            assert!(!(status.is_terminal() && status.holds_captured_funds()), "{status}");
        }
        assert!(PaymentConfirmed.holds_captured_funds());
        assert!(Processing.holds_captured_funds());
        assert!(!PaymentPending.holds_captured_funds());
    }

    #[test]
    fn failed_can_only_be_refunded() {
        for to in TransactionStatus::ALL {
            assert_eq!(Failed.can_transition_to(to), to == Refunded);
        }
    }

    #[test]
    fn string_representation_matches_serde() {
        for status in TransactionStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<TransactionStatus>().is_err());
    }
}
