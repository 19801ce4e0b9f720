//! Caller-supplied recharge input.

use serde::{Deserialize, Serialize};

use crate::{Money, UserId};

/// How the customer pays for the recharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Instant local bank transfer, paid by scanning a code.
    #[serde(alias = "pix")]
    InstantTransfer,

    /// Card payment confirmed client-side with a secret.
    #[serde(alias = "stripe")]
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::InstantTransfer => "instant_transfer",
            PaymentMethod::Card => "card",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant_transfer" | "pix" => Ok(PaymentMethod::InstantTransfer),
            "card" | "stripe" => Ok(PaymentMethod::Card),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// A user's request to top up a phone abroad.
///
/// `face_amount` is expressed in the currency of `origin_country`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RechargeRequest {
    pub origin_country: String,
    pub phone_number: String,
    pub operator_id: String,
    pub face_amount: Money,
    pub payment_method: PaymentMethod,
}

/// Who is paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerInfo {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl PayerInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_accepts_provider_aliases() {
        let m: PaymentMethod = serde_json::from_str("\"pix\"").unwrap();
        assert_eq!(m, PaymentMethod::InstantTransfer);
        assert_eq!("stripe".parse::<PaymentMethod>().unwrap(), PaymentMethod::Card);
        assert_eq!(serde_json::to_string(&PaymentMethod::Card).unwrap(), "\"card\"");
    }

    #[test]
    fn request_deserializes_minor_units() {
        let req: RechargeRequest = serde_json::from_str(
            r#"{"origin_country":"BR","phone_number":"3712-3456","operator_id":"NMHT",
                "face_amount":500,"payment_method":"instant_transfer"}"#,
        )
        .unwrap();
        assert_eq!(req.face_amount, Money::from_major(5));
        assert_eq!(req.payment_method, PaymentMethod::InstantTransfer);
    }
}
