//! Integration tests for registry loading and pricing.
//!
//! These exercise the public API the saga relies on: a registry loaded from
//! a JSON file, quotes that respect operator limits, and records built from
//! those quotes.

use chrono::Utc;
use domain::{
    Currency, FeeRule, Money, NewTransaction, OperatorRegistry, PaymentMethod, RechargeRequest,
    RegistryConfig, RegistryError, Transaction, TransactionId, TransactionStatus, UserId,
    ValidationError, quote,
};

fn request(face: &str) -> RechargeRequest {
    RechargeRequest {
        origin_country: "BR".into(),
        phone_number: "3712-3456".into(),
        operator_id: "NMHT".into(),
        face_amount: Money::from_major_str(face).unwrap(),
        payment_method: PaymentMethod::InstantTransfer,
    }
}

mod registry_file {
    use super::*;

    #[test]
    fn loads_registry_from_disk() {
        let mut config = RegistryConfig::builtin();
        config.fees.insert(
            "BRL".into(),
            FeeRule::Fixed {
                amount: Money::from_minor(300),
            },
        );

        let path = std::env::temp_dir().join(format!("registry-{}.json", TransactionId::new()));
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();
        let registry = OperatorRegistry::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let q = quote(&registry, &request("10")).unwrap();
        assert_eq!(q.fee, Money::from_major(3));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = OperatorRegistry::from_json_file("/nonexistent/registry.json").unwrap_err();
        assert!(matches!(err, RegistryError::Io(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let err = OperatorRegistry::from_json_str("{\"operators\": 1}").unwrap_err();
        assert!(matches!(err, RegistryError::Parse(_)));
    }
}

mod clamping {
    use super::*;

    #[test]
    fn every_operator_minimum_is_enforced() {
        let registry = OperatorRegistry::builtin().unwrap();
        for op in registry.operators() {
            let phone = if op.country == "HT" { "37123456" } else { "8095551234" };
            let req = RechargeRequest {
                origin_country: "BR".into(),
                phone_number: phone.into(),
                operator_id: op.id.clone(),
                face_amount: Money::from_minor(1),
                payment_method: PaymentMethod::Card,
            };
            let q = quote(&registry, &req).unwrap();
            assert_eq!(q.settlement.amount, op.min_amount, "operator {}", op.id);
            assert!(q.settlement.clamped);
        }
    }

    #[test]
    fn maximum_is_inclusive() {
        let registry = OperatorRegistry::builtin().unwrap();
        let q = quote(&registry, &request("552.53")).unwrap();
        assert_eq!(q.settlement.amount, Money::from_minor(55253));

        let err = quote(&registry, &request("552.54")).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::AmountOutOfRange { max, .. } if max == Money::from_minor(55253)
        ));
    }
}

mod records {
    use super::*;

    #[test]
    fn record_total_is_face_plus_fee() {
        let registry = OperatorRegistry::builtin().unwrap();
        let req = request("25");
        let q = quote(&registry, &req).unwrap();

        let new = NewTransaction::from_quote(UserId::new("user-9"), &req, &q);
        let tx = Transaction::from_new(TransactionId::new(), new, Utc::now());

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, Money::from_major(35));
        assert_eq!(tx.face_amount, Money::from_major(25));
        assert_eq!(tx.currency, Currency::brl());
        assert_eq!(tx.request(), req);
    }
}
