//! Charge and settlement amounts for a recharge request.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, Money, Operator, OperatorRegistry, RechargeRequest, ValidationError};

/// Amount the top-up provider is paid, in the registry's settlement currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub amount: Money,
    pub currency: Currency,
    /// True if the converted amount was raised to the operator minimum.
    pub clamped: bool,
}

/// Everything the saga needs to charge the customer and pay the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub origin_currency: Currency,
    pub face: Money,
    pub fee: Money,
    /// `face + fee`, the amount charged and, on failure, refunded.
    pub total: Money,
    pub settlement: Settlement,
}

/// Prices `request` against the registry.
///
/// Fails without side effects if the operator is unknown, the phone number
/// does not match the destination rules, or the amount is not deliverable.
pub fn quote(registry: &OperatorRegistry, request: &RechargeRequest) -> Result<Quote, ValidationError> {
    if !request.face_amount.is_positive() {
        return Err(ValidationError::InvalidAmount(request.face_amount.to_string()));
    }

    let destination = registry.validate_destination(&request.phone_number, &request.operator_id)?;
    let origin_currency = registry.currency_for_country(&request.origin_country)?.clone();

    let fee = registry
        .fee_rule(&origin_currency)
        .ok_or_else(|| ValidationError::UnknownCountry(request.origin_country.clone()))?
        .fee_for(request.face_amount)?;
    let total = request
        .face_amount
        .checked_add(fee)
        .ok_or_else(|| ValidationError::InvalidAmount(request.face_amount.to_string()))?;

    let settlement = settlement_amount(
        registry,
        destination.operator,
        request.face_amount,
        &origin_currency,
    )?;

    Ok(Quote {
        origin_currency,
        face: request.face_amount,
        fee,
        total,
        settlement,
    })
}

/// Converts `face` into the settlement currency and applies the operator range.
///
/// Conversion goes through the USD rate table: `face * rate(settlement) /
/// rate(origin)`, rounded to cents. Amounts under the operator minimum are
/// raised to it; amounts over the maximum are rejected.
pub fn settlement_amount(
    registry: &OperatorRegistry,
    operator: &Operator,
    face: Money,
    origin: &Currency,
) -> Result<Settlement, ValidationError> {
    let target = registry.settlement_currency();

    let converted = if origin == target {
        face
    } else {
        let from = rate(registry, origin)?;
        let to = rate(registry, target)?;
        let value = face
            .to_decimal()
            .checked_mul(to)
            .and_then(|v| v.checked_div(from))
            .ok_or_else(|| ValidationError::InvalidAmount(face.to_string()))?;
        Money::from_decimal(value)?
    };

    if converted > operator.max_amount {
        return Err(ValidationError::AmountOutOfRange {
            amount: converted,
            currency: target.clone(),
            min: operator.min_amount,
            max: operator.max_amount,
        });
    }

    let clamped = converted < operator.min_amount;
    Ok(Settlement {
        amount: if clamped { operator.min_amount } else { converted },
        currency: target.clone(),
        clamped,
    })
}

fn rate(registry: &OperatorRegistry, currency: &Currency) -> Result<Decimal, ValidationError> {
    registry
        .usd_rate(currency)
        .ok_or_else(|| ValidationError::InvalidCurrency(currency.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PaymentMethod;

    fn request(country: &str, operator: &str, phone: &str, face: &str) -> RechargeRequest {
        RechargeRequest {
            origin_country: country.into(),
            phone_number: phone.into(),
            operator_id: operator.into(),
            face_amount: Money::from_major_str(face).unwrap(),
            payment_method: PaymentMethod::InstantTransfer,
        }
    }

    #[test]
    fn amount_above_minimum_is_unchanged() {
        let registry = OperatorRegistry::builtin().unwrap();
        let q = quote(&registry, &request("BR", "NMHT", "37123456", "5")).unwrap();
        assert_eq!(q.settlement.amount, Money::from_major(5));
        assert!(!q.settlement.clamped);
    }

    #[test]
    fn amount_below_minimum_is_raised() {
        let registry = OperatorRegistry::builtin().unwrap();
        let q = quote(&registry, &request("BR", "NMHT", "37123456", "1")).unwrap();
        assert_eq!(q.settlement.amount, Money::from_major_str("2.78").unwrap());
        assert!(q.settlement.clamped);
        // the customer is still charged for what they asked for
        assert_eq!(q.face, Money::from_major(1));
    }

    #[test]
    fn brl_fee_is_forty_percent() {
        let registry = OperatorRegistry::builtin().unwrap();
        let q = quote(&registry, &request("BR", "NMHT", "37123456", "10")).unwrap();
        assert_eq!(q.fee, Money::from_major(4));
        assert_eq!(q.total, Money::from_major(14));
        assert_eq!(q.origin_currency, Currency::brl());
    }

    #[test]
    fn foreign_currency_is_converted_to_settlement() {
        let registry = OperatorRegistry::builtin().unwrap();
        let q = quote(&registry, &request("US", "D7HT", "37123456", "10")).unwrap();
        assert_eq!(q.origin_currency.as_str(), "USD");
        assert_eq!(q.fee, Money::from_major_str("2.50").unwrap());
        assert_eq!(q.total, Money::from_major_str("12.50").unwrap());
        assert_eq!(q.settlement.amount, Money::from_major(52));
        assert_eq!(q.settlement.currency, Currency::brl());
    }

    #[test]
    fn amount_above_maximum_is_rejected() {
        let registry = OperatorRegistry::builtin().unwrap();
        let err = quote(&registry, &request("BR", "D8DO", "8095551234", "300.01")).unwrap_err();
        assert!(matches!(err, ValidationError::AmountOutOfRange { .. }));
    }

    #[test]
    fn non_positive_face_is_rejected() {
        let registry = OperatorRegistry::builtin().unwrap();
        let err = quote(&registry, &request("BR", "NMHT", "37123456", "0")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAmount(_)));
    }

    #[test]
    fn unknown_origin_country_is_rejected() {
        let registry = OperatorRegistry::builtin().unwrap();
        let err = quote(&registry, &request("ZZ", "NMHT", "37123456", "5")).unwrap_err();
        assert_eq!(err, ValidationError::UnknownCountry("ZZ".into()));
    }
}
