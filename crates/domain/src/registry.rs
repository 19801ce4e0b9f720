//! Typed operator and currency configuration.
//!
//! Everything pricing and destination validation needs lives here: which
//! currency each origin country pays in, exchange rates, service fees,
//! phone-number rules per destination country, the operators the top-up
//! provider can deliver to and the number prefixes that identify them. The registry is validated once when it
//! is built; a missing rate or fee is a load error, never a silent default.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Currency, Money, RegistryError, ValidationError};

/// A mobile operator reachable through the top-up provider.
///
/// `min_amount` and `max_amount` are in the settlement currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub country: String,
    pub provider_code: u32,
    pub min_amount: Money,
    pub max_amount: Money,
}

/// Service fee charged on top of the face value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeRule {
    /// A flat amount in the origin currency.
    Fixed { amount: Money },
    /// A fraction of the face value, e.g. `0.40` for forty percent.
    Percentage { rate: Decimal },
}

impl FeeRule {
    pub fn fee_for(&self, face: Money) -> Result<Money, ValidationError> {
        match self {
            FeeRule::Fixed { amount } => Ok(*amount),
            FeeRule::Percentage { rate } => face
                .to_decimal()
                .checked_mul(*rate)
                .ok_or_else(|| ValidationError::InvalidAmount(format!("{face} * {rate}")))
                .and_then(Money::from_decimal),
        }
    }
}

/// Maps national numbers starting with `prefix` to an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRule {
    pub country: String,
    pub prefix: String,
    pub operator_id: String,
}

/// Serializable form of the registry, as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub settlement_currency: String,
    /// Origin country code to the currency customers there are charged in.
    pub country_currencies: BTreeMap<String, String>,
    /// Destination country code to the exact number of national digits.
    pub phone_digits: BTreeMap<String, usize>,
    /// Units of each currency per one US dollar.
    pub usd_rates: BTreeMap<String, Decimal>,
    pub fees: BTreeMap<String, FeeRule>,
    pub operators: Vec<Operator>,
    #[serde(default)]
    pub prefixes: Vec<PrefixRule>,
}

impl RegistryConfig {
    /// The operators and tables the service ships with.
    pub fn builtin() -> Self {
        let countries = [
            ("BR", "BRL"),
            ("CL", "CLP"),
            ("FR", "EUR"),
            ("DE", "EUR"),
            ("ES", "EUR"),
            ("IT", "EUR"),
            ("PT", "EUR"),
            ("MX", "MXN"),
            ("CA", "CAD"),
            ("US", "USD"),
            ("EC", "USD"),
            ("AR", "ARS"),
            ("CO", "COP"),
            ("PE", "PEN"),
            ("UY", "UYU"),
            ("DO", "DOP"),
            ("GB", "GBP"),
            ("CH", "CHF"),
        ];
        // (code, units per USD as (mantissa, scale))
        let rates = [
            ("BRL", 520, 2),
            ("CLP", 950, 0),
            ("EUR", 92, 2),
            ("MXN", 1750, 2),
            ("CAD", 135, 2),
            ("USD", 1, 0),
            ("ARS", 350, 0),
            ("COP", 4200, 0),
            ("PEN", 375, 2),
            ("UYU", 39, 0),
            ("DOP", 56, 0),
            ("GBP", 79, 2),
            ("CHF", 88, 2),
        ];

        let fees = rates
            .iter()
            .map(|(code, _, _)| {
                let rule = match *code {
                    "BRL" => FeeRule::Percentage {
                        rate: Decimal::new(40, 2),
                    },
                    "CLP" => FeeRule::Fixed {
                        amount: Money::from_minor(1050),
                    },
                    _ => FeeRule::Fixed {
                        amount: Money::from_minor(250),
                    },
                };
                (code.to_string(), rule)
            })
            .collect();

        let operator = |id: &str, name: &str, country: &str, code: u32, min: i64, max: i64| {
            Operator {
                id: id.to_string(),
                name: name.to_string(),
                country: country.to_string(),
                provider_code: code,
                min_amount: Money::from_minor(min),
                max_amount: Money::from_minor(max),
            }
        };

        let prefixes = [
            ("HT", "D7HT", &["28", "30", "31", "34", "36", "37", "38", "39", "46", "47", "48"][..]),
            ("HT", "NMHT", &["22", "25", "32", "33", "40", "41", "42", "43"][..]),
            // area codes are shared on DO; Claro is the default carrier
            ("DO", "D8DO", &["809", "829", "849"][..]),
        ]
        .iter()
        .flat_map(|(country, operator_id, prefixes)| {
            prefixes.iter().map(move |prefix| PrefixRule {
                country: country.to_string(),
                prefix: prefix.to_string(),
                operator_id: operator_id.to_string(),
            })
        })
        .collect();

        Self {
            settlement_currency: "BRL".to_string(),
            country_currencies: countries
                .iter()
                .map(|(c, cur)| (c.to_string(), cur.to_string()))
                .collect(),
            phone_digits: [("HT".to_string(), 8), ("DO".to_string(), 10)].into(),
            usd_rates: rates
                .iter()
                .map(|(code, m, s)| (code.to_string(), Decimal::new(*m, *s)))
                .collect(),
            fees,
            operators: vec![
                operator("D7HT", "Digicel Haiti", "HT", 173, 445, 27800),
                operator("NMHT", "Natcom Haiti", "HT", 174, 278, 55253),
                operator("D8DO", "Claro Dominican Republic", "DO", 611, 500, 30000),
                operator("ORDO", "Altice Dominican Republic", "DO", 612, 500, 30000),
                operator("VVDO", "Viva Dominican Republic", "DO", 613, 500, 30000),
            ],
            prefixes,
        }
    }
}

/// A validated destination: the operator plus the digits to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination<'a> {
    pub operator: &'a Operator,
    pub phone_digits: String,
}

/// Validated, read-only lookup tables.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    settlement_currency: Currency,
    country_currencies: HashMap<String, Currency>,
    phone_digits: HashMap<String, usize>,
    usd_rates: HashMap<Currency, Decimal>,
    fees: HashMap<Currency, FeeRule>,
    operators: HashMap<String, Operator>,
    /// Destination country to (prefix, operator id), longest prefix first.
    prefixes: HashMap<String, Vec<(String, String)>>,
}

fn invalid(entry: impl Into<String>, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidEntry {
        entry: entry.into(),
        reason: reason.into(),
    }
}

fn parse_currency(code: &str) -> Result<Currency, RegistryError> {
    Currency::new(code).map_err(|e| invalid(code, e.to_string()))
}

impl OperatorRegistry {
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_config(RegistryConfig::builtin())
    }

    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        Self::from_config(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Validates `config` and builds the lookup tables.
    pub fn from_config(config: RegistryConfig) -> Result<Self, RegistryError> {
        let mut usd_rates = HashMap::new();
        for (code, rate) in &config.usd_rates {
            if *rate <= Decimal::ZERO {
                return Err(invalid(code, "exchange rate must be positive"));
            }
            usd_rates.insert(parse_currency(code)?, *rate);
        }

        let mut fees = HashMap::new();
        for (code, rule) in config.fees {
            match &rule {
                FeeRule::Fixed { amount } if amount.minor() < 0 => {
                    return Err(invalid(&code, "fee must not be negative"));
                }
                FeeRule::Percentage { rate } if *rate < Decimal::ZERO => {
                    return Err(invalid(&code, "fee rate must not be negative"));
                }
                _ => {}
            }
            fees.insert(parse_currency(&code)?, rule);
        }

        let settlement_currency = parse_currency(&config.settlement_currency)?;
        if !usd_rates.contains_key(&settlement_currency) {
            return Err(RegistryError::MissingRate(settlement_currency.to_string()));
        }

        let mut country_currencies = HashMap::new();
        for (country, code) in config.country_currencies {
            let currency = parse_currency(&code)?;
            if !usd_rates.contains_key(&currency) {
                return Err(RegistryError::MissingRate(code));
            }
            if !fees.contains_key(&currency) {
                return Err(RegistryError::MissingFee(code));
            }
            country_currencies.insert(country, currency);
        }

        let mut operators = HashMap::new();
        for op in config.operators {
            if !config.phone_digits.contains_key(&op.country) {
                return Err(RegistryError::MissingPhoneRule(op.country));
            }
            if !op.min_amount.is_positive() || op.min_amount > op.max_amount {
                return Err(invalid(&op.id, "amount range must be positive and ordered"));
            }
            if operators.contains_key(&op.id) {
                return Err(RegistryError::DuplicateOperator(op.id));
            }
            operators.insert(op.id.clone(), op);
        }

        let mut prefixes: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for rule in config.prefixes {
            let entry = format!("{}:{}", rule.country, rule.prefix);
            let Some(op) = operators.get(&rule.operator_id) else {
                return Err(invalid(entry, format!("unknown operator {}", rule.operator_id)));
            };
            if op.country != rule.country {
                return Err(invalid(entry, format!("operator {} serves {}", op.id, op.country)));
            }
            let digits = config.phone_digits.get(&rule.country).copied().unwrap_or(0);
            if rule.prefix.is_empty()
                || rule.prefix.len() >= digits
                || !rule.prefix.chars().all(|c| c.is_ascii_digit())
            {
                return Err(invalid(entry, "prefix must be digits shorter than a national number"));
            }
            let rules = prefixes.entry(rule.country).or_default();
            if rules.iter().any(|(p, _)| *p == rule.prefix) {
                return Err(invalid(entry, "prefix is mapped twice"));
            }
            rules.push((rule.prefix, rule.operator_id));
        }
        for rules in prefixes.values_mut() {
            rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        }

        tracing::debug!(
            operators = operators.len(),
            countries = country_currencies.len(),
            settlement = %settlement_currency,
            "Operator registry loaded"
        );

        Ok(Self {
            settlement_currency,
            country_currencies,
            phone_digits: config.phone_digits.into_iter().collect(),
            usd_rates,
            fees,
            operators,
            prefixes,
        })
    }

    /// The single currency the top-up provider is paid in.
    pub fn settlement_currency(&self) -> &Currency {
        &self.settlement_currency
    }

    pub fn operator(&self, id: &str) -> Result<&Operator, ValidationError> {
        self.operators
            .get(id)
            .ok_or_else(|| ValidationError::UnknownOperator(id.to_string()))
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values()
    }

    /// Operators serving `country` (all of them if None), ordered by id.
    pub fn catalog(&self, country: Option<&str>) -> Vec<&Operator> {
        let mut operators: Vec<_> = self
            .operators()
            .filter(|op| country.is_none_or(|c| op.country.eq_ignore_ascii_case(c)))
            .collect();
        operators.sort_by(|a, b| a.id.cmp(&b.id));
        operators
    }

    /// Guesses the operator of a national number from its prefix.
    ///
    /// The number must have the digit count of `country`. Returns None when
    /// no prefix matches.
    pub fn detect_operator(
        &self,
        country: &str,
        phone: &str,
    ) -> Result<Option<&Operator>, ValidationError> {
        let country = country.to_ascii_uppercase();
        let expected = self
            .phone_digits
            .get(&country)
            .copied()
            .ok_or_else(|| ValidationError::UnknownCountry(country.clone()))?;
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != expected {
            return Err(ValidationError::InvalidPhone {
                phone: phone.to_string(),
                country,
                expected,
                actual: digits.len(),
            });
        }

        let found = self
            .prefixes
            .get(&country)
            .and_then(|rules| rules.iter().find(|(prefix, _)| digits.starts_with(prefix.as_str())))
            .and_then(|(_, operator_id)| self.operators.get(operator_id));
        Ok(found)
    }

    pub fn currency_for_country(&self, country: &str) -> Result<&Currency, ValidationError> {
        self.country_currencies
            .get(&country.to_ascii_uppercase())
            .ok_or_else(|| ValidationError::UnknownCountry(country.to_string()))
    }

    pub fn usd_rate(&self, currency: &Currency) -> Option<Decimal> {
        self.usd_rates.get(currency).copied()
    }

    pub fn fee_rule(&self, currency: &Currency) -> Option<&FeeRule> {
        self.fees.get(currency)
    }

    /// Resolves the operator and strips the phone number down to the digits
    /// the provider expects, checking their count for the destination country.
    pub fn validate_destination(
        &self,
        phone: &str,
        operator_id: &str,
    ) -> Result<Destination<'_>, ValidationError> {
        let operator = self.operator(operator_id)?;
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        let expected = self
            .phone_digits
            .get(&operator.country)
            .copied()
            .ok_or_else(|| ValidationError::UnknownCountry(operator.country.clone()))?;

        if digits.len() != expected {
            return Err(ValidationError::InvalidPhone {
                phone: phone.to_string(),
                country: operator.country.clone(),
                expected,
                actual: digits.len(),
            });
        }

        Ok(Destination {
            operator,
            phone_digits: digits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = OperatorRegistry::builtin().unwrap();
        assert_eq!(registry.settlement_currency(), &Currency::brl());
        assert_eq!(registry.operator("NMHT").unwrap().provider_code, 174);
        assert_eq!(registry.operators().count(), 5);
        assert_eq!(registry.currency_for_country("br").unwrap(), &Currency::brl());
    }

    #[test]
    fn unknown_operator_is_a_validation_error() {
        let registry = OperatorRegistry::builtin().unwrap();
        assert_eq!(
            registry.operator("XXHT").unwrap_err(),
            ValidationError::UnknownOperator("XXHT".into())
        );
    }

    #[test]
    fn destination_strips_formatting_and_checks_length() {
        let registry = OperatorRegistry::builtin().unwrap();
        let dest = registry.validate_destination("3712-3456", "NMHT").unwrap();
        assert_eq!(dest.phone_digits, "37123456");

        let dest = registry.validate_destination("(809) 555-1234", "D8DO").unwrap();
        assert_eq!(dest.phone_digits, "8095551234");

        let err = registry.validate_destination("509 3712 3456", "D7HT").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidPhone { expected: 8, actual: 11, .. }
        ));
    }

    #[test]
    fn missing_fee_fails_fast() {
        let mut config = RegistryConfig::builtin();
        config.fees.remove("MXN");
        assert!(matches!(
            OperatorRegistry::from_config(config),
            Err(RegistryError::MissingFee(code)) if code == "MXN"
        ));
    }

    #[test]
    fn missing_rate_fails_fast() {
        let mut config = RegistryConfig::builtin();
        config.usd_rates.remove("BRL");
        assert!(matches!(
            OperatorRegistry::from_config(config),
            Err(RegistryError::MissingRate(_))
        ));
    }

    #[test]
    fn operator_without_phone_rule_is_rejected() {
        let mut config = RegistryConfig::builtin();
        config.operators[0].country = "JM".into();
        assert!(matches!(
            OperatorRegistry::from_config(config),
            Err(RegistryError::MissingPhoneRule(c)) if c == "JM"
        ));
    }

    #[test]
    fn duplicate_operator_is_rejected() {
        let mut config = RegistryConfig::builtin();
        let dup = config.operators[1].clone();
        config.operators.push(dup);
        assert!(matches!(
            OperatorRegistry::from_config(config),
            Err(RegistryError::DuplicateOperator(id)) if id == "NMHT"
        ));
    }

    #[test]
    fn registry_round_trips_through_json() {
        let json = serde_json::to_string(&RegistryConfig::builtin()).unwrap();
        let registry = OperatorRegistry::from_json_str(&json).unwrap();
        assert_eq!(
            registry.fee_rule(&Currency::brl()),
            Some(&FeeRule::Percentage {
                rate: Decimal::new(40, 2)
            })
        );
    }

    #[test]
    fn operator_is_detected_from_prefix() {
        let registry = OperatorRegistry::builtin().unwrap();
        let detect = |country, phone| {
            registry
                .detect_operator(country, phone)
                .unwrap()
                .map(|op| op.id.as_str())
        };

        assert_eq!(detect("HT", "3712-3456"), Some("D7HT"));
        assert_eq!(detect("ht", "4012 3456"), Some("NMHT"));
        assert_eq!(detect("DO", "(829) 555-1234"), Some("D8DO"));
        assert_eq!(detect("HT", "99123456"), None);
        assert!(matches!(
            registry.detect_operator("HT", "3712"),
            Err(ValidationError::InvalidPhone { expected: 8, actual: 4, .. })
        ));
        assert!(matches!(
            registry.detect_operator("JM", "8761234567"),
            Err(ValidationError::UnknownCountry(_))
        ));
    }

    #[test]
    fn longest_prefix_wins() {
        let mut config = RegistryConfig::builtin();
        config.prefixes.push(PrefixRule {
            country: "HT".into(),
            prefix: "371".into(),
            operator_id: "NMHT".into(),
        });
        let registry = OperatorRegistry::from_config(config).unwrap();

        let found = registry.detect_operator("HT", "37123456").unwrap().unwrap();
        assert_eq!(found.id, "NMHT");
        let found = registry.detect_operator("HT", "37923456").unwrap().unwrap();
        assert_eq!(found.id, "D7HT");
    }

    #[test]
    fn bad_prefix_rules_fail_fast() {
        let rule = |country: &str, prefix: &str, operator_id: &str| PrefixRule {
            country: country.into(),
            prefix: prefix.into(),
            operator_id: operator_id.into(),
        };
        for bad in [
            rule("HT", "37", "XXHT"),
            rule("HT", "50", "D8DO"),
            rule("HT", "3x", "D7HT"),
            rule("HT", "37123456", "D7HT"),
            rule("HT", "37", "NMHT"),
        ] {
            let mut config = RegistryConfig::builtin();
            config.prefixes.push(bad.clone());
            assert!(
                matches!(
                    OperatorRegistry::from_config(config),
                    Err(RegistryError::InvalidEntry { .. })
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn catalog_filters_by_country_and_sorts() {
        let registry = OperatorRegistry::builtin().unwrap();
        let ids: Vec<_> = registry.catalog(Some("ht")).iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["D7HT", "NMHT"]);
        assert_eq!(registry.catalog(None).len(), 5);
        assert!(registry.catalog(Some("JM")).is_empty());
    }

    #[test]
    fn percentage_fee_rounds_to_cents() {
        let rule = FeeRule::Percentage {
            rate: Decimal::new(40, 2),
        };
        assert_eq!(rule.fee_for(Money::from_minor(1234)).unwrap(), Money::from_minor(494));
    }

    #[test]
    fn percentage_fee_overflow_is_invalid_amount() {
        let rule = FeeRule::Percentage { rate: Decimal::MAX };
        assert!(matches!(
            rule.fee_for(Money::from_minor(i64::MAX)),
            Err(ValidationError::InvalidAmount(_))
        ));
    }
}
