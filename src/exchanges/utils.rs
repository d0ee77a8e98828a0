//! Common utilities for exchange implementations.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::exchanges::{ExchangeError, Result};

/// Parses a decimal from a wire string.
pub fn parse_decimal(value: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| ExchangeError::Api(format!("parse {} '{}': {}", field, value, e)))
}

/// Parses a price that every downstream computation divides by.
pub fn parse_positive_price(value: &str, field: &str) -> Result<Decimal> {
    let price = parse_decimal(value, field)?;
    if price <= Decimal::ZERO {
        return Err(ExchangeError::Api(format!(
            "non-positive {}: {}",
            field, price
        )));
    }
    Ok(price)
}

/// Extracts a decimal from a JSON value that may be a number or a string.
/// Bitstamp mixes both in the same response family.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}
