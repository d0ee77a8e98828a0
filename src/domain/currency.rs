//! Fiat currency of the Bitstamp leg.

use serde::{Deserialize, Serialize};
use std::fmt;

/// FiatCurrency is the currency sold for BTC on the Bitstamp leg.
///
/// The ZAR leg is always ZAR; Bitstamp quotes BTC against both of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiatCurrency {
    /// US dollar.
    Usd,
    /// Euro.
    Eur,
}

impl FiatCurrency {
    /// Lowercase code as used in Bitstamp pair names ("usd", "eur").
    pub fn as_str(&self) -> &'static str {
        match self {
            FiatCurrency::Usd => "usd",
            FiatCurrency::Eur => "eur",
        }
    }

    /// Uppercase ISO code ("USD", "EUR").
    pub fn code(&self) -> &'static str {
        match self {
            FiatCurrency::Usd => "USD",
            FiatCurrency::Eur => "EUR",
        }
    }

    /// Currency symbol for human-readable messages.
    pub fn symbol(&self) -> char {
        match self {
            FiatCurrency::Usd => '$',
            FiatCurrency::Eur => '€',
        }
    }
}

impl fmt::Display for FiatCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
