//! Fiat to ZAR exchange-rate source.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::config::{ExecutionConfig, FixerConfig};
use crate::domain::FiatCurrency;
use crate::exchanges::{ExchangeError, Result, RetryPolicy};

/// fixer.io HTTP API endpoint.
const BASE_URL: &str = "https://data.fixer.io/api";

/// RateSource supplies the fiat to ZAR rate for a snapshot refresh.
///
/// A configured fixed rate short-circuits this entirely; the source is
/// only consulted when no override is set.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current ZAR per one unit of the given fiat currency.
    async fn zar_rate(&self, currency: FiatCurrency) -> Result<Decimal>;
}

/// fixer.io rate client.
pub struct FixerClient {
    http: HttpClient,
    api_key: String,
    retry: RetryPolicy,
}

impl FixerClient {
    /// Creates a new fixer.io client.
    pub fn new(config: &FixerConfig, execution: &ExecutionConfig) -> Self {
        let http = HttpClient::builder()
            .timeout(execution.timeout)
            .build()
            .expect("failed to build http client");

        Self {
            http,
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from_config(&execution.retry),
        }
    }

    async fn fetch_rate(&self, currency: FiatCurrency) -> Result<Decimal> {
        let url = format!(
            "{}/latest?access_key={}&format=1&base={}&symbols=ZAR",
            BASE_URL,
            urlencoding::encode(&self.api_key),
            currency.code()
        );

        let response = self.http.get(&url).send().await?;
        let resp: LatestResponse = response.json().await?;

        if !resp.success {
            let error = resp
                .error
                .map(|e| format!("{} {}", e.code, e.info.unwrap_or_default()))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ExchangeError::Api(format!("fixer error: {}", error)));
        }

        let rate = resp
            .rates
            .get("ZAR")
            .copied()
            .ok_or_else(|| ExchangeError::Api("fixer response missing ZAR rate".to_string()))?;
        if rate <= Decimal::ZERO {
            return Err(ExchangeError::Api(format!(
                "fixer returned non-positive ZAR rate: {}",
                rate
            )));
        }

        debug!(%currency, %rate, "fetched fiat rate");
        Ok(rate)
    }
}

#[async_trait]
impl RateSource for FixerClient {
    async fn zar_rate(&self, currency: FiatCurrency) -> Result<Decimal> {
        self.retry.run(|| self.fetch_rate(currency)).await
    }
}

/// FixedRate always answers with the configured rate. Used when the
/// trade runs against a fixed fiat rate and no live source is set up.
pub struct FixedRate(pub Decimal);

#[async_trait]
impl RateSource for FixedRate {
    async fn zar_rate(&self, _currency: FiatCurrency) -> Result<Decimal> {
        Ok(self.0)
    }
}

/// fixer.io latest-rates response.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    rates: HashMap<String, Decimal>,
    error: Option<FixerError>,
}

#[derive(Debug, Deserialize)]
struct FixerError {
    code: i64,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    error_type: Option<String>,
    info: Option<String>,
}
