//! Persistence of completed trade records.

mod sqlite;

pub use sqlite::SqliteTradeStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::FiatCurrency;

/// TradeRecord is the durable summary of one completed trade run.
///
/// The window bounds the period the traded fiat was likely acquired in,
/// so reporting can pick a representative exchange rate.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    /// Account label the trade ran under.
    pub account: String,
    /// Total ZAR the trade realized on the ZAR leg.
    pub total_zar: Decimal,
    /// Total fiat spent on the fiat leg.
    pub total_fiat: Decimal,
    /// Currency of the fiat leg.
    pub fiat_currency: FiatCurrency,
    /// Start of the fiat acquisition window.
    pub window_start: DateTime<Utc>,
    /// When the trade completed.
    pub completed_at: DateTime<Utc>,
    /// Every sell order placed on the ZAR leg, in placement order.
    pub zar_order_ids: Vec<String>,
    /// Every matching buy placed on the fiat leg, in placement order.
    pub fiat_order_ids: Vec<String>,
}

/// TradeRecordStore persists completed trade records.
#[async_trait]
pub trait TradeRecordStore: Send + Sync {
    /// Saves a record. Returns true when the record was new.
    async fn save(&self, record: &TradeRecord) -> Result<bool, StorageError>;

    /// Retrieves all records for an account, most recent first.
    async fn get_by_account(&self, account: &str) -> Result<Vec<TradeRecord>, StorageError>;

    /// Closes the storage connection.
    async fn close(&self) -> Result<(), StorageError>;
}

/// StorageError represents errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
