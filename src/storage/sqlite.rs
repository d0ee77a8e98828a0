//! SQLite implementation of TradeRecordStore.

use crate::domain::FiatCurrency;
use crate::storage::{StorageError, TradeRecord, TradeRecordStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 5;

/// SqliteTradeStore implements TradeRecordStore using SQLite.
pub struct SqliteTradeStore {
    pool: Pool<Sqlite>,
}

impl SqliteTradeStore {
    /// Opens (creating if missing) the database at the given path.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        info!(%path, "SQLite trade store initialized");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                total_zar TEXT NOT NULL,
                total_fiat TEXT NOT NULL,
                fiat_currency TEXT NOT NULL,
                window_start TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                zar_order_ids TEXT NOT NULL,
                fiat_order_ids TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trades_completed_at ON trades(completed_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Record identity: account plus completion time, hashed. Saving the same
/// completed run twice is a no-op.
fn record_id(record: &TradeRecord) -> String {
    let data = format!("{}|{}", record.account, record.completed_at.to_rfc3339());

    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..16])
}

#[async_trait]
impl TradeRecordStore for SqliteTradeStore {
    async fn save(&self, record: &TradeRecord) -> Result<bool, StorageError> {
        let id = record_id(record);

        let zar_ids = serde_json::to_string(&record.zar_order_ids)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let fiat_ids = serde_json::to_string(&record.fiat_order_ids)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                id, account, total_zar, total_fiat, fiat_currency,
                window_start, completed_at, zar_order_ids, fiat_order_ids
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&record.account)
        .bind(record.total_zar.to_string())
        .bind(record.total_fiat.to_string())
        .bind(record.fiat_currency.as_str())
        .bind(record.window_start.to_rfc3339())
        .bind(record.completed_at.to_rfc3339())
        .bind(&zar_ids)
        .bind(&fiat_ids)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(%id, account = %record.account, "trade record saved");
        }
        Ok(inserted)
    }

    async fn get_by_account(&self, account: &str) -> Result<Vec<TradeRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT account, total_zar, total_fiat, fiat_currency,
                window_start, completed_at, zar_order_ids, fiat_order_ids
            FROM trades WHERE account = ? ORDER BY completed_at DESC
            "#,
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_trade_row).collect()
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

fn parse_trade_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRecord, StorageError> {
    let total_zar_str: String = row.try_get("total_zar")?;
    let total_zar = Decimal::from_str(&total_zar_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid total_zar: {}", e)))?;

    let total_fiat_str: String = row.try_get("total_fiat")?;
    let total_fiat = Decimal::from_str(&total_fiat_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid total_fiat: {}", e)))?;

    let currency_str: String = row.try_get("fiat_currency")?;
    let fiat_currency = match currency_str.as_str() {
        "usd" => FiatCurrency::Usd,
        "eur" => FiatCurrency::Eur,
        other => {
            return Err(StorageError::InvalidData(format!(
                "unknown fiat currency '{}'",
                other
            )))
        }
    };

    let window_start_str: String = row.try_get("window_start")?;
    let window_start = DateTime::parse_from_rfc3339(&window_start_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid window_start: {}", e)))?
        .with_timezone(&Utc);

    let completed_at_str: String = row.try_get("completed_at")?;
    let completed_at = DateTime::parse_from_rfc3339(&completed_at_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid completed_at: {}", e)))?
        .with_timezone(&Utc);

    let zar_ids_str: String = row.try_get("zar_order_ids")?;
    let zar_order_ids: Vec<String> = serde_json::from_str(&zar_ids_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid zar_order_ids: {}", e)))?;

    let fiat_ids_str: String = row.try_get("fiat_order_ids")?;
    let fiat_order_ids: Vec<String> = serde_json::from_str(&fiat_ids_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid fiat_order_ids: {}", e)))?;

    Ok(TradeRecord {
        account: row.try_get("account")?,
        total_zar,
        total_fiat,
        fiat_currency,
        window_start,
        completed_at,
        zar_order_ids,
        fiat_order_ids,
    })
}
