//! SQLite implementation of PlanStorage.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::domain::{Deal, DealBook, DealStatus, Order, OrderState, OrderStatus, OrderTable};
use crate::storage::{PlanStorage, StorageError};

/// SqliteStorage persists orders and deals using SQLite.
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

/// SqliteStorageConfig holds SQLite storage configuration.
#[derive(Debug, Clone)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: "eca-bot.db".to_string(),
            max_connections: 5,
        }
    }
}

impl SqliteStorage {
    /// Creates a new SQLite storage instance.
    pub async fn new(config: SqliteStorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let storage = Self { pool };

        storage.migrate().await?;

        info!(path = %config.path, "SQLite storage initialized");
        Ok(storage)
    }

    /// Runs database migrations to create the schema.
    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL,
                account TEXT NOT NULL,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                open_date TEXT NOT NULL,
                close_date TEXT,
                price TEXT,
                volume TEXT,
                volume_quote TEXT,
                fees TEXT,
                txid TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_bot_id ON orders(bot_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_txid ON orders(txid)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL,
                account TEXT NOT NULL,
                idx INTEGER NOT NULL,
                status TEXT NOT NULL,
                buy_orders TEXT NOT NULL,
                sell_orders TEXT NOT NULL,
                override_average_price TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_deals_bot_id ON deals(bot_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_order(&self, order: &Order) -> Result<(), StorageError> {
        // Executed and cancelled orders keep a reduced column set; the
        // live planning fields have no meaning once the order is closed.
        let (price, volume, volume_quote, fees) = match &order.state {
            OrderState::Planned {
                volume_quote,
                price,
                volume,
                fees,
            } => (
                price.map(|p| p.to_string()),
                volume.map(|v| v.to_string()),
                Some(volume_quote.to_string()),
                fees.map(|f| f.to_string()),
            ),
            OrderState::Pending {
                volume,
                price,
                volume_quote,
                ..
            } => (
                price.map(|p| p.to_string()),
                Some(volume.to_string()),
                volume_quote.map(|q| q.to_string()),
                None,
            ),
            OrderState::Executed {
                volume,
                volume_quote,
                ..
            } => (
                None,
                Some(volume.to_string()),
                volume_quote.map(|q| q.to_string()),
                None,
            ),
            OrderState::Cancelled { .. } => (None, None, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, bot_id, account, pair, side, type, status,
                open_date, close_date, price, volume, volume_quote, fees, txid
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                type = excluded.type,
                close_date = excluded.close_date,
                price = excluded.price,
                volume = excluded.volume,
                volume_quote = excluded.volume_quote,
                fees = excluded.fees,
                txid = excluded.txid
            "#,
        )
        .bind(&order.id)
        .bind(&order.bot_id)
        .bind(&order.account)
        .bind(&order.pair)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.status().to_string())
        .bind(order.open_date.to_rfc3339())
        .bind(order.close_date().map(|d| d.to_rfc3339()))
        .bind(price)
        .bind(volume)
        .bind(volume_quote)
        .bind(fees)
        .bind(order.txid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PlanStorage for SqliteStorage {
    async fn load_orders(&self) -> Result<OrderTable, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_id, account, pair, side, type, status,
                open_date, close_date, price, volume, volume_quote, fees, txid
            FROM orders
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut orders = OrderTable::new();
        for row in &rows {
            orders.insert(parse_order_row(row)?);
        }
        debug!(count = orders.len(), "loaded orders");
        Ok(orders)
    }

    async fn save_orders(&self, orders: &OrderTable) -> Result<(), StorageError> {
        for order in orders.iter() {
            self.save_order(order).await?;
        }
        Ok(())
    }

    async fn load_deals(&self) -> Result<DealBook, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_id, account, idx, status, buy_orders, sell_orders,
                override_average_price
            FROM deals
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut deals = DealBook::new();
        for row in &rows {
            deals.insert(parse_deal_row(row)?);
        }
        debug!(count = deals.len(), "loaded deals");
        Ok(deals)
    }

    async fn save_deals(&self, deals: &DealBook) -> Result<(), StorageError> {
        for deal in deals.iter() {
            sqlx::query(
                r#"
                INSERT INTO deals (
                    id, bot_id, account, idx, status, buy_orders, sell_orders,
                    override_average_price
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    buy_orders = excluded.buy_orders,
                    sell_orders = excluded.sell_orders,
                    override_average_price = excluded.override_average_price
                "#,
            )
            .bind(&deal.id)
            .bind(&deal.bot_id)
            .bind(&deal.account)
            .bind(deal.index as i64)
            .bind(deal.status.to_string())
            .bind(serde_json::to_string(&deal.buy_orders).unwrap_or_default())
            .bind(serde_json::to_string(&deal.sell_orders).unwrap_or_default())
            .bind(deal.override_average_price.map(|p| p.to_string()))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Parses an order from a database row, rebuilding the lifecycle stage
/// from the status column.
fn parse_order_row(row: &SqliteRow) -> Result<Order, StorageError> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = OrderStatus::from_str(&status_str).map_err(StorageError::InvalidData)?;

    let side_str: String = row.try_get("side")?;
    let side = match side_str.as_str() {
        "buy" => crate::domain::OrderSide::Buy,
        "sell" => crate::domain::OrderSide::Sell,
        other => {
            return Err(StorageError::InvalidData(format!(
                "unknown side: {}",
                other
            )))
        }
    };

    let type_str: String = row.try_get("type")?;
    let order_type = match type_str.as_str() {
        "market" => crate::domain::OrderType::Market,
        "limit" => crate::domain::OrderType::Limit,
        other => {
            return Err(StorageError::InvalidData(format!(
                "unknown order type: {}",
                other
            )))
        }
    };

    let open_date = required_date(row, "open_date")?;
    let close_date = optional_date(row, "close_date")?;
    let price = optional_decimal(row, "price")?;
    let volume = optional_decimal(row, "volume")?;
    let volume_quote = optional_decimal(row, "volume_quote")?;
    let fees = optional_decimal(row, "fees")?;
    let txid: Option<String> = row.try_get("txid")?;

    let state = match status {
        OrderStatus::Planned => OrderState::Planned {
            volume_quote: volume_quote.ok_or_else(|| {
                StorageError::InvalidData(format!("planned order {} without volume_quote", id))
            })?,
            price,
            volume,
            fees,
        },
        OrderStatus::Pending => OrderState::Pending {
            txid: txid.ok_or_else(|| {
                StorageError::InvalidData(format!("pending order {} without txid", id))
            })?,
            volume: volume.ok_or_else(|| {
                StorageError::InvalidData(format!("pending order {} without volume", id))
            })?,
            price,
            volume_quote,
        },
        OrderStatus::Executed => OrderState::Executed {
            txid: txid.ok_or_else(|| {
                StorageError::InvalidData(format!("executed order {} without txid", id))
            })?,
            volume: volume.ok_or_else(|| {
                StorageError::InvalidData(format!("executed order {} without volume", id))
            })?,
            volume_quote,
            close_date: close_date.ok_or_else(|| {
                StorageError::InvalidData(format!("executed order {} without close_date", id))
            })?,
        },
        OrderStatus::Cancelled => OrderState::Cancelled { txid, close_date },
    };

    Ok(Order {
        id,
        bot_id: row.try_get("bot_id")?,
        account: row.try_get("account")?,
        pair: row.try_get("pair")?,
        side,
        order_type,
        open_date,
        state,
    })
}

/// Parses a deal from a database row.
fn parse_deal_row(row: &SqliteRow) -> Result<Deal, StorageError> {
    let status_str: String = row.try_get("status")?;
    let status = DealStatus::from_str(&status_str).map_err(StorageError::InvalidData)?;

    let buy_orders_str: String = row.try_get("buy_orders")?;
    let buy_orders: Vec<String> = serde_json::from_str(&buy_orders_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid buy_orders: {}", e)))?;

    let sell_orders_str: String = row.try_get("sell_orders")?;
    let sell_orders: Vec<String> = serde_json::from_str(&sell_orders_str)
        .map_err(|e| StorageError::InvalidData(format!("invalid sell_orders: {}", e)))?;

    let idx: i64 = row.try_get("idx")?;

    let override_str: Option<String> = row.try_get("override_average_price")?;
    let override_average_price = override_str
        .map(|s| {
            Decimal::from_str(&s).map_err(|e| {
                StorageError::InvalidData(format!("invalid override_average_price: {}", e))
            })
        })
        .transpose()?;

    Ok(Deal {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        account: row.try_get("account")?,
        index: idx as u32,
        buy_orders,
        sell_orders,
        status,
        override_average_price,
    })
}

fn optional_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, StorageError> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| {
            Decimal::from_str(&s)
                .map_err(|e| StorageError::InvalidData(format!("invalid {}: {}", column, e)))
        })
        .transpose()
}

fn optional_date(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| StorageError::InvalidData(format!("invalid {}: {}", column, e)))
        })
        .transpose()
}

fn required_date(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StorageError> {
    optional_date(row, column)?
        .ok_or_else(|| StorageError::InvalidData(format!("missing {}", column)))
}
