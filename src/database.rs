//! Database module for persisting gold quotes to PostgreSQL.
//!
//! Expected table:
//!
//! ```sql
//! CREATE TABLE gold_price (
//!     id              BIGINT PRIMARY KEY,  -- upstream quote id
//!     product_sku     TEXT NOT NULL DEFAULT '',
//!     demode          BOOLEAN NOT NULL DEFAULT FALSE,
//!     price_num       TEXT NOT NULL DEFAULT '',
//!     price           NUMERIC NOT NULL DEFAULT 0,
//!     yesterday_price NUMERIC NOT NULL DEFAULT 0,
//!     time            BIGINT NOT NULL DEFAULT 0   -- quote time, ms since epoch
//! );
//! ```

use bigdecimal::{BigDecimal, ToPrimitive};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Error, PgPool, Row};
use std::str::FromStr;

use crate::types::PriceSample;

/// Initialize the database connection pool.
///
/// Reads `DATABASE_URL` from environment variables.
/// Returns a connection pool that can be shared across tasks.
pub async fn init_pool() -> Result<PgPool, Error> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| Error::Configuration("DATABASE_URL must be set".into()))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    log::info!("database connection pool initialized");
    Ok(pool)
}

/// One upstream gold quote, as returned by the feed.
#[derive(Debug, Clone)]
pub struct GoldPriceRecord {
    pub id: i64,
    pub product_sku: String,
    pub demode: bool,
    pub price_num: String,
    pub price: f64,
    pub yesterday_price: f64,
    pub time: i64,
}

/// Insert a quote keyed by its upstream id.
///
/// The feed re-serves the same quote between refreshes; the primary key
/// plus `ON CONFLICT DO NOTHING` makes the insert once-only. Returns
/// whether a new row was written.
pub async fn insert_gold_price(pool: &PgPool, record: &GoldPriceRecord) -> Result<bool, Error> {
    let price_bd = BigDecimal::from_str(&format!("{:.8}", record.price)).unwrap_or_default();
    let yesterday_bd =
        BigDecimal::from_str(&format!("{:.8}", record.yesterday_price)).unwrap_or_default();

    let result = sqlx::query(
        r#"
        INSERT INTO gold_price (id, product_sku, demode, price_num, price, yesterday_price, time)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(record.id)
    .bind(&record.product_sku)
    .bind(record.demode)
    .bind(&record.price_num)
    .bind(&price_bd)
    .bind(&yesterday_bd)
    .bind(record.time)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch the most recent `limit` samples, newest first.
pub async fn latest_prices(pool: &PgPool, limit: i64) -> Result<Vec<PriceSample>, Error> {
    let rows = sqlx::query(
        r#"
        SELECT price, time FROM gold_price
        ORDER BY time DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let samples = rows
        .iter()
        .map(|row| {
            let price: BigDecimal = row.try_get("price")?;
            let time: i64 = row.try_get("time")?;
            Ok(PriceSample::new(
                price.to_f64().unwrap_or_default(),
                time.max(0) as u64,
            ))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(samples)
}
