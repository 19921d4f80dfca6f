//! Canonical row persistence.
//!
//! Upsert-on-primary-key semantics: `(asset_id, time)` conflicts overwrite
//! the stored row, so re-ingesting a window is idempotent. Each call runs in
//! a single transaction; large batches are chunked to stay under Postgres's
//! bind-parameter limit, still inside that one transaction.

use sqlx::{PgPool, Postgres, QueryBuilder};

use super::schema_mapper::{MappedBatch, MarketDataRow, RateRow, ValueRow};

// 65535 binds max; market_data rows carry 7 binds each.
const CHUNK_ROWS: usize = 5000;

/// Persist a mapped batch, returning the number of rows written.
pub async fn upsert_batch(pool: &PgPool, batch: &MappedBatch) -> Result<u64, sqlx::Error> {
    if batch.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut written = 0u64;

    match batch {
        MappedBatch::MarketData(rows) => {
            for chunk in rows.chunks(CHUNK_ROWS) {
                written += upsert_market_data(&mut tx, chunk).await?;
            }
        }
        MappedBatch::ForexRates(rows) => {
            for chunk in rows.chunks(CHUNK_ROWS) {
                written += upsert_rates(&mut tx, "forex_rates", chunk).await?;
            }
        }
        MappedBatch::BondRates(rows) => {
            for chunk in rows.chunks(CHUNK_ROWS) {
                written += upsert_rates(&mut tx, "bond_rates", chunk).await?;
            }
        }
        MappedBatch::EconomicData(rows) => {
            for chunk in rows.chunks(CHUNK_ROWS) {
                written += upsert_values(&mut tx, chunk).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(written)
}

async fn upsert_market_data(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    rows: &[MarketDataRow],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO market_data (time, asset_id, open, high, low, close, volume) ");
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.time)
            .push_bind(row.asset_id)
            .push_bind(row.open)
            .push_bind(row.high)
            .push_bind(row.low)
            .push_bind(row.close)
            .push_bind(row.volume);
    });
    builder.push(
        " ON CONFLICT (asset_id, time) DO UPDATE SET \
         open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
         close = EXCLUDED.close, volume = EXCLUDED.volume",
    );

    let result = builder.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

async fn upsert_rates(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    table: &str,
    rows: &[RateRow],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO {table} (time, asset_id, rate) "));
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.time).push_bind(row.asset_id).push_bind(row.rate);
    });
    builder.push(" ON CONFLICT (asset_id, time) DO UPDATE SET rate = EXCLUDED.rate");

    let result = builder.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

async fn upsert_values(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    rows: &[ValueRow],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO economic_data (time, asset_id, value) ");
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.time)
            .push_bind(row.asset_id)
            .push_bind(row.value);
    });
    builder.push(" ON CONFLICT (asset_id, time) DO UPDATE SET value = EXCLUDED.value");

    let result = builder.build().execute(&mut **tx).await?;
    Ok(result.rows_affected())
}
