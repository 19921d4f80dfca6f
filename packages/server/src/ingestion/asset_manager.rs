//! Asset resolution.
//!
//! Assets are created on first reference by any job and never deleted.
//! `(symbol, asset_type)` is unique; re-resolving merges metadata.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

#[derive(FromRow, Debug, Clone, serde::Serialize)]
pub struct Asset {
    pub asset_id: i64,
    pub symbol: String,
    pub asset_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Idempotently resolve `(symbol, asset_type)` to an asset id, creating
    /// the asset on first sight.
    ///
    /// Metadata is merged on re-resolution: new keys are added, existing
    /// keys overwritten (JSONB `||`).
    pub async fn get_or_create(
        pool: &PgPool,
        symbol: &str,
        asset_type: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Asset, sqlx::Error> {
        let metadata = metadata.cloned().unwrap_or_else(|| serde_json::json!({}));

        sqlx::query_as::<_, Asset>(
            r#"
            INSERT INTO assets (symbol, asset_type, metadata)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol, asset_type) DO UPDATE SET
                metadata = assets.metadata || EXCLUDED.metadata
            RETURNING asset_id, symbol, asset_type, metadata, created_at
            "#,
        )
        .bind(symbol)
        .bind(asset_type)
        .bind(metadata)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, asset_id: i64) -> Result<Option<Asset>, sqlx::Error> {
        sqlx::query_as::<_, Asset>(
            r#"
            SELECT asset_id, symbol, asset_type, metadata, created_at
            FROM assets
            WHERE asset_id = $1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(pool)
        .await
    }
}
