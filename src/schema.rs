//! Database schema management for `cloudburst-forecast`.
//!
//! Ensures the history tables exist before the first tick writes to them.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sector_probability_history` for per-tick probability points and
/// `alert_history` for raised alerts and their transitions. Safe to call on
/// every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Append-only probability history; the API serves the in-memory copy
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector_probability_history (
            id           BIGSERIAL PRIMARY KEY,
            sector_id    TEXT             NOT NULL,
            probability  DOUBLE PRECISION NOT NULL,
            recorded_at  TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per alert; transitions update status in place
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_history (
            id               UUID PRIMARY KEY,
            sector_id        TEXT             NOT NULL,
            sector_name      TEXT             NOT NULL,
            severity         TEXT             NOT NULL,
            status           TEXT             NOT NULL,
            probability      DOUBLE PRECISION NOT NULL,
            raised_at        TIMESTAMPTZ      NOT NULL,
            acknowledged_by  TEXT,
            resolved_at      TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_probability_history_sector
            ON sector_probability_history (sector_id, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alert_history_sector
            ON alert_history (sector_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
