//! PostgreSQL sink for probability history and alert history.
//!
//! The engine hands back plain records each tick; this module only writes
//! them. Write failures are reported to the caller, which logs and carries
//! on with the next tick.

use anyhow::Result;
use sqlx::PgPool;

use cloudburst_forecast::{AlertHistoryItem, ProbabilityPoint, SectorId};

// ---

/// Append one tick's worth of probability points in a single transaction.
pub async fn append_probability_points(
    pool: &PgPool,
    points: &[(SectorId, ProbabilityPoint)],
) -> Result<()> {
    // ---
    if points.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for (sector_id, point) in points {
        sqlx::query(
            r#"
            INSERT INTO sector_probability_history (sector_id, probability, recorded_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(sector_id)
        .bind(point.probability)
        .bind(point.timestamp)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!("Stored {} probability points", points.len());
    Ok(())
}

/// Insert a new alert or record its transition.
pub async fn upsert_alert(pool: &PgPool, alert: &AlertHistoryItem) -> Result<()> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO alert_history (
            id, sector_id, sector_name, severity, status,
            probability, raised_at, acknowledged_by, resolved_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            acknowledged_by = EXCLUDED.acknowledged_by,
            resolved_at = EXCLUDED.resolved_at
        "#,
    )
    .bind(alert.id)
    .bind(&alert.sector_id)
    .bind(&alert.sector_name)
    .bind(alert.severity.as_str())
    .bind(alert.status.as_str())
    .bind(alert.probability)
    .bind(alert.timestamp)
    .bind(&alert.acknowledged_by)
    .bind(alert.resolved_at)
    .execute(pool)
    .await?;

    Ok(())
}
