use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::model::{Device, EnergyLimit, Notification, Reading};
use crate::window::Window;

/// Device ownership and per-user limit configuration.
pub trait Registry {
    async fn devices_owned_by(&self, user_id: Uuid) -> Result<Vec<Device>>;
    async fn limit_of(&self, user_id: Uuid) -> Result<EnergyLimit>;
    async fn set_limits(&self, user_id: Uuid, limits: EnergyLimit) -> Result<EnergyLimit>;
}

/// Durable reading log, queryable by device set and time range.
pub trait TelemetryStore {
    async fn readings_for(&self, device_ids: &[String], window: Option<Window>)
        -> Result<Vec<Reading>>;
}

/// Append-only per-user notification history.
///
/// `append` must be atomic: concurrent usage checks for the same user may
/// both append (duplicates are accepted) but entries are never lost or
/// partially written.
pub trait NotificationLedger {
    async fn append(&self, user_id: Uuid, notifications: &[Notification]) -> Result<()>;
    async fn list_all(&self, user_id: Uuid) -> Result<Vec<Notification>>;
    async fn clear_all(&self, user_id: Uuid) -> Result<u64>;
    async fn last_breach_at(&self, user_id: Uuid, period: &str)
        -> Result<Option<DateTime<Utc>>>;
}

/// Postgres-backed implementation of all three collaborator seams.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn device_exists(&self, device_id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM devices WHERE device_id = $1)",
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Ownership check for the device-scoped routes. Absent and foreign
    /// devices are indistinguishable to the caller.
    pub async fn device_for_user(&self, device_id: &str, user_id: Uuid) -> Result<Device> {
        sqlx::query_as::<_, Device>(
            "SELECT device_id, user_id, name, location, created_at FROM devices \
             WHERE device_id = $1 AND user_id = $2",
        )
        .bind(device_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("device {device_id} not found or not owned")))
    }

    pub async fn recent_readings(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let readings = sqlx::query_as::<_, Reading>(
            "SELECT device_id, ts AS timestamp, voltage, current, power FROM readings \
             WHERE device_id = $1 ORDER BY ts DESC LIMIT $2",
        )
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }
}

impl Registry for PgStore {
    async fn devices_owned_by(&self, user_id: Uuid) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT device_id, user_id, name, location, created_at FROM devices \
             WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    async fn limit_of(&self, user_id: Uuid) -> Result<EnergyLimit> {
        let row = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
            "SELECT daily_limit, monthly_limit FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {user_id} not found")))?;
        Ok(EnergyLimit {
            daily: row.0,
            monthly: row.1,
        })
    }

    async fn set_limits(&self, user_id: Uuid, limits: EnergyLimit) -> Result<EnergyLimit> {
        let updated = sqlx::query("UPDATE users SET daily_limit = $2, monthly_limit = $3 WHERE id = $1")
            .bind(user_id)
            .bind(limits.daily)
            .bind(limits.monthly)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {user_id} not found")));
        }
        Ok(limits)
    }
}

impl TelemetryStore for PgStore {
    async fn readings_for(
        &self,
        device_ids: &[String],
        window: Option<Window>,
    ) -> Result<Vec<Reading>> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT device_id, ts AS timestamp, voltage, current, power FROM readings \
             WHERE device_id = ANY($1)",
        );
        if let Some(w) = &window {
            sql.push_str(" AND ts >= $2");
            if w.end.is_some() {
                sql.push_str(" AND ts < $3");
            }
        }
        // Rows with equal ts come back in store-defined order.
        sql.push_str(" ORDER BY ts");

        let mut query = sqlx::query_as::<_, Reading>(&sql).bind(device_ids);
        if let Some(w) = &window {
            query = query.bind(w.start);
            if let Some(end) = w.end {
                query = query.bind(end);
            }
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

impl NotificationLedger for PgStore {
    async fn append(&self, user_id: Uuid, notifications: &[Notification]) -> Result<()> {
        if notifications.is_empty() {
            return Ok(());
        }

        let messages: Vec<&str> = notifications.iter().map(|n| n.message.as_str()).collect();
        let periods: Vec<&str> = notifications.iter().map(|n| n.period.as_str()).collect();
        let timestamps: Vec<DateTime<Utc>> = notifications.iter().map(|n| n.timestamp).collect();

        // Single statement keeps the append all-or-nothing under concurrency.
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, message, period, ts, read)
            SELECT $1, x.message, x.period, x.ts, false
            FROM UNNEST($2::text[], $3::text[], $4::timestamptz[]) AS x(message, period, ts)
            "#,
        )
        .bind(user_id)
        .bind(&messages)
        .bind(&periods)
        .bind(&timestamps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_all(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        if !self.user_exists(user_id).await? {
            return Err(Error::NotFound(format!("user {user_id} not found")));
        }
        let notifications = sqlx::query_as::<_, Notification>(
            r#"SELECT message, period, ts AS timestamp, read FROM notifications
               WHERE user_id = $1 ORDER BY id"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn clear_all(&self, user_id: Uuid) -> Result<u64> {
        if !self.user_exists(user_id).await? {
            return Err(Error::NotFound(format!("user {user_id} not found")));
        }
        let deleted = sqlx::query("DELETE FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    async fn last_breach_at(
        &self,
        user_id: Uuid,
        period: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let ts = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(ts) FROM notifications WHERE user_id = $1 AND period = $2",
        )
        .bind(user_id)
        .bind(period)
        .fetch_one(&self.pool)
        .await?;
        Ok(ts)
    }
}
