use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One electrical sample from a metering device
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub device_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

/// A registered metering device and its owner
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Device {
    pub device_id: String,
    pub user_id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-user consumption limits; `None` means no limit for that period
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnergyLimit {
    pub daily: Option<f64>,
    pub monthly: Option<f64>,
}

/// One entry in a user's notification ledger. `read` is recorded but never
/// flipped; the only state transition the ledger supports is a full clear.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub message: String,
    pub period: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Per-device rollup over the readings found in a time range.
/// Computed on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAggregate {
    pub device_id: String,
    pub total_power: f64,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub reading_count: usize,
    pub last_reading: Reading,
}

/// DeviceAggregate joined with registry metadata for the usage report
#[derive(Debug, Serialize)]
pub struct DeviceUsage {
    pub device_id: String,
    pub device_name: String,
    pub device_location: Option<String>,
    pub total_power: f64,
    pub avg_voltage: f64,
    pub avg_current: f64,
    pub reading_count: usize,
    pub last_reading: Reading,
}

/// All-time usage report across everything the user owns
#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub total_devices: usize,
    pub total_power_usage: f64,
    pub total_readings: usize,
    pub devices: Vec<DeviceUsage>,
}

/// Result of a daily/monthly limit check. `notifications` holds only the
/// entries emitted by this call, not the full ledger.
#[derive(Debug, Serialize)]
pub struct UsageCheck {
    pub daily_usage: f64,
    pub monthly_usage: f64,
    pub limits: EnergyLimit,
    pub notifications: Vec<Notification>,
}

/// REST API response wrapper for device reading queries
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub data: Vec<Reading>,
    pub total: usize,
    pub limit: usize,
}
