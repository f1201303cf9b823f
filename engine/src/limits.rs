use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{EnergyLimit, Notification};
use crate::store::NotificationLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Monthly,
}

impl Period {
    /// Capitalized form used in notification messages.
    pub fn label(self) -> &'static str {
        match self {
            Period::Daily => "Daily",
            Period::Monthly => "Monthly",
        }
    }

    /// Lowercase form stored in the ledger.
    pub fn key(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Monthly => "monthly",
        }
    }
}

/// A measured total strictly above its configured limit.
#[derive(Debug, Clone, Copy)]
pub struct Breach {
    pub period: Period,
    pub limit: f64,
    pub total: f64,
}

impl Breach {
    pub fn into_notification(self, at: DateTime<Utc>) -> Notification {
        Notification {
            message: format!(
                "{} energy limit of {}W exceeded. Current total usage: {:.2}W",
                self.period.label(),
                self.limit,
                self.total
            ),
            period: self.period.key().to_string(),
            timestamp: at,
            read: false,
        }
    }
}

/// Compare the period totals against the configured limits, each period
/// independently. A total equal to its limit is not a breach. Unconfigured
/// periods are skipped entirely.
pub fn find_breaches(daily_total: f64, monthly_total: f64, limits: &EnergyLimit) -> Vec<Breach> {
    let mut breaches = Vec::new();
    if let Some(limit) = limits.daily {
        if daily_total > limit {
            breaches.push(Breach {
                period: Period::Daily,
                limit,
                total: daily_total,
            });
        }
    }
    if let Some(limit) = limits.monthly {
        if monthly_total > limit {
            breaches.push(Breach {
                period: Period::Monthly,
                limit,
                total: monthly_total,
            });
        }
    }
    breaches
}

/// Optional damper on repeat notifications, off by default.
///
/// The baseline contract re-notifies on every evaluation that still exceeds
/// a limit. With a positive `min_interval`, a breach is dropped when the
/// ledger already holds a notification for that period younger than the
/// interval. `Duration::zero()` leaves the baseline behavior untouched.
pub async fn filter_renotify<L: NotificationLedger>(
    ledger: &L,
    user_id: Uuid,
    breaches: Vec<Breach>,
    min_interval: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Breach>> {
    if min_interval <= Duration::zero() || breaches.is_empty() {
        return Ok(breaches);
    }
    let mut kept = Vec::with_capacity(breaches.len());
    for breach in breaches {
        match ledger.last_breach_at(user_id, breach.period.key()).await? {
            Some(last) if now - last < min_interval => {}
            _ => kept.push(breach),
        }
    }
    Ok(kept)
}
