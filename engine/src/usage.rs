use chrono::{Duration, Local, Utc};
use uuid::Uuid;

use crate::aggregator;
use crate::errors::Result;
use crate::limits;
use crate::metrics::{NOTIFICATIONS_EMITTED_TOTAL, USAGE_CHECKS_TOTAL};
use crate::model::{DeviceUsage, Notification, UsageCheck, UsageReport};
use crate::store::{NotificationLedger, Registry, TelemetryStore};
use crate::window;

/// All-time per-device report across everything the user owns.
/// Owning zero devices is an empty report, not an error.
pub async fn total_usage<S>(store: &S, user_id: Uuid) -> Result<UsageReport>
where
    S: Registry + TelemetryStore,
{
    let devices = store.devices_owned_by(user_id).await?;
    let device_ids: Vec<String> = devices.iter().map(|d| d.device_id.clone()).collect();
    let aggregates = aggregator::device_aggregates(store, &device_ids, None).await?;

    let mut report = UsageReport {
        total_devices: devices.len(),
        total_power_usage: 0.0,
        total_readings: 0,
        devices: Vec::with_capacity(aggregates.len()),
    };
    for agg in aggregates {
        // Aggregate ids are drawn from `devices`, so the metadata join holds.
        let Some(device) = devices.iter().find(|d| d.device_id == agg.device_id) else {
            continue;
        };
        report.total_power_usage += agg.total_power;
        report.total_readings += agg.reading_count;
        report.devices.push(DeviceUsage {
            device_id: agg.device_id,
            device_name: device.name.clone(),
            device_location: device.location.clone(),
            total_power: agg.total_power,
            avg_voltage: agg.avg_voltage,
            avg_current: agg.avg_current,
            reading_count: agg.reading_count,
            last_reading: agg.last_reading,
        });
    }
    Ok(report)
}

/// Current-window usage check: today's and this month's consumption against
/// the user's configured limits. Breach notifications are appended to the
/// ledger as a side effect and returned so the caller can display them
/// without a re-read.
pub async fn check_usage<S>(store: &S, user_id: Uuid, renotify_min: Duration) -> Result<UsageCheck>
where
    S: Registry + TelemetryStore + NotificationLedger,
{
    let limits = store.limit_of(user_id).await?;
    let devices = store.devices_owned_by(user_id).await?;
    let device_ids: Vec<String> = devices.iter().map(|d| d.device_id.clone()).collect();

    let now = Local::now();
    let daily_usage = aggregator::power_sum(store, &device_ids, window::day_window(now)).await?;
    let monthly_usage =
        aggregator::power_sum(store, &device_ids, window::month_window(now)).await?;

    let evaluated_at = now.with_timezone(&Utc);
    let breaches = limits::find_breaches(daily_usage, monthly_usage, &limits);
    let breaches =
        limits::filter_renotify(store, user_id, breaches, renotify_min, evaluated_at).await?;
    let notifications: Vec<Notification> = breaches
        .into_iter()
        .map(|b| b.into_notification(evaluated_at))
        .collect();

    if !notifications.is_empty() {
        store.append(user_id, &notifications).await?;
        NOTIFICATIONS_EMITTED_TOTAL.inc_by(notifications.len() as f64);
    }
    USAGE_CHECKS_TOTAL.inc();

    Ok(UsageCheck {
        daily_usage,
        monthly_usage,
        limits,
        notifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::model::EnergyLimit;
    use crate::testutil::MemStore;

    fn no_damping() -> Duration {
        Duration::zero()
    }

    fn limits(daily: Option<f64>, monthly: Option<f64>) -> EnergyLimit {
        EnergyLimit { daily, monthly }
    }

    #[test]
    fn total_usage_is_empty_for_a_user_without_devices() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(EnergyLimit::default());
            let report = total_usage(&store, user).await.unwrap();
            assert_eq!(report.total_devices, 0);
            assert_eq!(report.total_readings, 0);
            assert_eq!(report.total_power_usage, 0.0);
            assert!(report.devices.is_empty());
        });
    }

    #[test]
    fn total_usage_never_includes_foreign_devices() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let alice = store.add_user(EnergyLimit::default());
            let bob = store.add_user(EnergyLimit::default());
            store.add_device(alice, "meter-a", "Heat pump");
            store.add_device(bob, "meter-b", "Oven");
            store.add_reading("meter-a", Utc::now(), 230.0, 1.0, 50.0);
            store.add_reading("meter-b", Utc::now(), 230.0, 9.0, 2000.0);

            let report = total_usage(&store, alice).await.unwrap();
            assert_eq!(report.total_devices, 1);
            assert_eq!(report.devices.len(), 1);
            assert_eq!(report.devices[0].device_id, "meter-a");
            assert_eq!(report.total_power_usage, 50.0);
        });
    }

    #[test]
    fn total_usage_totals_match_per_device_sums() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(EnergyLimit::default());
            store.add_device(user, "meter-a", "Heat pump");
            store.add_device(user, "meter-b", "Oven");
            store.add_device(user, "meter-c", "Idle meter");
            store.add_reading("meter-a", Utc::now(), 230.0, 1.0, 50.0);
            store.add_reading("meter-a", Utc::now(), 231.0, 1.1, 60.0);
            store.add_reading("meter-b", Utc::now(), 229.0, 8.0, 1800.0);

            let report = total_usage(&store, user).await.unwrap();
            // meter-c has no readings and is omitted, but still counts as owned.
            assert_eq!(report.total_devices, 3);
            assert_eq!(report.devices.len(), 2);
            let power_sum: f64 = report.devices.iter().map(|d| d.total_power).sum();
            let reading_sum: usize = report.devices.iter().map(|d| d.reading_count).sum();
            assert_eq!(report.total_power_usage, power_sum);
            assert_eq!(report.total_readings, reading_sum);
            assert_eq!(report.devices[0].device_name, "Heat pump");
        });
    }

    #[test]
    fn check_usage_without_limits_appends_nothing() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(None, None));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 10.0, 99999.0);

            let check = check_usage(&store, user, no_damping()).await.unwrap();
            assert!(check.notifications.is_empty());
            assert!(store.list_all(user).await.unwrap().is_empty());
        });
    }

    #[test]
    fn check_usage_emits_the_exact_breach_message() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(100.0), None));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 0.2, 50.0);
            store.add_reading("meter-a", Utc::now(), 230.0, 0.4, 100.0);

            let check = check_usage(&store, user, no_damping()).await.unwrap();
            assert_eq!(check.daily_usage, 150.0);
            assert_eq!(check.notifications.len(), 1);
            assert_eq!(
                check.notifications[0].message,
                "Daily energy limit of 100W exceeded. Current total usage: 150.00W"
            );
            assert!(!check.notifications[0].read);
            assert_eq!(store.list_all(user).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn old_readings_stay_out_of_the_windows() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(100.0), Some(100.0)));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now() - Duration::days(400), 230.0, 9.0, 2000.0);

            let check = check_usage(&store, user, no_damping()).await.unwrap();
            assert_eq!(check.daily_usage, 0.0);
            assert_eq!(check.monthly_usage, 0.0);
            assert!(check.notifications.is_empty());
        });
    }

    #[test]
    fn repeated_over_limit_checks_keep_appending() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(100.0), Some(120.0)));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 0.6, 150.0);

            check_usage(&store, user, no_damping()).await.unwrap();
            check_usage(&store, user, no_damping()).await.unwrap();
            // Both periods breach on both calls: no dedup in the baseline.
            assert_eq!(store.list_all(user).await.unwrap().len(), 4);
        });
    }

    #[test]
    fn renotify_interval_suppresses_back_to_back_checks() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(100.0), None));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 0.6, 150.0);

            let first = check_usage(&store, user, Duration::minutes(10)).await.unwrap();
            assert_eq!(first.notifications.len(), 1);

            let second = check_usage(&store, user, Duration::minutes(10)).await.unwrap();
            assert!(second.notifications.is_empty());
            // Usage totals still come back even when the notification is damped.
            assert_eq!(second.daily_usage, 150.0);
            assert_eq!(store.list_all(user).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn clear_then_list_is_empty() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(10.0), Some(10.0)));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 0.6, 150.0);

            check_usage(&store, user, no_damping()).await.unwrap();
            assert!(!store.list_all(user).await.unwrap().is_empty());

            store.clear_all(user).await.unwrap();
            assert!(store.list_all(user).await.unwrap().is_empty());
        });
    }

    #[test]
    fn list_is_idempotent_between_mutations() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let user = store.add_user(limits(Some(10.0), None));
            store.add_device(user, "meter-a", "Heat pump");
            store.add_reading("meter-a", Utc::now(), 230.0, 0.6, 150.0);
            check_usage(&store, user, no_damping()).await.unwrap();

            let first = store.list_all(user).await.unwrap();
            let second = store.list_all(user).await.unwrap();
            assert_eq!(first.len(), second.len());
            for (a, b) in first.iter().zip(second.iter()) {
                assert_eq!(a.message, b.message);
                assert_eq!(a.timestamp, b.timestamp);
            }
        });
    }

    #[test]
    fn check_usage_for_an_unknown_user_is_not_found() {
        tokio_test::block_on(async {
            let store = MemStore::new();
            let result = check_usage(&store, Uuid::new_v4(), no_damping()).await;
            assert!(matches!(result, Err(Error::NotFound(_))));
        });
    }
}
