use std::collections::HashMap;

use crate::errors::Result;
use crate::model::{DeviceAggregate, Reading};
use crate::store::TelemetryStore;
use crate::window::Window;

/// Round to the two decimal places served for averaged electrical values.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-device rollup of a batch of readings.
///
/// Output order follows first appearance in the input, so one device never
/// produces two records. Devices with no readings simply do not appear;
/// every emitted record covers at least one reading.
pub fn aggregate_readings(readings: &[Reading]) -> Vec<DeviceAggregate> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Reading>> = HashMap::new();
    for reading in readings {
        let group = groups.entry(reading.device_id.as_str()).or_default();
        if group.is_empty() {
            order.push(reading.device_id.as_str());
        }
        group.push(reading);
    }

    order
        .into_iter()
        .map(|device_id| {
            let group = &groups[device_id];
            let count = group.len();
            let total_power: f64 = group.iter().map(|r| r.power).sum();
            let avg_voltage = round2(group.iter().map(|r| r.voltage).sum::<f64>() / count as f64);
            let avg_current = round2(group.iter().map(|r| r.current).sum::<f64>() / count as f64);
            // Max timestamp wins; ties resolve to the later store row.
            let last = group
                .iter()
                .skip(1)
                .copied()
                .fold(group[0], |best, r| if r.timestamp >= best.timestamp { r } else { best });
            DeviceAggregate {
                device_id: device_id.to_string(),
                total_power,
                avg_voltage,
                avg_current,
                reading_count: count,
                last_reading: last.clone(),
            }
        })
        .collect()
}

/// Per-device aggregates for a set of devices, all-time when `window` is
/// `None`. Store failures surface as-is; no partial result is returned.
pub async fn device_aggregates<S: TelemetryStore>(
    store: &S,
    device_ids: &[String],
    window: Option<Window>,
) -> Result<Vec<DeviceAggregate>> {
    if device_ids.is_empty() {
        return Ok(Vec::new());
    }
    let readings = store.readings_for(device_ids, window).await?;
    Ok(aggregate_readings(&readings))
}

/// Windowed scalar shape: summed power across every matching device.
/// No readings in range is zero, not an error.
pub async fn power_sum<S: TelemetryStore>(
    store: &S,
    device_ids: &[String],
    window: Window,
) -> Result<f64> {
    if device_ids.is_empty() {
        return Ok(0.0);
    }
    let readings = store.readings_for(device_ids, Some(window)).await?;
    Ok(readings.iter().map(|r| r.power).sum())
}
