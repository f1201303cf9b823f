use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::model::{Device, EnergyLimit, Notification, Reading};
use crate::store::{NotificationLedger, Registry, TelemetryStore};
use crate::window::Window;

/// In-memory store collaborators for exercising the core without Postgres.
/// Readings and notifications keep insertion order, mirroring the real
/// store's append-only tables.
#[derive(Default)]
pub struct MemStore {
    users: Mutex<HashMap<Uuid, EnergyLimit>>,
    devices: Mutex<Vec<Device>>,
    readings: Mutex<Vec<Reading>>,
    notifications: Mutex<HashMap<Uuid, Vec<Notification>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, limits: EnergyLimit) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(id, limits);
        id
    }

    pub fn add_device(&self, user_id: Uuid, device_id: &str, name: &str) {
        self.devices.lock().unwrap().push(Device {
            device_id: device_id.to_string(),
            user_id,
            name: name.to_string(),
            location: Some("lab".to_string()),
            created_at: Utc::now(),
        });
    }

    pub fn add_reading(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        voltage: f64,
        current: f64,
        power: f64,
    ) {
        self.readings.lock().unwrap().push(Reading {
            device_id: device_id.to_string(),
            timestamp,
            voltage,
            current,
            power,
        });
    }
}

impl Registry for MemStore {
    async fn devices_owned_by(&self, user_id: Uuid) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn limit_of(&self, user_id: Uuid) -> Result<EnergyLimit> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("user {user_id} not found")))
    }

    async fn set_limits(&self, user_id: Uuid, limits: EnergyLimit) -> Result<EnergyLimit> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(entry) => {
                *entry = limits;
                Ok(limits)
            }
            None => Err(Error::NotFound(format!("user {user_id} not found"))),
        }
    }
}

impl TelemetryStore for MemStore {
    async fn readings_for(
        &self,
        device_ids: &[String],
        window: Option<Window>,
    ) -> Result<Vec<Reading>> {
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| device_ids.contains(&r.device_id))
            .filter(|r| window.map_or(true, |w| w.contains(r.timestamp)))
            .cloned()
            .collect())
    }
}

impl NotificationLedger for MemStore {
    async fn append(&self, user_id: Uuid, notifications: &[Notification]) -> Result<()> {
        self.notifications
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .extend_from_slice(notifications);
        Ok(())
    }

    async fn list_all(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_all(&self, user_id: Uuid) -> Result<u64> {
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .remove(&user_id)
            .map(|n| n.len() as u64)
            .unwrap_or(0))
    }

    async fn last_breach_at(&self, user_id: Uuid, period: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .get(&user_id)
            .and_then(|ns| ns.iter().rev().find(|n| n.period == period))
            .map(|n| n.timestamp))
    }
}
