use crate::errors::{Error, Result};
use crate::model::{EnergyLimit, Reading};

const VOLTAGE_MIN: f64 = 0.0;
const VOLTAGE_MAX: f64 = 500.0;
const CURRENT_MIN: f64 = 0.0;
const CURRENT_MAX: f64 = 200.0;
const POWER_MIN: f64 = 0.0;
const POWER_MAX: f64 = 100_000.0;

/// Validates an incoming meter reading
pub fn validate(reading: &Reading) -> Result<()> {
    // Validate voltage
    if reading.voltage < VOLTAGE_MIN || reading.voltage > VOLTAGE_MAX {
        return Err(Error::Validation(format!(
            "Voltage {} out of range [{}, {}]",
            reading.voltage, VOLTAGE_MIN, VOLTAGE_MAX
        )));
    }

    // Validate current
    if reading.current < CURRENT_MIN || reading.current > CURRENT_MAX {
        return Err(Error::Validation(format!(
            "Current {} out of range [{}, {}]",
            reading.current, CURRENT_MIN, CURRENT_MAX
        )));
    }

    // Validate power
    if reading.power < POWER_MIN || reading.power > POWER_MAX {
        return Err(Error::Validation(format!(
            "Power {} out of range [{}, {}]",
            reading.power, POWER_MIN, POWER_MAX
        )));
    }

    // Validate device_id
    if reading.device_id.is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }

    Ok(())
}

/// Rejects malformed limit values before they reach the registry.
pub fn validate_limits(limits: &EnergyLimit) -> Result<()> {
    for (period, value) in [("daily", limits.daily), ("monthly", limits.monthly)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "{} limit must be a non-negative number, got {}",
                    period, v
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(voltage: f64, current: f64, power: f64) -> Reading {
        Reading {
            device_id: "meter-1".to_string(),
            timestamp: Utc::now(),
            voltage,
            current,
            power,
        }
    }

    #[test]
    fn test_valid_reading() {
        assert!(validate(&reading(230.0, 2.5, 575.0)).is_ok());
    }

    #[test]
    fn test_invalid_voltage() {
        assert!(validate(&reading(600.0, 2.5, 575.0)).is_err());
        assert!(validate(&reading(-1.0, 2.5, 575.0)).is_err());
    }

    #[test]
    fn test_invalid_current() {
        assert!(validate(&reading(230.0, 250.0, 575.0)).is_err());
    }

    #[test]
    fn test_invalid_power() {
        assert!(validate(&reading(230.0, 2.5, 200_000.0)).is_err());
    }

    #[test]
    fn test_empty_device_id() {
        let mut r = reading(230.0, 2.5, 575.0);
        r.device_id = String::new();
        assert!(validate(&r).is_err());
    }

    #[test]
    fn test_limits_accept_none_and_zero() {
        assert!(validate_limits(&EnergyLimit {
            daily: None,
            monthly: None
        })
        .is_ok());
        assert!(validate_limits(&EnergyLimit {
            daily: Some(0.0),
            monthly: Some(100.0)
        })
        .is_ok());
    }

    #[test]
    fn test_limits_reject_negative() {
        let result = validate_limits(&EnergyLimit {
            daily: Some(-5.0),
            monthly: None,
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_limits_reject_non_finite() {
        assert!(validate_limits(&EnergyLimit {
            daily: Some(f64::NAN),
            monthly: None
        })
        .is_err());
        assert!(validate_limits(&EnergyLimit {
            daily: None,
            monthly: Some(f64::INFINITY)
        })
        .is_err());
    }
}
