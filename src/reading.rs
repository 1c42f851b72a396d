use crate::Error;
use chrono::{DateTime, Utc};
use embassy_time::Duration;
use serde::{Serialize, Serializer};

/// Largest JSON payload a reading can serialize to.
pub const PAYLOAD_CAPACITY: usize = 256;

/// Full scale of the primary channel after scaling to 16 bits.
pub const MAX_ADC_CODE: u16 = u16::MAX;

/// Output of the environmental sensor for one sample cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Environment {
    pub temperature: f32,
    pub humidity: f32,

    /// The values came from the cache, not from the sensor.
    pub cached: bool,
}

/// One sample cycle's worth of sensor data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub voltage: f32,
    pub raw: u16,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,

    #[serde(rename = "since_boot_ms", serialize_with = "as_millis")]
    pub since_boot: Duration,

    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis())
}

pub type Payload = heapless::Vec<u8, PAYLOAD_CAPACITY>;

impl Reading {
    pub fn new(
        raw: u16,
        reference_voltage: f32,
        environment: Option<Environment>,
        since_boot: Duration,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            voltage: voltage(raw, reference_voltage),
            raw,
            temperature: environment.map(|e| e.temperature),
            humidity: environment.map(|e| e.humidity),
            since_boot,
            timestamp,
        }
    }

    pub fn to_json(&self) -> crate::Result<Payload> {
        serde_json_core::to_vec(self).map_err(|_| Error::SerializeError)
    }
}

pub fn voltage(raw: u16, reference_voltage: f32) -> f32 {
    (raw as f32 / MAX_ADC_CODE as f32) * reference_voltage
}

#[cfg(feature = "no-std")]
impl defmt::Format for Reading {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Reading {{ voltage: {}, raw: {}, temperature: {}, humidity: {}, since_boot: {}, synced: {} }}",
            self.voltage,
            self.raw,
            self.temperature,
            self.humidity,
            self.since_boot,
            self.timestamp.is_some(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn half_scale_is_half_reference() {
        let v = voltage(32768, 3.3);
        assert!((v - 1.65).abs() < 0.001);
        assert_eq!(voltage(0, 3.3), 0.0);
        assert!((voltage(u16::MAX, 3.3) - 3.3).abs() < f32::EPSILON);
    }

    #[test]
    fn json_without_timestamp() {
        let reading = Reading::new(
            32768,
            3.3,
            Some(Environment {
                temperature: 21.5,
                humidity: 40.0,
                cached: false,
            }),
            Duration::from_millis(12_345),
            None,
        );

        let json = reading.to_json().unwrap();
        let json = core::str::from_utf8(&json).unwrap();

        assert!(json.starts_with("{\"voltage\":"));
        assert!(json.contains("\"raw\":32768"));
        assert!(json.contains("\"temperature\":21.5"));
        assert!(json.contains("\"humidity\":40"));
        assert!(json.contains("\"since_boot_ms\":12345"));
        assert!(!json.contains("timestamp"));
    }

    #[test]
    fn json_with_timestamp() {
        let timestamp = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let reading = Reading::new(0, 3.3, None, Duration::from_secs(1), Some(timestamp));

        let json = reading.to_json().unwrap();
        let json = core::str::from_utf8(&json).unwrap();

        assert!(json.contains("\"temperature\":null"));
        assert!(json.contains("\"timestamp\":1700000000123"));
    }
}
