use super::EnvironmentalSensor;
use crate::{error, info, reading::Environment, trace};
use embassy_time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    temperature: f32,
    humidity: f32,
    captured_at: Instant,
}

/// Last good environmental reading.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SensorCache {
    entry: Option<Entry>,
}

impl SensorCache {
    pub fn is_valid(&self) -> bool {
        self.entry.is_some()
    }

    pub fn store(&mut self, temperature: f32, humidity: f32, captured_at: Instant) {
        self.entry = Some(Entry {
            temperature,
            humidity,
            captured_at,
        });
    }

    /// The cached values, if any.
    pub fn last(&self) -> Option<Environment> {
        self.entry.map(|e| Environment {
            temperature: e.temperature,
            humidity: e.humidity,
            cached: true,
        })
    }

    /// The cached values, if they were captured less than `min_interval` before `now`.
    pub fn fresh(&self, now: Instant, min_interval: Duration) -> Option<Environment> {
        match self.entry {
            Some(e) if now.saturating_duration_since(e.captured_at) < min_interval => self.last(),
            _ => None,
        }
    }
}

/// Wraps an environmental sensor so it is never read more often than it can handle.
pub struct ThrottledSensor<S> {
    sensor: S,
    cache: SensorCache,
    min_interval: Duration,
}

impl<S: EnvironmentalSensor> ThrottledSensor<S> {
    pub fn new(sensor: S, min_interval: Duration) -> Self {
        Self {
            sensor,
            cache: SensorCache::default(),
            min_interval,
        }
    }

    pub async fn read(&mut self) -> crate::Result<Environment> {
        let now = Instant::now();

        if let Some(cached) = self.cache.fresh(now, self.min_interval) {
            trace!("Environment read throttled, using cache");
            return Ok(cached);
        }

        match self.sensor.read().await {
            Ok((temperature, humidity)) => {
                self.cache.store(temperature, humidity, now);
                Ok(Environment {
                    temperature,
                    humidity,
                    cached: false,
                })
            }
            Err(e) => match self.cache.last() {
                Some(cached) => {
                    info!("Environment read failed ({}), using cached value", e);
                    Ok(cached)
                }
                None => {
                    error!("Environment read failed with no cached value: {}", e);
                    Err(e)
                }
            },
        }
    }

    pub fn cache(&self) -> &SensorCache {
        &self.cache
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test::FakeEnvironment, Error};
    use embassy_time::Timer;

    #[tokio::test]
    async fn second_read_within_interval_is_cached() {
        let sensor = FakeEnvironment::new(&[Ok((21.5, 40.0)), Ok((30.0, 90.0))]);
        let reads = sensor.reads_handle();
        let mut throttled = ThrottledSensor::new(sensor, Duration::from_secs(2));

        let first = throttled.read().await.unwrap();
        let second = throttled.read().await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.temperature.to_bits(), second.temperature.to_bits());
        assert_eq!(first.humidity.to_bits(), second.humidity.to_bits());
        assert_eq!(reads.load(core::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn read_after_interval_touches_hardware() {
        let sensor = FakeEnvironment::new(&[Ok((21.5, 40.0)), Ok((22.0, 41.0))]);
        let mut throttled = ThrottledSensor::new(sensor, Duration::from_millis(20));

        throttled.read().await.unwrap();
        Timer::after_millis(30).await;
        let second = throttled.read().await.unwrap();

        assert!(!second.cached);
        assert_eq!(second.temperature, 22.0);
    }

    #[tokio::test]
    async fn failure_falls_back_to_cache() {
        let sensor = FakeEnvironment::new(&[Ok((21.5, 40.0)), Err(Error::SensorReadFailed)]);
        let mut throttled = ThrottledSensor::new(sensor, Duration::from_millis(10));

        throttled.read().await.unwrap();
        Timer::after_millis(20).await;
        let second = throttled.read().await.unwrap();

        assert!(second.cached);
        assert_eq!(second.temperature, 21.5);
        assert_eq!(second.humidity, 40.0);
    }

    #[tokio::test]
    async fn failure_without_cache_is_an_error() {
        let sensor = FakeEnvironment::new(&[Err(Error::SensorReadFailed)]);
        let mut throttled = ThrottledSensor::new(sensor, Duration::from_secs(2));

        assert_eq!(throttled.read().await, Err(Error::SensorReadFailed));
        assert!(!throttled.cache().is_valid());
    }
}
