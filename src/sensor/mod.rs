mod burst;
mod cache;
mod sampler;

pub use self::{
    burst::{burst_mean, BurstSampler},
    cache::{SensorCache, ThrottledSensor},
    sampler::Sampler,
};

/// A single-ended analog channel, scaled so full scale is `u16::MAX`.
pub trait AnalogInput {
    fn sample_raw(&mut self) -> u16;
}

/// A temperature and humidity sensor.
#[allow(async_fn_in_trait)]
pub trait EnvironmentalSensor {
    /// Returns `(temperature in degrees C, relative humidity in %)`.
    async fn read(&mut self) -> crate::Result<(f32, f32)>;
}

/// Something that can be blinked to show the sampler is alive.
pub trait StatusIndicator {
    fn toggle(&mut self);
}
