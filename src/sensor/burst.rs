use super::AnalogInput;
use embassy_time::{Duration, Timer};

/// Averages `samples` reads of `input`, after throwing away one settling read.
///
/// Consecutive reads are `delay` apart. A `samples` of zero is treated as one.
pub async fn burst_mean<A: AnalogInput>(input: &mut A, samples: usize, delay: Duration) -> u16 {
    let samples = samples.max(1);

    // Sample and hold settling
    let _ = input.sample_raw();

    let mut sum: u64 = 0;
    for _ in 0..samples {
        Timer::after(delay).await;
        sum += u64::from(input.sample_raw());
    }

    (sum / samples as u64) as u16
}

pub struct BurstSampler<A> {
    input: A,
    samples: usize,
    delay: Duration,
}

impl<A: AnalogInput> BurstSampler<A> {
    pub fn new(input: A, samples: usize, delay: Duration) -> Self {
        Self {
            input,
            samples,
            delay,
        }
    }

    pub async fn sample(&mut self) -> u16 {
        burst_mean(&mut self.input, self.samples, self.delay).await
    }
}
