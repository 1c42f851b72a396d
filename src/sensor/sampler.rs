use super::{AnalogInput, BurstSampler, EnvironmentalSensor, StatusIndicator, ThrottledSensor};
use crate::{
    clock::WallClock,
    config::Config,
    debug,
    display::{line, DisplayMessage},
    mailbox::Mailbox,
    reading::{Environment, Reading},
};
use embassy_time::{Duration, Instant, Timer};

/// Produces one [`Reading`] per sample interval and fans it out to the display and telemetry
/// mailboxes without ever waiting on either.
pub struct Sampler<'a, A, E, L, const D: usize, const T: usize> {
    config: &'a Config,
    adc: BurstSampler<A>,
    environment: Option<ThrottledSensor<E>>,
    indicator: L,
    clock: &'a WallClock,
    display: &'a Mailbox<DisplayMessage, D>,
    telemetry: &'a Mailbox<Reading, T>,
}

impl<'a, A, E, L, const D: usize, const T: usize> Sampler<'a, A, E, L, D, T>
where
    A: AnalogInput,
    E: EnvironmentalSensor,
    L: StatusIndicator,
{
    pub fn new(
        config: &'a Config,
        adc: A,
        environment: Option<E>,
        indicator: L,
        clock: &'a WallClock,
        display: &'a Mailbox<DisplayMessage, D>,
        telemetry: &'a Mailbox<Reading, T>,
    ) -> Self {
        Self {
            config,
            adc: BurstSampler::new(adc, config.burst_size, config.inter_sample_delay),
            environment: environment
                .map(|e| ThrottledSensor::new(e, config.environment_min_read_interval)),
            indicator,
            clock,
            display,
            telemetry,
        }
    }

    /// Takes one reading.
    pub async fn sample(&mut self) -> Reading {
        let start = Instant::now();

        let raw = self.adc.sample().await;

        let environment = match self.environment.as_mut() {
            Some(sensor) => Some(sensor.read().await.unwrap_or(Environment {
                temperature: 0.0,
                humidity: 0.0,
                cached: false,
            })),
            None => None,
        };

        Reading::new(
            raw,
            self.config.reference_voltage,
            environment,
            Duration::from_ticks(start.as_ticks()),
            self.clock.at(start),
        )
    }

    /// Hands a reading to both consumers, dropping it for whichever is behind.
    pub fn dispatch(&self, reading: &Reading) {
        if !self.display.try_send(status_message(reading)) {
            debug!(
                "Display mailbox full, dropped status ({})",
                self.display.statistics().dropped
            );
        }

        if self.config.withhold_until_time_sync && !self.clock.sync_attempted() {
            debug!("Withholding reading until time sync has been attempted");
            return;
        }

        if !self.telemetry.try_send(*reading) {
            debug!(
                "Telemetry mailbox full, dropped reading ({})",
                self.telemetry.statistics().dropped
            );
        }
    }

    pub async fn cycle(&mut self) {
        let reading = self.sample().await;
        self.indicator.toggle();
        self.dispatch(&reading);
    }

    pub async fn run(&mut self) -> ! {
        let mut next = Instant::now();

        loop {
            self.cycle().await;

            // Deadlines are additive so processing time does not accumulate as drift
            next += self.config.sample_interval;
            Timer::at(next).await;
        }
    }
}

fn status_message(reading: &Reading) -> DisplayMessage {
    let line1 = line(format_args!("ADC: {:.1}v, {}", reading.voltage, reading.raw));

    let line2 = match (reading.temperature, reading.humidity) {
        (Some(t), Some(h)) => line(format_args!("Temp:{:.1}C H:{:.0}%", t, h)),
        _ => line(format_args!("Temp:n/a")),
    };

    DisplayMessage::from_lines(line1, line2)
}
