use defmt::{Debug2Format, warn};
use dht_sensor::dht11;
use embassy_rp::{
    Peri,
    adc::{Adc, Blocking, Channel, Config as AdcConfig},
    gpio::{Level, Output, OutputOpenDrain, Pull},
    peripherals::{ADC, PIN_22, PIN_26},
};
use pico_telemetry::{
    Error,
    sensor::{AnalogInput, EnvironmentalSensor, StatusIndicator},
};

/// Shift from the RP2040's 12 bit conversions to a 16 bit full scale.
const ADC_SCALE_SHIFT: u32 = 4;

pub(crate) struct RpAdc {
    adc: Adc<'static, Blocking>,
    channel: Channel<'static>,
}

impl RpAdc {
    pub(crate) fn new(adc: Peri<'static, ADC>, pin: Peri<'static, PIN_26>) -> Self {
        Self {
            adc: Adc::new_blocking(adc, AdcConfig::default()),
            channel: Channel::new_pin(pin, Pull::None),
        }
    }
}

impl AnalogInput for RpAdc {
    fn sample_raw(&mut self) -> u16 {
        match self.adc.blocking_read(&mut self.channel) {
            Ok(code) => code << ADC_SCALE_SHIFT,
            Err(e) => {
                warn!("ADC conversion failed: {}", e);
                0
            }
        }
    }
}

pub(crate) struct Dht11 {
    pin: OutputOpenDrain<'static>,
    delay: embassy_time::Delay,
}

impl Dht11 {
    #[cfg_attr(not(feature = "dht11"), allow(dead_code))]
    pub(crate) fn new(pin: Peri<'static, PIN_22>) -> Self {
        Self {
            pin: OutputOpenDrain::new(pin, Level::High),
            delay: embassy_time::Delay,
        }
    }
}

impl EnvironmentalSensor for Dht11 {
    async fn read(&mut self) -> pico_telemetry::Result<(f32, f32)> {
        match dht11::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => Ok((
                f32::from(reading.temperature),
                f32::from(reading.relative_humidity),
            )),
            Err(e) => {
                warn!("DHT11 read failed: {}", Debug2Format(&e));
                self.pin.set_high();
                Err(Error::SensorReadFailed)
            }
        }
    }
}

pub(crate) struct StatusLed(pub(crate) Output<'static>);

impl StatusIndicator for StatusLed {
    fn toggle(&mut self) {
        self.0.toggle();
    }
}
