#![no_std]
#![no_main]

mod display;
mod network;
mod sensors;

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::gpio::{Level, Output};
use embassy_time::Duration;
use panic_probe as _;
use pico_telemetry::{
    DISPLAY_MAILBOX_CAPACITY, DisplayMessage, Mailbox, Reading, TELEMETRY_MAILBOX_CAPACITY,
    clock::WallClock,
    config::{Config, ConfigError, Credentials, WifiCredentials},
    sensor::Sampler,
};
use portable_atomic as _;
use static_cell::StaticCell;

assign_resources::assign_resources! {
    wifi: WifiResources {
        pwr: PIN_23,
        cs: PIN_25,
        dio: PIN_24,
        clk: PIN_29,
        pio: PIO0,
        dma_ch: DMA_CH0,
    }
    display: DisplayResources {
        mosi: PIN_11,
        clk: PIN_10,
        cs: PIN_9,
        dc: PIN_8,
        rst: PIN_12,
        led: PIN_13,
        spi: SPI1,
    }
    sensors: SensorResources {
        adc: ADC,
        adc_pin: PIN_26,
        dht_pin: PIN_22,
    }
    status: StatusResources {
        led: PIN_15,
    }
}

pub(crate) static DISPLAY: Mailbox<DisplayMessage, DISPLAY_MAILBOX_CAPACITY> = Mailbox::new();
pub(crate) static TELEMETRY: Mailbox<Reading, TELEMETRY_MAILBOX_CAPACITY> = Mailbox::new();
pub(crate) static CLOCK: WallClock = WallClock::new();

/// Used when the configuration itself could not be built.
const FATAL_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    info!("pico-telemetry {}", git_version::git_version!());

    let config = match config() {
        Ok(config) => config,
        Err(fault) => pico_telemetry::fatal::report_forever(fault, FATAL_REPORT_INTERVAL).await,
    };

    static CONFIG: StaticCell<Config> = StaticCell::new();
    let config: &'static Config = CONFIG.init(config);

    spawner.must_spawn(crate::display::task(r.display, config));
    spawner.must_spawn(sampler_task(r.sensors, r.status, config));
    spawner.must_spawn(crate::network::task(r.wifi, spawner, config));
}

fn config() -> Result<Config, ConfigError> {
    let wifi = WifiCredentials {
        ssid: env!("WIFI_SSID"),
        password: env!("WIFI_PASSWORD"),
    };

    let config = Config::new(
        option_env!("MQTT_CLIENT_ID").unwrap_or("pico-telemetry"),
        env!("MQTT_BROKER"),
        wifi,
    )?
    .with_credentials(Credentials::new(
        option_env!("MQTT_USERNAME"),
        option_env!("MQTT_PASSWORD"),
    ));

    config.validate()?;
    Ok(config)
}

#[embassy_executor::task]
async fn sampler_task(
    r: crate::SensorResources,
    status: crate::StatusResources,
    config: &'static Config,
) {
    let adc = crate::sensors::RpAdc::new(r.adc, r.adc_pin);

    #[cfg(feature = "dht11")]
    let environment = Some(crate::sensors::Dht11::new(r.dht_pin));
    #[cfg(not(feature = "dht11"))]
    let environment: Option<crate::sensors::Dht11> = {
        let _ = r.dht_pin;
        None
    };

    let indicator = crate::sensors::StatusLed(Output::new(status.led, Level::Low));

    let mut sampler = Sampler::new(
        config,
        adc,
        environment,
        indicator,
        &CLOCK,
        &DISPLAY,
        &TELEMETRY,
    );

    sampler.run().await
}
