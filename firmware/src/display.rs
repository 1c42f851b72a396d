use core::cell::RefCell;
use defmt::{info, warn};
use embassy_embedded_hal::shared_bus::blocking::spi::SpiDeviceWithConfig;
use embassy_rp::{
    gpio::{Level, Output},
    spi::{Config as SpiConfig, Spi},
};
use embassy_sync::blocking_mutex::{Mutex, raw::NoopRawMutex};
use embedded_graphics::{
    Drawable,
    mono_font::{MonoTextStyle, ascii::FONT_8X13},
    pixelcolor::Rgb565,
    prelude::{DrawTarget, Point, RgbColor, WebColors},
    text::{Baseline, Text},
};
use mipidsi::{
    interface::SpiInterface,
    models::ST7735s,
    options::{ColorOrder, Orientation, Rotation},
};
use pico_telemetry::{Config, Error, display::CharacterDisplay, display::Renderer};

const SCREEN_WIDTH: u16 = 128;
const SCREEN_HEIGHT: u16 = 128;

const CELL_WIDTH: i32 = 8;
const ROW_HEIGHT: i32 = 20;
const TOP_MARGIN: i32 = 40;

const TEXT_COLOUR: Rgb565 = Rgb565::CSS_MOCCASIN;

/// A two row character grid drawn onto a pixel panel.
pub(crate) struct CellDisplay<T> {
    target: T,
    cursor: Point,
}

impl<T: DrawTarget<Color = Rgb565>> CellDisplay<T> {
    /// The panel sits on a dedicated chip select, so it is used as found without probing.
    pub(crate) fn new(target: T) -> Self {
        Self {
            target,
            cursor: Point::new(0, TOP_MARGIN),
        }
    }
}

impl<T: DrawTarget<Color = Rgb565>> CharacterDisplay for CellDisplay<T> {
    fn clear(&mut self) -> pico_telemetry::Result<()> {
        self.target
            .clear(Rgb565::BLACK)
            .map_err(|_| Error::TransportError)
    }

    fn set_cursor(&mut self, column: u8, row: u8) -> pico_telemetry::Result<()> {
        self.cursor = Point::new(
            i32::from(column) * CELL_WIDTH,
            TOP_MARGIN + i32::from(row) * ROW_HEIGHT,
        );
        Ok(())
    }

    fn write(&mut self, text: &str) -> pico_telemetry::Result<()> {
        let style = MonoTextStyle::new(&FONT_8X13, TEXT_COLOUR);

        let end = Text::with_baseline(text, self.cursor, style, Baseline::Top)
            .draw(&mut self.target)
            .map_err(|_| Error::TransportError)?;

        self.cursor = end;
        Ok(())
    }
}

#[embassy_executor::task]
pub(super) async fn task(r: crate::DisplayResources, config: &'static Config) {
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = 64_000_000;

    let spi = Spi::new_blocking_txonly(r.spi, r.clk, r.mosi, spi_config.clone());
    let spi_bus: Mutex<NoopRawMutex, _> = Mutex::new(RefCell::new(spi));

    let display_spi =
        SpiDeviceWithConfig::new(&spi_bus, Output::new(r.cs, Level::High), spi_config);

    let dc = Output::new(r.dc, Level::Low);
    let rst = Output::new(r.rst, Level::Low);
    let _led = Output::new(r.led, Level::High);

    let mut buffer = [0_u8; 512];
    let interface = SpiInterface::new(display_spi, dc, &mut buffer);

    let panel = match mipidsi::Builder::new(ST7735s, interface)
        .display_size(SCREEN_WIDTH, SCREEN_HEIGHT)
        .display_offset(2, 31)
        .orientation(Orientation::default().rotate(Rotation::Deg270))
        .color_order(ColorOrder::Bgr)
        .reset_pin(rst)
        .init(&mut embassy_time::Delay)
    {
        Ok(panel) => panel,
        Err(_) => {
            warn!("Display init failed, status will only be logged");
            drain().await
        }
    };

    info!("Display ready");
    let mut renderer = Renderer::new(CellDisplay::new(panel), config.display_columns, &crate::DISPLAY);
    renderer.run().await
}

/// Keeps the mailbox moving when there is no panel to draw on.
async fn drain() -> ! {
    loop {
        let message = crate::DISPLAY.receive().await;
        info!("Display: {} / {}", message.line1.as_str(), message.line2.as_str());
    }
}
