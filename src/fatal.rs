use crate::{config::ConfigError, error};
use embassy_time::{Duration, Ticker};

/// Reports a startup configuration fault forever.
///
/// There may be nobody watching when the device boots, so the fault is repeated on a slow
/// interval rather than logged once.
pub async fn report_forever(fault: ConfigError, interval: Duration) -> ! {
    let mut ticker = Ticker::every(interval);

    loop {
        error!("Configuration error, cannot start: {}", fault);
        ticker.next().await;
    }
}
