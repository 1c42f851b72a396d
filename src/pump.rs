//! Polling loop for network stacks that have to be driven by hand.
//!
//! On the Pico W the embassy-net `Runner` and the cyw43 runner already do this, as the firmware's
//! `net_task` and `cyw43_task`.

use crate::{net::PacketIo, trace, warn};
use embassy_futures::yield_now;
use embassy_time::{Duration, Timer};

/// Drives the network stack's receive and transmit paths for as long as the device runs.
///
/// Every turn ends at a suspension point: a yield after moving traffic, or an `idle` sleep when
/// nothing moved.
pub async fn run_packet_pump<P: PacketIo>(io: &mut P, idle: Duration) -> ! {
    loop {
        match io.recv_and_send().await {
            Ok(activity) if activity.any() => {
                trace!("Packet pump moved traffic");
                yield_now().await;
            }
            Ok(_) => Timer::after(idle).await,
            Err(e) => {
                warn!("Packet pump error: {}", e);
                Timer::after(idle).await;
            }
        }
    }
}
