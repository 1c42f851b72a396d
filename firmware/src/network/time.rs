use core::net::{Ipv4Addr, SocketAddr};
use defmt::{info, warn};
use embassy_net::{
    Stack,
    udp::{PacketMetadata, UdpSocket},
};
use embassy_time::{Instant, with_timeout};
use pico_telemetry::{Error, config::RetryBudget, net::TimeSource};
use sntpc::{NtpContext, NtpTimestampGenerator};

const NTP_PORT: u16 = 123;

pub(crate) struct SntpTimeSource {
    stack: Stack<'static>,
}

impl SntpTimeSource {
    pub(crate) fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }
}

impl TimeSource for SntpTimeSource {
    async fn request_offset(
        &mut self,
        server: Ipv4Addr,
        budget: RetryBudget,
    ) -> pico_telemetry::Result<i64> {
        let mut rx_meta = [PacketMetadata::EMPTY; 4];
        let mut rx_buffer = [0; 256];
        let mut tx_meta = [PacketMetadata::EMPTY; 4];
        let mut tx_buffer = [0; 256];

        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(NTP_PORT).map_err(|e| {
            warn!("Failed to bind NTP socket: {:?}", e);
            Error::TimeSyncFailed
        })?;

        let server = SocketAddr::from((server, NTP_PORT));

        for attempt in 1..=budget.attempts.max(1) {
            let context = NtpContext::new(TimestampGen::default());

            match with_timeout(budget.period, sntpc::get_time(server, &socket, context)).await {
                Ok(Ok(time)) => {
                    let received = Instant::now();

                    let unix_micros = i64::from(time.seconds) * 1_000_000
                        + i64::from(sntpc::fraction_to_microseconds(time.seconds_fraction));
                    let offset = unix_micros - received.as_micros() as i64;

                    info!("NTP time response: {}s, offset {}us", time.seconds, offset);
                    return Ok(offset);
                }
                Ok(Err(e)) => warn!("Error getting time (attempt {}): {:?}", attempt, e),
                Err(_) => warn!("NTP request timed out (attempt {})", attempt),
            }
        }

        Err(Error::Timeout)
    }
}

/// Stamps requests with device uptime.
#[derive(Copy, Clone, Default)]
struct TimestampGen {
    now: u64,
}

impl NtpTimestampGenerator for TimestampGen {
    fn init(&mut self) {
        self.now = Instant::now().as_micros();
    }

    fn timestamp_sec(&self) -> u64 {
        self.now / 1_000_000
    }

    fn timestamp_subsec_micros(&self) -> u32 {
        (self.now % 1_000_000) as u32
    }
}
