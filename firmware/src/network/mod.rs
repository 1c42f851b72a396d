mod mqtt;
mod time;
mod wifi;

use self::{
    mqtt::{BrokerBuffers, TcpBroker},
    time::SntpTimeSource,
    wifi::Cyw43Radio,
};
use core::net::Ipv4Addr;
use cyw43::PowerManagementMode;
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::{Display2Format, debug, error, info, warn};
use embassy_executor::Spawner;
use embassy_net::{
    ConfigV4, DhcpConfig, IpAddress, Ipv4Cidr, Stack, StackResources, StaticConfigV4,
    dns::DnsQueryType,
};
use embassy_rp::{
    bind_interrupts,
    clocks::RoscRng,
    gpio::{Level, Output},
    peripherals::{DMA_CH0, PIO0},
    pio::{InterruptHandler, Pio},
};
use embassy_time::Timer;
use pico_telemetry::{
    Config, Error,
    bringup::BringUp,
    config::RetryBudget,
    net::{Addresses, Gateway, Lease, NetStack, bounded},
    publisher::Publisher,
};
use rand::RngCore;
use static_cell::StaticCell;

/// Prefix length used when falling back to a static address.
const STATIC_PREFIX_LEN: u8 = 24;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

#[embassy_executor::task]
pub(super) async fn task(r: crate::WifiResources, spawner: Spawner, config: &'static Config) {
    let pwr = Output::new(r.pwr, Level::Low);
    let cs = Output::new(r.cs, Level::High);

    let mut pio = Pio::new(r.pio, Irqs);

    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        r.dio,
        r.clk,
        r.dma_ch,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());

    let fw = include_bytes!("../../cyw43-firmware/43439A0.bin");
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    spawner.must_spawn(cyw43_task(runner));

    let clm = include_bytes!("../../cyw43-firmware/43439A0_clm.bin");
    control.init(clm).await;

    control
        .set_power_management(PowerManagementMode::PowerSave)
        .await;

    let mut rng = RoscRng;

    static RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        net_device,
        embassy_net::Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::<4>::new()),
        rng.next_u64(),
    );
    spawner.must_spawn(net_task(runner));

    let mut radio = Cyw43Radio::new(control);
    let mut net = EmbassyStack::new(stack);
    let mut time = SntpTimeSource::new(stack);

    let bringup = BringUp::new(config, &crate::CLOCK, &crate::DISPLAY);
    let network = loop {
        match bringup.run(&mut radio, &mut net, &mut time).await {
            Ok(network) => break network,
            Err(e) => {
                error!("Network bring-up failed: {}", e);
                Timer::after(config.reconnect_delay).await;
            }
        }
    };
    info!(
        "Network up at {} (DHCP: {}, time synced: {})",
        Display2Format(&network.address),
        network.dhcp,
        network.time_synced
    );

    static BROKER_BUFFERS: StaticCell<BrokerBuffers> = StaticCell::new();
    let broker = TcpBroker::new(stack, BROKER_BUFFERS.init(BrokerBuffers::new()));

    let mut publisher = Publisher::new(
        config,
        network,
        net,
        broker,
        rng,
        &crate::DISPLAY,
        &crate::TELEMETRY,
    );
    publisher.run().await
}

#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// The embassy-net stack as seen by bring-up and the publisher.
pub(crate) struct EmbassyStack {
    stack: Stack<'static>,
    static_assigned: bool,
}

impl EmbassyStack {
    fn new(stack: Stack<'static>) -> Self {
        Self {
            stack,
            static_assigned: false,
        }
    }
}

impl NetStack for EmbassyStack {
    async fn dhcp_request(
        &mut self,
        preferred: Option<Ipv4Addr>,
        budget: RetryBudget,
    ) -> pico_telemetry::Result<Lease> {
        if self.static_assigned {
            info!("Returning to DHCP");
            self.stack
                .set_config_v4(ConfigV4::Dhcp(DhcpConfig::default()));
            self.static_assigned = false;
        }

        // The DHCP client has no way to request a particular address
        if let Some(preferred) = preferred {
            debug!("Preferred address {} kept for fallback", Display2Format(&preferred));
        }

        info!("Waiting for DHCP");
        let stack = self.stack;
        budget.poll_until(|| stack.is_config_up()).await?;

        let config = self.stack.config_v4().ok_or(Error::DhcpFailed)?;
        info!("DHCP is now up");

        Ok(Lease {
            address: config.address.address(),
            router: config.gateway,
        })
    }

    async fn assign_static(&mut self, address: Ipv4Addr) -> pico_telemetry::Result<()> {
        self.stack.set_config_v4(ConfigV4::Static(StaticConfigV4 {
            address: Ipv4Cidr::new(address, STATIC_PREFIX_LEN),
            gateway: None,
            dns_servers: heapless::Vec::new(),
        }));
        self.static_assigned = true;
        Ok(())
    }

    async fn resolve_gateway(
        &mut self,
        router: Ipv4Addr,
        budget: RetryBudget,
    ) -> pico_telemetry::Result<Gateway> {
        // embassy-net keeps its neighbour cache private, so a configured route on an up link is
        // as close as this gets
        let stack = self.stack;
        budget
            .poll_until(|| {
                stack.is_link_up()
                    && stack
                        .config_v4()
                        .is_some_and(|config| config.gateway == Some(router))
            })
            .await
            .map_err(|_| Error::GatewayUnreachable)?;

        Ok(Gateway {
            address: router,
            hardware: None,
        })
    }

    async fn lookup_ip(
        &mut self,
        host: &str,
        budget: RetryBudget,
    ) -> pico_telemetry::Result<Addresses> {
        for attempt in 1..=budget.attempts.max(1) {
            let query = async {
                self.stack
                    .dns_query(host, DnsQueryType::A)
                    .await
                    .map_err(|e| {
                        warn!("DNS query error: {:?}", e);
                        Error::DnsFailed
                    })
            };

            match bounded(budget.period, query).await {
                Ok(found) => {
                    let mut addresses = Addresses::new();
                    for address in found {
                        #[allow(unreachable_patterns)]
                        match address {
                            IpAddress::Ipv4(address) => {
                                let _ = addresses.push(address);
                            }
                            _ => {}
                        }
                    }
                    return Ok(addresses);
                }
                Err(e) => {
                    warn!("Failed to resolve {} (attempt {}): {}", host, attempt, e);
                }
            }
        }

        Err(Error::DnsFailed)
    }
}
