use crate::{
    clock::WallClock,
    config::Config,
    display::{line, narrate, DisplayMessage},
    error, info,
    mailbox::Mailbox,
    net::{bounded, Gateway, NetStack, Radio, TimeSource},
    warn, Error,
};
use chrono::Timelike;
use core::net::Ipv4Addr;
use embassy_time::Timer;

/// How the device ended up on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub address: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub gateway: Option<Gateway>,

    /// The address came from a DHCP lease rather than the static fallback.
    pub dhcp: bool,
    pub time_synced: bool,
}

/// Brings the network up one step at a time, narrating each step to the display.
pub struct BringUp<'a, const D: usize> {
    config: &'a Config,
    clock: &'a WallClock,
    display: &'a Mailbox<DisplayMessage, D>,
}

impl<'a, const D: usize> BringUp<'a, D> {
    pub fn new(
        config: &'a Config,
        clock: &'a WallClock,
        display: &'a Mailbox<DisplayMessage, D>,
    ) -> Self {
        Self {
            config,
            clock,
            display,
        }
    }

    pub async fn run<R: Radio, S: NetStack, T: TimeSource>(
        &self,
        radio: &mut R,
        stack: &mut S,
        time: &mut T,
    ) -> crate::Result<NetworkInfo> {
        self.join(radio).await;

        let mut info = self.configure_address(stack).await?;
        info.gateway = self.resolve_gateway(stack, info.router).await?;
        info.time_synced = self.sync_time(stack, time).await;

        info!("Network is up");
        Ok(info)
    }

    /// Joins the configured network, retrying forever.
    pub async fn join<R: Radio>(&self, radio: &mut R) {
        let wifi = &self.config.wifi;

        loop {
            narrate(self.display, "Connecting to", "WiFi...");
            info!("Joining WiFi network {}", wifi.ssid);

            match radio.join(wifi.ssid, wifi.password).await {
                Ok(()) => {
                    info!("Joined WiFi network {}", wifi.ssid);
                    narrate(self.display, "WiFi connected", wifi.ssid);
                    return;
                }
                Err(e) => {
                    warn!("Failed to join WiFi network: {}", e);
                    narrate(self.display, "WiFi failed", "Retrying...");
                    Timer::after(self.config.budgets.join_backoff).await;
                }
            }
        }
    }

    /// Leases an address, falling back to the preferred address when DHCP gives up.
    pub async fn configure_address<S: NetStack>(&self, stack: &mut S) -> crate::Result<NetworkInfo> {
        let budget = self.config.budgets.dhcp;
        let preferred = self.config.preferred_address;

        narrate(self.display, "Getting IP", "via DHCP...");

        let lease = bounded(
            budget.total() + self.config.operation_timeout,
            stack.dhcp_request(preferred, budget),
        )
        .await;

        match lease {
            Ok(lease) => {
                let address = line(format_args!("{}", lease.address));
                info!("DHCP lease acquired: {}", address.as_str());
                narrate(self.display, "Got IP", &address);

                Ok(NetworkInfo {
                    address: lease.address,
                    router: lease.router,
                    gateway: None,
                    dhcp: true,
                    time_synced: false,
                })
            }
            Err(e) => {
                warn!("DHCP failed: {}", e);

                let Some(address) = preferred else {
                    error!("DHCP failed and no fallback address is configured");
                    narrate(self.display, "DHCP failed", "No address");
                    return Err(Error::DhcpFailed);
                };

                stack.assign_static(address).await?;

                let text = line(format_args!("Static {}", address));
                info!("Using static address: {}", text.as_str());
                narrate(self.display, "DHCP failed", &text);

                Ok(NetworkInfo {
                    address,
                    router: None,
                    gateway: None,
                    dhcp: false,
                    time_synced: false,
                })
            }
        }
    }

    /// Finds the router's link-layer address. Without a router there is nothing to resolve.
    pub async fn resolve_gateway<S: NetStack>(
        &self,
        stack: &mut S,
        router: Option<Ipv4Addr>,
    ) -> crate::Result<Option<Gateway>> {
        let Some(router) = router else {
            warn!("No router advertised, skipping gateway resolution");
            return Ok(None);
        };

        let budget = self.config.budgets.gateway;
        narrate(self.display, "Resolving", "gateway...");

        match bounded(
            budget.total() + self.config.operation_timeout,
            stack.resolve_gateway(router, budget),
        )
        .await
        {
            Ok(gateway) => {
                let address = line(format_args!("{}", gateway.address));
                info!("Gateway resolved: {}", address.as_str());
                narrate(self.display, "Gateway ok", &address);
                Ok(Some(gateway))
            }
            Err(e) => {
                error!("Failed to resolve gateway: {}", e);
                narrate(self.display, "Gateway failed", "No route");
                Err(Error::GatewayUnreachable)
            }
        }
    }

    /// Sets the wall clock from a time server. Failure only costs timestamps, so it is reported
    /// and swallowed.
    pub async fn sync_time<S: NetStack, T: TimeSource>(&self, stack: &mut S, time: &mut T) -> bool {
        narrate(self.display, "Syncing time", "via NTP...");

        let result = self.request_time(stack, time).await;
        self.clock.mark_sync_attempted();

        let synced = match result {
            Ok(()) => {
                let text = match self.clock.now() {
                    Some(now) => line(format_args!(
                        "{:02}:{:02}:{:02}",
                        now.hour(),
                        now.minute(),
                        now.second()
                    )),
                    None => line(format_args!("")),
                };
                info!("Time synced: {}", text.as_str());
                narrate(self.display, "Time synced", &text);
                true
            }
            Err(e) => {
                warn!("Time sync failed, continuing without wall clock: {}", e);
                narrate(self.display, "NTP sync failed", "Continuing...");
                false
            }
        };

        Timer::after(self.config.narration_pause).await;
        synced
    }

    async fn request_time<S: NetStack, T: TimeSource>(
        &self,
        stack: &mut S,
        time: &mut T,
    ) -> crate::Result<()> {
        let dns = self.config.budgets.dns;
        let budget = self.config.budgets.time_sync;
        let slack = self.config.operation_timeout;

        let addresses = bounded(dns.total() + slack, stack.lookup_ip(self.config.time_server, dns))
            .await
            .map_err(|e| {
                warn!("Failed to resolve time server: {}", e);
                Error::DnsFailed
            })?;
        let server = *addresses.first().ok_or(Error::NoAddresses)?;

        let offset = bounded(budget.total() + slack, time.request_offset(server, budget))
            .await
            .map_err(|e| {
                warn!("Time server exchange failed: {}", e);
                Error::TimeSyncFailed
            })?;

        self.clock.apply_offset(offset);
        Ok(())
    }
}
