use crate::{
    bringup::NetworkInfo,
    config::{Config, RetryBudget},
    debug,
    display::{line, narrate, truncate_to_columns, DisplayMessage},
    info,
    mailbox::Mailbox,
    net::{bounded, Broker, NetStack, PublishFlags, Session, TransportState},
    reading::Reading,
    warn, Error,
};
use core::net::SocketAddrV4;
use embassy_futures::{
    select::{select, Either},
    yield_now,
};
use embassy_time::{Instant, Ticker, Timer};
use rand::{Rng, RngCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum ConnectionState {
    Idle,
    Dialing,
    Handshaking,
    Authenticating,
    Connected,
    Disconnecting,
    Failed,
}

/// Keeps a session with the broker alive and feeds it readings, reconnecting whenever it drops.
pub struct Publisher<'a, S, B, R, const D: usize, const T: usize> {
    config: &'a Config,
    network: NetworkInfo,
    stack: S,
    broker: B,
    rng: R,
    display: &'a Mailbox<DisplayMessage, D>,
    telemetry: &'a Mailbox<Reading, T>,
    state: ConnectionState,
}

impl<'a, S, B, R, const D: usize, const T: usize> Publisher<'a, S, B, R, D, T>
where
    S: NetStack,
    B: Broker,
    R: RngCore,
{
    pub fn new(
        config: &'a Config,
        network: NetworkInfo,
        stack: S,
        broker: B,
        rng: R,
        display: &'a Mailbox<DisplayMessage, D>,
        telemetry: &'a Mailbox<Reading, T>,
    ) -> Self {
        Self {
            config,
            network,
            stack,
            broker,
            rng,
            display,
            telemetry,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn run(&mut self) -> ! {
        loop {
            match self.run_once().await {
                Ok(()) => {
                    info!("Broker session ended, reconnecting");
                    yield_now().await;
                }
                Err(e) => {
                    warn!("Broker connection attempt failed: {}", e);
                    Timer::after(self.config.reconnect_delay).await;
                }
            }
        }
    }

    /// One reconnect iteration, from `Idle` back to `Idle` (or `Failed` if no session was made).
    pub async fn run_once(&mut self) -> crate::Result<()> {
        self.set_state(ConnectionState::Idle);

        let result = self.connect_and_serve().await;
        let was_connected = self.state == ConnectionState::Connected;

        self.disconnect(was_connected).await;

        match result {
            Ok(()) => self.set_state(ConnectionState::Idle),
            Err(_) => self.set_state(ConnectionState::Failed),
        }
        result
    }

    async fn connect_and_serve(&mut self) -> crate::Result<()> {
        let remote = self.resolve_broker().await?;

        // Fresh per iteration so nothing collides with a session the broker is still draining
        let local_port = self.rng.gen_range(1024..u16::MAX);
        self.dial(local_port, remote).await?;

        self.set_state(ConnectionState::Authenticating);
        narrate(self.display, "MQTT Connect", "Authenticating");

        let Self {
            config,
            broker,
            rng,
            display,
            telemetry,
            state,
            ..
        } = self;

        let mut session = match bounded(
            config.operation_timeout,
            broker.start_connect(config.credentials, config.client_id),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to send connect request: {}", e);
                let text = line(format_args!("{}", e));
                narrate(
                    *display,
                    "Connect Failed",
                    truncate_to_columns(&text, config.display_columns),
                );
                return Err(e);
            }
        };

        authenticate(&mut session, config.budgets.authenticate, *display).await?;

        info!("Connected to broker as {}", config.client_id);
        *state = ConnectionState::Connected;
        narrate(*display, "MQTT Connected", "Publishing...");

        serve(&mut session, *config, *telemetry, rng).await;
        Ok(())
    }

    async fn resolve_broker(&mut self) -> crate::Result<SocketAddrV4> {
        self.set_state(ConnectionState::Dialing);

        let broker = self.config.broker;
        let address = match broker.literal() {
            Some(address) => address,
            None => {
                let budget = self.config.budgets.dns;
                let addresses = bounded(
                    budget.total() + self.config.operation_timeout,
                    self.stack.lookup_ip(broker.host, budget),
                )
                .await
                .map_err(|e| {
                    warn!("Failed to resolve broker {}: {}", broker.host, e);
                    Error::DnsFailed
                })?;
                *addresses.first().ok_or(Error::NoAddresses)?
            }
        };

        let remote = SocketAddrV4::new(address, broker.port);
        let text = line(format_args!("{}", remote));
        debug!("Broker address: {}", text.as_str());
        narrate(self.display, "addr", &text);

        Ok(remote)
    }

    async fn dial(&mut self, local_port: u16, remote: SocketAddrV4) -> crate::Result<()> {
        let budget = self.config.budgets.handshake;

        self.broker
            .set_deadline(Instant::now() + budget.total() + self.config.operation_timeout);
        bounded(
            self.config.operation_timeout,
            self.broker
                .dial(local_port, self.network.gateway.as_ref(), remote),
        )
        .await
        .map_err(|e| {
            warn!("Dial failed: {}", e);
            e
        })?;

        self.set_state(ConnectionState::Handshaking);
        narrate(self.display, "Connecting...", "TCP handshake");

        let broker = &self.broker;
        budget
            .poll_until(|| broker.state() == TransportState::Established)
            .await
            .map_err(|e| {
                warn!("TCP handshake did not complete in time");
                e
            })
    }

    async fn disconnect(&mut self, was_connected: bool) {
        self.set_state(ConnectionState::Disconnecting);

        if was_connected {
            narrate(self.display, "Disconnected", "Reconnecting...");
        }

        self.broker.close();

        let broker = &self.broker;
        if self
            .config
            .budgets
            .close
            .poll_until(|| broker.state() == TransportState::Closed)
            .await
            .is_err()
        {
            warn!("Connection did not close in time, aborting it");
            self.broker.abort();
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

async fn authenticate<X: Session, const D: usize>(
    session: &mut X,
    budget: RetryBudget,
    display: &Mailbox<DisplayMessage, D>,
) -> crate::Result<()> {
    for _ in 0..budget.attempts {
        session.set_deadline(Instant::now() + budget.period);

        if let Err(e) = session.handle_next().await {
            let e = session.last_error().unwrap_or(e);
            warn!("Waiting for connection acknowledgement: {}", e);
        }

        if session.is_connected() {
            return Ok(());
        }

        Timer::after(budget.period).await;
    }

    warn!("Timed out waiting for broker to acknowledge connection");
    narrate(display, "Connect Failed", "Timed out");
    Err(Error::Timeout)
}

/// Publishes readings as they arrive and keeps the session alive between them, until the
/// session reports it is no longer connected.
async fn serve<X: Session, R: RngCore, const T: usize>(
    session: &mut X,
    config: &Config,
    telemetry: &Mailbox<Reading, T>,
    rng: &mut R,
) {
    let mut heartbeat = Ticker::every(config.heartbeat_interval);

    while session.is_connected() {
        // Readings take priority over the heartbeat when both are ready; when neither is, this
        // suspends so the packet pump can run
        match select(telemetry.receive(), heartbeat.next()).await {
            Either::First(reading) => {
                if let Err(e) = publish(session, config, &reading, rng).await {
                    warn!("Failed to publish reading: {}", e);
                }
                housekeeping(session, config).await;
            }
            Either::Second(()) => {
                debug!("Heartbeat");
                housekeeping(session, config).await;
            }
        }
    }

    match session.last_error() {
        Some(e) => warn!("Broker session lost: {}", e),
        None => info!("Broker session closed"),
    }
}

async fn publish<X: Session, R: RngCore>(
    session: &mut X,
    config: &Config,
    reading: &Reading,
    rng: &mut R,
) -> crate::Result<()> {
    let payload = reading.to_json()?;
    let message_id = rng.gen_range(1..=u16::MAX);

    session.set_deadline(Instant::now() + config.operation_timeout);
    bounded(
        config.operation_timeout,
        session.publish(PublishFlags::AT_MOST_ONCE, config.topic, message_id, &payload),
    )
    .await?;

    debug!("Published reading {} ({} bytes)", message_id, payload.len());
    Ok(())
}

async fn housekeeping<X: Session>(session: &mut X, config: &Config) {
    session.set_deadline(Instant::now() + config.operation_timeout);
    if let Err(e) = bounded(config.operation_timeout, session.handle_next()).await {
        warn!("Broker housekeeping failed: {}", e);
    }
}
