use crate::{
    bringup::NetworkInfo,
    config::{Budgets, Config, Credentials, RetryBudget, WifiCredentials},
    display::CharacterDisplay,
    net::{
        Activity, Addresses, Broker, Gateway, HardwareAddress, Lease, NetStack, PacketIo,
        PublishFlags, Radio, Session, TimeSource, Transport, TransportState,
    },
    sensor::{AnalogInput, EnvironmentalSensor, StatusIndicator},
    Error, Result,
};
use core::net::{Ipv4Addr, SocketAddrV4};
use embassy_time::{Duration, Instant, Timer};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use critical_section as _;

#[ctor::ctor]
fn init_test_logging() {
    env_logger::init();
}

/// Defaults with every wait shrunk so tests finish quickly.
pub(crate) fn test_config() -> Config {
    let mut config = Config::new(
        "pico-test",
        "broker.local:1883",
        WifiCredentials {
            ssid: "workshop",
            password: "hunter22",
        },
    )
    .unwrap();

    let quick = Duration::from_millis(1);

    config.burst_size = 4;
    config.inter_sample_delay = Duration::from_micros(10);
    config.heartbeat_interval = Duration::from_millis(10);
    config.budgets = Budgets {
        join_backoff: Duration::from_millis(5),
        dhcp: RetryBudget::new(2, quick),
        gateway: RetryBudget::new(2, quick),
        dns: RetryBudget::new(2, quick),
        time_sync: RetryBudget::new(2, quick),
        handshake: RetryBudget::new(5, quick),
        authenticate: RetryBudget::new(50, quick),
        close: RetryBudget::new(5, quick),
    };
    config.reconnect_delay = quick;
    config.narration_pause = quick;

    config.validate().unwrap();
    config
}

pub(crate) fn test_network() -> NetworkInfo {
    NetworkInfo {
        address: Ipv4Addr::new(192, 168, 1, 20),
        router: Some(Ipv4Addr::new(192, 168, 1, 1)),
        gateway: None,
        dhcp: true,
        time_synced: true,
    }
}

pub(crate) struct FakeAdc {
    values: Vec<u16>,
    reads: usize,
}

impl FakeAdc {
    pub(crate) fn constant(value: u16) -> Self {
        Self::sequence(&[value])
    }

    /// Returns each value in turn, then repeats the last one.
    pub(crate) fn sequence(values: &[u16]) -> Self {
        Self {
            values: values.to_vec(),
            reads: 0,
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads
    }
}

impl AnalogInput for FakeAdc {
    fn sample_raw(&mut self) -> u16 {
        let value = self.values[self.reads.min(self.values.len() - 1)];
        self.reads += 1;
        value
    }
}

pub(crate) struct FakeEnvironment {
    results: Vec<Result<(f32, f32)>>,
    reads: Arc<AtomicUsize>,
}

impl FakeEnvironment {
    /// Returns each result in turn, then repeats the last one.
    pub(crate) fn new(results: &[Result<(f32, f32)>]) -> Self {
        Self {
            results: results.to_vec(),
            reads: Default::default(),
        }
    }

    pub(crate) fn reads_handle(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl EnvironmentalSensor for FakeEnvironment {
    async fn read(&mut self) -> Result<(f32, f32)> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed);
        self.results[n.min(self.results.len() - 1)]
    }
}

#[derive(Default)]
pub(crate) struct FakeIndicator {
    toggles: Arc<AtomicUsize>,
}

impl FakeIndicator {
    pub(crate) fn toggles_handle(&self) -> Arc<AtomicUsize> {
        self.toggles.clone()
    }
}

impl StatusIndicator for FakeIndicator {
    fn toggle(&mut self) {
        self.toggles.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DisplayOp {
    Clear,
    Cursor(u8, u8),
    Write(String),
}

#[derive(Default)]
pub(crate) struct FakeDisplay {
    ops: Arc<Mutex<Vec<DisplayOp>>>,
}

impl FakeDisplay {
    pub(crate) fn ops_handle(&self) -> Arc<Mutex<Vec<DisplayOp>>> {
        self.ops.clone()
    }
}

impl CharacterDisplay for FakeDisplay {
    fn clear(&mut self) -> Result<()> {
        self.ops.lock().unwrap().push(DisplayOp::Clear);
        Ok(())
    }

    fn set_cursor(&mut self, column: u8, row: u8) -> Result<()> {
        self.ops.lock().unwrap().push(DisplayOp::Cursor(column, row));
        Ok(())
    }

    fn write(&mut self, text: &str) -> Result<()> {
        self.ops.lock().unwrap().push(DisplayOp::Write(text.to_owned()));
        Ok(())
    }
}

pub(crate) struct FakeRadio {
    failures: usize,
    pub(crate) attempts: usize,
}

impl FakeRadio {
    /// A radio that fails to join `failures` times before succeeding.
    pub(crate) fn failing(failures: usize) -> Self {
        Self {
            failures,
            attempts: 0,
        }
    }
}

impl Radio for FakeRadio {
    async fn join(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        self.attempts += 1;
        if self.attempts <= self.failures {
            Err(Error::JoinFailed)
        } else {
            Ok(())
        }
    }
}

pub(crate) struct FakeStack {
    pub(crate) dhcp: Result<Lease>,
    pub(crate) gateway: Result<Gateway>,
    pub(crate) dns: Result<Addresses>,
    pub(crate) static_address: Option<Ipv4Addr>,
    pub(crate) gateway_requests: usize,
    pub(crate) lookups: Arc<Mutex<Vec<String>>>,
}

impl Default for FakeStack {
    fn default() -> Self {
        Self {
            dhcp: Ok(Lease {
                address: Ipv4Addr::new(192, 168, 1, 20),
                router: Some(Ipv4Addr::new(192, 168, 1, 1)),
            }),
            gateway: Ok(Gateway {
                address: Ipv4Addr::new(192, 168, 1, 1),
                hardware: Some(HardwareAddress([2, 0, 0, 0, 0, 1])),
            }),
            dns: Ok(Addresses::from_slice(&[Ipv4Addr::new(203, 0, 113, 10)]).unwrap()),
            static_address: None,
            gateway_requests: 0,
            lookups: Default::default(),
        }
    }
}

impl FakeStack {
    pub(crate) fn lookups_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.lookups.clone()
    }
}

impl NetStack for FakeStack {
    async fn dhcp_request(
        &mut self,
        _preferred: Option<Ipv4Addr>,
        _budget: RetryBudget,
    ) -> Result<Lease> {
        self.dhcp
    }

    async fn assign_static(&mut self, address: Ipv4Addr) -> Result<()> {
        self.static_address = Some(address);
        Ok(())
    }

    async fn resolve_gateway(&mut self, _router: Ipv4Addr, _budget: RetryBudget) -> Result<Gateway> {
        self.gateway_requests += 1;
        self.gateway
    }

    async fn lookup_ip(&mut self, host: &str, _budget: RetryBudget) -> Result<Addresses> {
        self.lookups.lock().unwrap().push(host.to_owned());
        self.dns.clone()
    }
}

pub(crate) struct FakeTimeSource {
    result: Result<i64>,
    pub(crate) requests: usize,
}

impl FakeTimeSource {
    pub(crate) fn succeeding(offset: i64) -> Self {
        Self {
            result: Ok(offset),
            requests: 0,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            result: Err(Error::Timeout),
            requests: 0,
        }
    }
}

impl TimeSource for FakeTimeSource {
    async fn request_offset(&mut self, _server: Ipv4Addr, _budget: RetryBudget) -> Result<i64> {
        self.requests += 1;
        self.result
    }
}

/// How a [`FakeBroker`] behaves over its lifetime.
#[derive(Default)]
pub(crate) struct SessionScript {
    /// Number of dials that never finish their handshake.
    pub(crate) handshake_failures: usize,

    /// Polls before the connect request is acknowledged, `None` to never acknowledge it.
    pub(crate) ack_after_polls: Option<usize>,
    pub(crate) reject: bool,
    pub(crate) start_connect_error: Option<Error>,

    pub(crate) disconnect_after_publishes: Option<usize>,
    pub(crate) disconnect_after_housekeeping: Option<usize>,

    /// How long each publish takes to go out.
    pub(crate) publish_delay: Option<Duration>,

    pub(crate) close_hangs: bool,
}

pub(crate) struct PublishRecord {
    pub(crate) topic: String,
    pub(crate) message_id: u16,
    pub(crate) retain: bool,
    pub(crate) payload: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct BrokerLog {
    pub(crate) dials: Vec<(u16, SocketAddrV4)>,
    pub(crate) gateway_hints: Vec<Option<Gateway>>,
    pub(crate) handshake_polls: Vec<usize>,
    pub(crate) closes: usize,
    pub(crate) aborts: usize,
    pub(crate) credentials: Option<(&'static str, Option<&'static str>)>,
    pub(crate) client_id: Option<String>,
    pub(crate) auth_polls: usize,
    pub(crate) housekeeping: usize,
    pub(crate) sessions_connected: usize,
    pub(crate) published: Vec<PublishRecord>,
}

pub(crate) struct FakeBroker {
    script: SessionScript,
    state: TransportState,
    log: Arc<Mutex<BrokerLog>>,
}

impl FakeBroker {
    pub(crate) fn new(script: SessionScript) -> Self {
        Self {
            script,
            state: TransportState::Closed,
            log: Default::default(),
        }
    }

    pub(crate) fn log(&self) -> Arc<Mutex<BrokerLog>> {
        self.log.clone()
    }
}

impl Transport for FakeBroker {
    async fn dial(
        &mut self,
        local_port: u16,
        gateway: Option<&Gateway>,
        remote: SocketAddrV4,
    ) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.dials.push((local_port, remote));
        log.gateway_hints.push(gateway.copied());
        log.handshake_polls.push(0);

        self.state = if log.dials.len() <= self.script.handshake_failures {
            TransportState::Connecting
        } else {
            TransportState::Established
        };
        Ok(())
    }

    fn state(&self) -> TransportState {
        if self.state == TransportState::Connecting {
            if let Some(polls) = self.log.lock().unwrap().handshake_polls.last_mut() {
                *polls += 1;
            }
        }
        self.state
    }

    fn set_deadline(&mut self, _deadline: Instant) {}

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
        self.state = if self.script.close_hangs {
            TransportState::Closing
        } else {
            TransportState::Closed
        };
    }

    fn abort(&mut self) {
        self.log.lock().unwrap().aborts += 1;
        self.state = TransportState::Closed;
    }
}

impl Broker for FakeBroker {
    type Session<'s> = FakeSession<'s>;

    async fn start_connect<'s>(
        &'s mut self,
        credentials: Credentials,
        client_id: &'static str,
    ) -> Result<FakeSession<'s>> {
        {
            let mut log = self.log.lock().unwrap();
            log.credentials = credentials.login();
            log.client_id = Some(client_id.to_owned());
        }

        if let Some(e) = self.script.start_connect_error {
            return Err(e);
        }

        Ok(FakeSession {
            broker: self,
            phase: Phase::Pending,
            polls: 0,
            publishes: 0,
            housekeeping: 0,
            last_error: None,
        })
    }
}

#[derive(PartialEq, Eq)]
enum Phase {
    Pending,
    Connected,
    Closed,
}

pub(crate) struct FakeSession<'s> {
    broker: &'s mut FakeBroker,
    phase: Phase,
    polls: usize,
    publishes: usize,
    housekeeping: usize,
    last_error: Option<Error>,
}

impl Session for FakeSession<'_> {
    fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    async fn handle_next(&mut self) -> Result<()> {
        let script = &self.broker.script;
        let mut log = self.broker.log.lock().unwrap();

        match self.phase {
            Phase::Pending => {
                log.auth_polls += 1;
                self.polls += 1;

                if script.reject {
                    self.last_error = Some(Error::ConnectRejected);
                    return Err(Error::ConnectRejected);
                }

                if script.ack_after_polls.is_some_and(|n| self.polls >= n) {
                    self.phase = Phase::Connected;
                    log.sessions_connected += 1;
                }
                Ok(())
            }
            Phase::Connected => {
                log.housekeeping += 1;
                self.housekeeping += 1;

                if script
                    .disconnect_after_housekeeping
                    .is_some_and(|n| self.housekeeping >= n)
                {
                    self.phase = Phase::Closed;
                }
                Ok(())
            }
            Phase::Closed => {
                log.housekeeping += 1;
                Err(Error::NotConnected)
            }
        }
    }

    async fn publish(
        &mut self,
        flags: PublishFlags,
        topic: &str,
        message_id: u16,
        payload: &[u8],
    ) -> Result<()> {
        if self.phase != Phase::Connected {
            return Err(Error::NotConnected);
        }

        if let Some(delay) = self.broker.script.publish_delay {
            Timer::after(delay).await;
        }

        self.broker.log.lock().unwrap().published.push(PublishRecord {
            topic: topic.to_owned(),
            message_id,
            retain: flags.retain,
            payload: payload.to_vec(),
        });

        self.publishes += 1;
        if self
            .broker
            .script
            .disconnect_after_publishes
            .is_some_and(|n| self.publishes >= n)
        {
            self.phase = Phase::Closed;
        }
        Ok(())
    }

    fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    fn set_deadline(&mut self, _deadline: Instant) {}
}

type PacketScript = Box<dyn FnMut(usize) -> Result<Activity>>;

pub(crate) struct FakePacketIo {
    script: PacketScript,
    polls: Arc<AtomicUsize>,
}

impl FakePacketIo {
    /// `script` is called with the poll number and decides what that poll did.
    pub(crate) fn new(script: impl FnMut(usize) -> Result<Activity> + 'static) -> Self {
        Self {
            script: Box::new(script),
            polls: Default::default(),
        }
    }

    pub(crate) fn polls_handle(&self) -> Arc<AtomicUsize> {
        self.polls.clone()
    }
}

impl PacketIo for FakePacketIo {
    async fn recv_and_send(&mut self) -> Result<Activity> {
        let n = self.polls.fetch_add(1, Ordering::Relaxed);
        (self.script)(n)
    }
}
