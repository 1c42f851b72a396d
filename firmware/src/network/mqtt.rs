use core::{future::Future, net::SocketAddrV4};
use defmt::{Display2Format, debug, info, warn};
use embassy_net::{
    IpAddress, Stack,
    tcp::{State, TcpSocket},
};
use embassy_time::{Duration, Instant, with_deadline};
use pico_telemetry::{
    Error,
    config::Credentials,
    net::{Broker, Gateway, PublishFlags, Session, Transport, TransportState},
};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};

const TCP_BUFFER_SIZE: usize = 1024;
const MQTT_BUFFER_SIZE: usize = 512;
const MAX_PROPERTIES: usize = 5;

/// Idle time after which housekeeping sends a keep-alive ping.
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) struct BrokerBuffers {
    tcp_rx: [u8; TCP_BUFFER_SIZE],
    tcp_tx: [u8; TCP_BUFFER_SIZE],
    mqtt_rx: [u8; MQTT_BUFFER_SIZE],
    mqtt_tx: [u8; MQTT_BUFFER_SIZE],
}

impl BrokerBuffers {
    pub(crate) const fn new() -> Self {
        Self {
            tcp_rx: [0; TCP_BUFFER_SIZE],
            tcp_tx: [0; TCP_BUFFER_SIZE],
            mqtt_rx: [0; MQTT_BUFFER_SIZE],
            mqtt_tx: [0; MQTT_BUFFER_SIZE],
        }
    }
}

/// An MQTT broker over a single reusable TCP socket.
pub(crate) struct TcpBroker {
    socket: TcpSocket<'static>,
    mqtt_rx: &'static mut [u8; MQTT_BUFFER_SIZE],
    mqtt_tx: &'static mut [u8; MQTT_BUFFER_SIZE],
}

impl TcpBroker {
    pub(crate) fn new(stack: Stack<'static>, buffers: &'static mut BrokerBuffers) -> Self {
        let BrokerBuffers {
            tcp_rx,
            tcp_tx,
            mqtt_rx,
            mqtt_tx,
        } = buffers;

        Self {
            socket: TcpSocket::new(stack, tcp_rx, tcp_tx),
            mqtt_rx,
            mqtt_tx,
        }
    }
}

impl Transport for TcpBroker {
    async fn dial(
        &mut self,
        local_port: u16,
        gateway: Option<&Gateway>,
        remote: SocketAddrV4,
    ) -> pico_telemetry::Result<()> {
        // embassy-net allocates its own ephemeral port and routes through its configured gateway
        debug!("Requested local port {}", local_port);
        if let Some(gateway) = gateway {
            debug!("Gateway {}", Display2Format(&gateway.address));
        }

        info!("Connecting to MQTT broker {}", Display2Format(&remote));
        self.socket
            .connect((IpAddress::Ipv4(*remote.ip()), remote.port()))
            .await
            .map_err(|e| {
                warn!("Broker socket connection error: {:?}", e);
                Error::DialFailed
            })
    }

    fn state(&self) -> TransportState {
        match self.socket.state() {
            State::Closed | State::Listen | State::TimeWait => TransportState::Closed,
            State::SynSent | State::SynReceived => TransportState::Connecting,
            State::Established => TransportState::Established,
            State::FinWait1
            | State::FinWait2
            | State::CloseWait
            | State::Closing
            | State::LastAck => TransportState::Closing,
        }
    }

    fn set_deadline(&mut self, deadline: Instant) {
        self.socket
            .set_timeout(Some(deadline.saturating_duration_since(Instant::now())));
    }

    fn close(&mut self) {
        self.socket.close();
    }

    fn abort(&mut self) {
        self.socket.abort();
    }
}

impl Broker for TcpBroker {
    type Session<'s>
        = MqttSession<'s>
    where
        Self: 's;

    async fn start_connect<'s>(
        &'s mut self,
        credentials: Credentials,
        client_id: &'static str,
    ) -> pico_telemetry::Result<MqttSession<'s>> {
        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        config.add_client_id(client_id);
        if let Some((username, password)) = credentials.login() {
            config.add_username(username);
            if let Some(password) = password {
                config.add_password(password);
            }
        }
        config.max_packet_size = MQTT_BUFFER_SIZE as u32;

        let mut client = MqttClient::<_, MAX_PROPERTIES, _>::new(
            &mut self.socket,
            &mut self.mqtt_tx[..],
            MQTT_BUFFER_SIZE,
            &mut self.mqtt_rx[..],
            MQTT_BUFFER_SIZE,
            config,
        );

        // rust-mqtt waits for the CONNACK before returning
        client.connect_to_broker().await.map_err(|e| {
            warn!("MQTT connect error: {:?}", e);
            session_error(e)
        })?;
        info!("Connected to MQTT broker");

        Ok(MqttSession {
            client,
            connected: true,
            last_error: None,
            last_activity: Instant::now(),
            deadline: None,
        })
    }
}

pub(crate) struct MqttSession<'s> {
    client: MqttClient<'s, &'s mut TcpSocket<'static>, MAX_PROPERTIES, CountingRng>,
    connected: bool,
    last_error: Option<Error>,
    last_activity: Instant,
    deadline: Option<Instant>,
}

impl MqttSession<'_> {
    fn record(
        &mut self,
        outcome: Option<Result<(), ReasonCode>>,
    ) -> pico_telemetry::Result<()> {
        let error = match outcome {
            Some(Ok(())) | Some(Err(ReasonCode::NoMatchingSubscribers)) => {
                self.last_activity = Instant::now();
                return Ok(());
            }
            Some(Err(code)) => {
                warn!("MQTT error: {:?}", code);
                session_error(code)
            }
            None => {
                warn!("MQTT operation ran past its deadline");
                Error::Timeout
            }
        };

        self.connected = false;
        self.last_error = Some(error);
        Err(error)
    }
}

impl Session for MqttSession<'_> {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn handle_next(&mut self) -> pico_telemetry::Result<()> {
        if !self.connected {
            return Err(self.last_error.unwrap_or(Error::NotConnected));
        }

        if self.last_activity.elapsed() < PING_INTERVAL {
            return Ok(());
        }

        debug!("Sending keep-alive");
        let outcome = within(self.deadline, self.client.send_ping()).await;
        self.record(outcome)
    }

    async fn publish(
        &mut self,
        flags: PublishFlags,
        topic: &str,
        _message_id: u16,
        payload: &[u8],
    ) -> pico_telemetry::Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Packet identifiers are allocated by rust-mqtt
        let outcome = within(
            self.deadline,
            self.client
                .send_message(topic, payload, QualityOfService::QoS0, flags.retain),
        )
        .await;
        self.record(outcome)
    }

    fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }
}

async fn within<F>(deadline: Option<Instant>, operation: F) -> Option<Result<(), ReasonCode>>
where
    F: Future<Output = Result<(), ReasonCode>>,
{
    match deadline {
        Some(deadline) => with_deadline(deadline, operation).await.ok(),
        None => Some(operation.await),
    }
}

fn session_error(code: ReasonCode) -> Error {
    match code {
        ReasonCode::NotAuthorized
        | ReasonCode::BadUserNameOrPassword
        | ReasonCode::ClientIdNotValid => Error::ConnectRejected,
        ReasonCode::NetworkError => Error::TransportError,
        _ => Error::ProtocolError,
    }
}
