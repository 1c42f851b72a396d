use crate::warn;
use core::net::Ipv4Addr;
use embassy_time::Duration;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum ConfigError {
    #[error("No client identifier was configured")]
    MissingClientId,

    #[error("No WiFi SSID was configured")]
    MissingSsid,

    #[error("Broker address has no port")]
    MissingPort,

    #[error("Broker address has an empty host")]
    EmptyHost,

    #[error("Broker port is not a valid non-zero port number")]
    InvalidPort,

    #[error("Burst size must be at least one sample")]
    InvalidBurstSize,

    #[error("Display must have at least one column")]
    InvalidColumns,

    #[error("An interval or timeout was zero")]
    ZeroInterval,
}

/// Where the broker lives, as given in `host:port` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct BrokerAddress {
    pub host: &'static str,
    pub port: u16,
}

impl BrokerAddress {
    /// Splits at the last colon, so the host may itself contain colons.
    pub fn parse(s: &'static str) -> Result<Self, ConfigError> {
        let (host, port) = s.rsplit_once(':').ok_or(ConfigError::MissingPort)?;

        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port.is_empty() {
            return Err(ConfigError::MissingPort);
        }

        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidPort)?;
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(Self { host, port })
    }

    /// The host as a literal address, when it is one and needs no lookup.
    pub fn literal(&self) -> Option<Ipv4Addr> {
        self.host.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct WifiCredentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Credentials {
    pub username: Option<&'static str>,
    pub password: Option<&'static str>,
}

impl Credentials {
    pub fn new(username: Option<&'static str>, password: Option<&'static str>) -> Self {
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());

        if username.is_none() && password.is_some() {
            warn!("Broker password given without a username, it will not be sent");
        }

        Self { username, password }
    }

    /// The pair to send with a connect request, if any.
    pub fn login(&self) -> Option<(&'static str, Option<&'static str>)> {
        self.username.map(|u| (u, self.password))
    }
}

/// A bounded number of polls, each separated by `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct RetryBudget {
    pub attempts: u32,
    pub period: Duration,
}

impl RetryBudget {
    pub const fn new(attempts: u32, period: Duration) -> Self {
        Self { attempts, period }
    }

    /// Longest time the whole budget can take.
    pub fn total(&self) -> Duration {
        self.period * self.attempts
    }

    /// Polls `done` until it reports true or the budget runs out.
    pub async fn poll_until<F: FnMut() -> bool>(&self, mut done: F) -> crate::Result<()> {
        for _ in 0..self.attempts {
            if done() {
                return Ok(());
            }
            embassy_time::Timer::after(self.period).await;
        }

        if done() {
            Ok(())
        } else {
            Err(crate::Error::Timeout)
        }
    }
}

/// Per-step retry budgets and backoffs for everything that touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Budgets {
    pub join_backoff: Duration,
    pub dhcp: RetryBudget,
    pub gateway: RetryBudget,
    pub dns: RetryBudget,
    pub time_sync: RetryBudget,
    pub handshake: RetryBudget,
    pub authenticate: RetryBudget,
    pub close: RetryBudget,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            join_backoff: Duration::from_secs(5),
            dhcp: RetryBudget::new(3, Duration::from_secs(3)),
            gateway: RetryBudget::new(4, Duration::from_millis(500)),
            dns: RetryBudget::new(3, Duration::from_secs(1)),
            time_sync: RetryBudget::new(3, Duration::from_secs(5)),
            handshake: RetryBudget::new(50, Duration::from_millis(100)),
            authenticate: RetryBudget::new(50, Duration::from_millis(100)),
            close: RetryBudget::new(50, Duration::from_millis(100)),
        }
    }
}

impl Budgets {
    fn all(&self) -> [RetryBudget; 7] {
        [
            self.dhcp,
            self.gateway,
            self.dns,
            self.time_sync,
            self.handshake,
            self.authenticate,
            self.close,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub client_id: &'static str,
    pub broker: BrokerAddress,
    pub credentials: Credentials,
    pub wifi: WifiCredentials,
    pub topic: &'static str,

    pub operation_timeout: Duration,
    pub heartbeat_interval: Duration,

    pub sample_interval: Duration,
    pub burst_size: usize,
    pub inter_sample_delay: Duration,
    pub environment_min_read_interval: Duration,
    pub reference_voltage: f32,
    pub withhold_until_time_sync: bool,

    pub display_columns: usize,

    pub preferred_address: Option<Ipv4Addr>,
    pub time_server: &'static str,

    pub budgets: Budgets,
    pub reconnect_delay: Duration,
    pub narration_pause: Duration,
    pub packet_pump_idle: Duration,
    pub fatal_report_interval: Duration,
}

impl Config {
    pub fn new(
        client_id: &'static str,
        broker: &'static str,
        wifi: WifiCredentials,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            client_id,
            broker: BrokerAddress::parse(broker)?,
            credentials: Credentials::default(),
            wifi,
            topic: "pico-telemetry/readings",

            operation_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(45),

            sample_interval: Duration::from_secs(1),
            burst_size: 32,
            inter_sample_delay: Duration::from_micros(500),
            environment_min_read_interval: Duration::from_secs(2),
            reference_voltage: 3.3,
            withhold_until_time_sync: true,

            display_columns: 16,

            preferred_address: Some(Ipv4Addr::new(192, 168, 1, 99)),
            time_server: "pool.ntp.org",

            budgets: Budgets::default(),
            reconnect_delay: Duration::from_secs(1),
            narration_pause: Duration::from_secs(2),
            packet_pump_idle: Duration::from_millis(5),
            fatal_report_interval: Duration::from_secs(10),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        if self.wifi.ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if self.broker.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize);
        }
        if self.display_columns == 0 {
            return Err(ConfigError::InvalidColumns);
        }

        let intervals = [
            self.operation_timeout,
            self.heartbeat_interval,
            self.sample_interval,
            self.packet_pump_idle,
            self.fatal_report_interval,
        ];
        if intervals.iter().any(|d| d.as_ticks() == 0)
            || self
                .budgets
                .all()
                .iter()
                .any(|b| b.attempts == 0 || b.period.as_ticks() == 0)
        {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(())
    }
}
