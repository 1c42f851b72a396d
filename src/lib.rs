#![cfg_attr(feature = "no-std", no_std)]

#[cfg(feature = "no-std")]
use defmt::{debug, error, info, trace, warn};
#[cfg(feature = "std")]
use log::{debug, error, info, trace, warn};

pub mod bringup;
pub mod clock;
pub mod config;
pub mod display;
pub mod fatal;
pub mod mailbox;
pub mod net;
pub mod publisher;
pub mod pump;
pub mod reading;
pub mod sensor;

#[cfg(test)]
mod test;

pub use self::{
    config::{Config, ConfigError},
    display::DisplayMessage,
    mailbox::Mailbox,
    reading::Reading,
};

/// Capacity of the mailbox feeding the display renderer.
pub const DISPLAY_MAILBOX_CAPACITY: usize = 10;

/// Capacity of the mailbox feeding the broker publisher.
pub const TELEMETRY_MAILBOX_CAPACITY: usize = 10;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum Error {
    #[error("Timeout")]
    Timeout,

    #[error("WiFi join failed")]
    JoinFailed,

    #[error("DHCP failed")]
    DhcpFailed,

    #[error("Gateway unreachable")]
    GatewayUnreachable,

    #[error("DNS lookup failed")]
    DnsFailed,

    #[error("DNS returned no addresses")]
    NoAddresses,

    #[error("Time sync failed")]
    TimeSyncFailed,

    #[error("Dial failed")]
    DialFailed,

    #[error("Connect rejected")]
    ConnectRejected,

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error")]
    ProtocolError,

    #[error("Transport error")]
    TransportError,

    #[error("Sensor read failed")]
    SensorReadFailed,

    #[error("Serialization error")]
    SerializeError,
}

pub type Result<T> = core::result::Result<T, Error>;
