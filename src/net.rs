//! Interfaces to the radio, IP stack, time server and broker protocol.
//!
//! The drivers behind these are assumed to be correct; everything in this crate only sequences
//! them, bounds how long they may take, and recovers when they fail.

#![allow(async_fn_in_trait)]

use crate::config::{Credentials, RetryBudget};
use core::net::{Ipv4Addr, SocketAddrV4};
use embassy_time::Instant;

/// Most addresses a single DNS lookup will return.
pub const MAX_ADDRESSES: usize = 4;

pub type Addresses = heapless::Vec<Ipv4Addr, MAX_ADDRESSES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareAddress(pub [u8; 6]);

/// Address configuration obtained from a DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
}

/// The next hop for outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gateway {
    pub address: Ipv4Addr,

    /// Link-layer address, where the stack exposes it.
    pub hardware: Option<HardwareAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub enum TransportState {
    Closed,
    Connecting,
    Established,
    Closing,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct PublishFlags {
    pub retain: bool,
}

impl PublishFlags {
    /// Fire-and-forget, not retained.
    pub const AT_MOST_ONCE: Self = Self { retain: false };
}

/// What one turn of the packet pump did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct Activity {
    pub received: bool,
    pub sent: bool,
}

impl Activity {
    pub fn any(&self) -> bool {
        self.received || self.sent
    }
}

pub trait Radio {
    async fn join(&mut self, ssid: &str, password: &str) -> crate::Result<()>;
}

pub trait NetStack {
    /// Requests a lease, hinting `preferred` as the wanted address.
    async fn dhcp_request(
        &mut self,
        preferred: Option<Ipv4Addr>,
        budget: RetryBudget,
    ) -> crate::Result<Lease>;

    /// Binds `address` without asking anyone.
    async fn assign_static(&mut self, address: Ipv4Addr) -> crate::Result<()>;

    async fn resolve_gateway(
        &mut self,
        router: Ipv4Addr,
        budget: RetryBudget,
    ) -> crate::Result<Gateway>;

    async fn lookup_ip(&mut self, host: &str, budget: RetryBudget) -> crate::Result<Addresses>;
}

pub trait TimeSource {
    /// Asks `server` for the time, returning microseconds from device uptime to UNIX time.
    async fn request_offset(&mut self, server: Ipv4Addr, budget: RetryBudget)
        -> crate::Result<i64>;
}

/// A single outbound stream connection.
pub trait Transport {
    /// Starts opening a connection. Completion is observed through [`Transport::state`].
    async fn dial(
        &mut self,
        local_port: u16,
        gateway: Option<&Gateway>,
        remote: SocketAddrV4,
    ) -> crate::Result<()>;

    fn state(&self) -> TransportState;

    /// Bounds how long any single blocking operation on the connection may take.
    fn set_deadline(&mut self, deadline: Instant);

    /// Graceful close. Completion is observed through [`Transport::state`].
    fn close(&mut self);

    /// Drops the connection without a graceful close.
    fn abort(&mut self);
}

/// A broker reachable over a [`Transport`].
pub trait Broker: Transport {
    type Session<'s>: Session
    where
        Self: 's;

    /// Sends a connect request over the established transport.
    async fn start_connect<'s>(
        &'s mut self,
        credentials: Credentials,
        client_id: &'static str,
    ) -> crate::Result<Self::Session<'s>>;
}

/// One authenticated conversation with the broker.
pub trait Session {
    fn is_connected(&self) -> bool;

    /// Performs one round of protocol housekeeping: reads and handles whatever the broker has
    /// sent and sends any keep-alive that is due.
    async fn handle_next(&mut self) -> crate::Result<()>;

    async fn publish(
        &mut self,
        flags: PublishFlags,
        topic: &str,
        message_id: u16,
        payload: &[u8],
    ) -> crate::Result<()>;

    /// The error that ended the session, if one has been recorded.
    fn last_error(&self) -> Option<crate::Error>;

    fn set_deadline(&mut self, deadline: Instant);
}

/// The bottom of the network stack.
pub trait PacketIo {
    /// One receive poll and one transmit flush.
    async fn recv_and_send(&mut self) -> crate::Result<Activity>;
}

/// Runs `operation`, giving up with [`crate::Error::Timeout`] after `limit`.
pub async fn bounded<T, F>(limit: embassy_time::Duration, operation: F) -> crate::Result<T>
where
    F: core::future::Future<Output = crate::Result<T>>,
{
    embassy_time::with_timeout(limit, operation)
        .await
        .map_err(|_| crate::Error::Timeout)?
}
