use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use dns_types::protocol::deserialise;
use dns_types::protocol::serialise;
use dns_types::protocol::types::*;

/// Sends a single query to a single nameserver and hands back the
/// response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `address`, giving up after `timeout`.  The
    /// response is checked to be a response to this request, but its
    /// rcode is left for the caller to interpret.
    async fn query(
        &self,
        request: &Message,
        address: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Message, QueryError>;
}

/// Resolves a nameserver hostname to an address, using whatever
/// recursive resolver the environment provides.
#[async_trait]
pub trait ForwardResolver: Send + Sync {
    async fn resolve_a(&self, hostname: &DomainName) -> Result<Ipv4Addr, ResolveError>;
}

/// Plain DNS over UDP.  There is no TCP fallback on truncation: a
/// referral is only read for its authority section, which fits.
#[derive(Debug, Clone, Copy)]
pub struct UdpTransport {
    port: u16,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self { port: 53 }
    }

    /// Talk to nameservers on a non-standard port.
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn query(
        &self,
        request: &Message,
        address: Ipv4Addr,
        query_timeout: Duration,
    ) -> Result<Message, QueryError> {
        let serialised = request.to_octets().map_err(QueryError::Serialise)?;
        if serialised.len() > UDP_MESSAGE_MAX_LEN {
            return Err(QueryError::TooLong(serialised.len()));
        }

        let response = timeout(
            query_timeout,
            self.query_notimeout(address, &serialised),
        )
        .await
        .map_err(|_| QueryError::Timeout)??;

        if response_matches_request(request, &response) {
            Ok(response)
        } else {
            Err(QueryError::Mismatch)
        }
    }
}

impl UdpTransport {
    async fn query_notimeout(
        &self,
        address: Ipv4Addr,
        serialised: &BytesMut,
    ) -> Result<Message, QueryError> {
        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        sock.connect((address, self.port)).await?;
        sock.send(serialised).await?;

        let mut buf = vec![0u8; UDP_MESSAGE_MAX_LEN];
        let size = sock.recv(&mut buf).await?;
        Message::from_octets(&buf[..size]).map_err(QueryError::Deserialise)
    }
}

/// Very basic validation that a nameserver response matches a
/// message:
///
/// - Check the ID, opcode, and questions match the question.
///
/// - Check it is a response.
///
/// A non-zero rcode is not a mismatch.
pub fn response_matches_request(request: &Message, response: &Message) -> bool {
    if request.header.id != response.header.id {
        return false;
    }
    if !response.header.is_response {
        return false;
    }
    if request.header.opcode != response.header.opcode {
        return false;
    }
    if request.questions != response.questions {
        return false;
    }

    true
}

/// An error that can occur when querying a nameserver.
#[derive(Debug)]
pub enum QueryError {
    Timeout,
    Io(io::Error),
    Serialise(serialise::Error),
    TooLong(usize),
    Deserialise(deserialise::Error),
    Mismatch,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::Timeout => write!(f, "timed out"),
            QueryError::Io(error) => write!(f, "I/O error: {error}"),
            QueryError::Serialise(error) => write!(f, "could not serialise request: {error}"),
            QueryError::TooLong(len) => write!(f, "request of {len} octets does not fit in a datagram"),
            QueryError::Deserialise(error) => write!(f, "could not parse response: {error}"),
            QueryError::Mismatch => write!(f, "response does not match request"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Io(error) => Some(error),
            QueryError::Serialise(error) => Some(error),
            QueryError::Deserialise(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for QueryError {
    fn from(error: io::Error) -> Self {
        QueryError::Io(error)
    }
}

/// Forward resolution through the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl ForwardResolver for SystemResolver {
    async fn resolve_a(&self, hostname: &DomainName) -> Result<Ipv4Addr, ResolveError> {
        let addresses = lookup_host((hostname.to_hostname(), 0)).await?;
        first_ipv4(addresses).ok_or(ResolveError::NoAddress)
    }
}

fn first_ipv4(addresses: impl IntoIterator<Item = SocketAddr>) -> Option<Ipv4Addr> {
    addresses.into_iter().find_map(|address| match address.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    })
}

/// An error that can occur when forward-resolving a hostname.
#[derive(Debug)]
pub enum ResolveError {
    /// The name resolved, but not to any IPv4 address.
    NoAddress,
    Io(io::Error),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolveError::NoAddress => write!(f, "no IPv4 address"),
            ResolveError::Io(error) => write!(f, "lookup failed: {error}"),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::NoAddress => None,
            ResolveError::Io(error) => Some(error),
        }
    }
}

impl From<io::Error> for ResolveError {
    fn from(error: io::Error) -> Self {
        ResolveError::Io(error)
    }
}
