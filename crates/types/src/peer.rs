//! Peer addresses in `enode://` form.
//!
//! ```text
//! enode://<128 hex chars node id>@<ip>:<tcp port>[?discport=<udp port>]
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

const SCHEME: &str = "enode://";

/// Errors produced while parsing a peer address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerAddressError {
    #[error("peer address must start with {SCHEME}")]
    MissingScheme,

    #[error("peer address has no node id")]
    MissingNodeId,

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// A parsed static peer address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    node_id: [u8; 64],
    addr: SocketAddr,
    discovery_port: Option<u16>,
}

impl PeerAddress {
    /// 64-byte node public key.
    pub fn node_id(&self) -> &[u8; 64] {
        &self.node_id
    }

    /// TCP endpoint of the peer.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// UDP discovery port; defaults to the TCP port when not given.
    pub fn discovery_port(&self) -> u16 {
        self.discovery_port.unwrap_or(self.addr.port())
    }
}

impl FromStr for PeerAddress {
    type Err = PeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.trim().strip_prefix(SCHEME).ok_or(PeerAddressError::MissingScheme)?;
        let (id_hex, endpoint) = rest.split_once('@').ok_or(PeerAddressError::MissingNodeId)?;

        if id_hex.is_empty() {
            return Err(PeerAddressError::MissingNodeId);
        }
        if id_hex.len() != 128 {
            return Err(PeerAddressError::InvalidNodeId(format!(
                "expected 128 hex chars, got {}",
                id_hex.len()
            )));
        }
        let mut node_id = [0u8; 64];
        hex::decode_to_slice(id_hex, &mut node_id)
            .map_err(|e| PeerAddressError::InvalidNodeId(e.to_string()))?;

        let (hostport, query) = match endpoint.split_once('?') {
            Some((hp, q)) => (hp, Some(q)),
            None => (endpoint, None),
        };

        let (host, port) = hostport
            .rsplit_once(':')
            .ok_or_else(|| PeerAddressError::InvalidPort(format!("missing port in {hostport}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host
            .parse()
            .map_err(|_| PeerAddressError::InvalidHost(host.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| PeerAddressError::InvalidPort(port.to_string()))?;

        let discovery_port = match query {
            None => None,
            Some(q) => {
                let value = q
                    .strip_prefix("discport=")
                    .ok_or_else(|| PeerAddressError::InvalidQuery(q.to_string()))?;
                Some(
                    value
                        .parse()
                        .map_err(|_| PeerAddressError::InvalidPort(value.to_string()))?,
                )
            }
        };

        Ok(Self {
            node_id,
            addr: SocketAddr::new(ip, port),
            discovery_port,
        })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}@{}", hex::encode(self.node_id), self.addr)?;
        if let Some(port) = self.discovery_port {
            write!(f, "?discport={port}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = hex::encode(&self.node_id[..4]);
        write!(f, "PeerAddress({}..@{})", id, self.addr)
    }
}
