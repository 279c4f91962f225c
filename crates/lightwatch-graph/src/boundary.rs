//! Access boundaries (security groups) and the two access gates.
//!
//! Reaching the database takes two independent yeses: the network gate
//! (the caller's boundary must grant egress and the database's boundary
//! must admit ingress) and the credential gate (the generated secret).
//! Either can be swapped for a stricter one without touching the other.

use std::net::Ipv4Addr;

use lightwatch_core::LogicalId;
use serde::{Deserialize, Serialize};

use crate::credentials::GeneratedCredential;
use crate::graph::AttrRef;

/// The far end of a rule: who an ingress rule admits, or where an
/// egress rule may connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    AnyIpv4,
    Cidr { address: Ipv4Addr, prefix: u8 },
    /// Members of another access boundary.
    Boundary(AttrRef),
}

impl Peer {
    pub fn cidr(address: Ipv4Addr, prefix: u8) -> Self {
        Peer::Cidr {
            address,
            prefix: prefix.min(32),
        }
    }

    fn matches(&self, endpoint: &Endpoint) -> bool {
        match self {
            Peer::AnyIpv4 => true,
            Peer::Cidr { address, prefix } => {
                let mask = if *prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(*prefix))
                };
                u32::from(endpoint.address) & mask == u32::from(*address) & mask
            }
            Peer::Boundary(group) => endpoint.boundaries.contains(&group.target),
        }
    }

    /// Matches every IPv4 address.
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Peer::AnyIpv4 | Peer::Cidr { prefix: 0, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Tcp(u16),
    TcpRange { from: u16, to: u16 },
    AllTraffic,
}

impl Port {
    fn covers(&self, port: u16) -> bool {
        match self {
            Port::Tcp(p) => *p == port,
            Port::TcpRange { from, to } => (*from..=*to).contains(&port),
            Port::AllTraffic => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRule {
    pub peer: Peer,
    pub port: Port,
    pub description: Option<String>,
}

/// Outbound traffic a boundary allows. A boundary with no egress rules
/// denies all outbound traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressRule {
    pub peer: Peer,
    pub port: Port,
    pub description: Option<String>,
}

impl EgressRule {
    pub fn allow_all() -> Self {
        Self {
            peer: Peer::AnyIpv4,
            port: Port::AllTraffic,
            description: Some("Allow all outbound traffic by default".to_string()),
        }
    }

    /// Scoped to a bounded destination and specific ports.
    pub fn is_scoped(&self) -> bool {
        !self.peer.is_unbounded() && self.port != Port::AllTraffic
    }
}

/// A security group scoped to one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessBoundary {
    pub description: String,
    pub network: AttrRef,
    pub ingress: Vec<IngressRule>,
    pub egress: Vec<EgressRule>,
}

impl AccessBoundary {
    /// Open on one TCP port to any IPv4 address, egress open. The
    /// credential gate is what actually protects the port.
    pub fn database(network: AttrRef, port: u16) -> Self {
        Self {
            description: "Security group for light usage db".to_string(),
            network,
            ingress: vec![IngressRule {
                peer: Peer::AnyIpv4,
                port: Port::Tcp(port),
                description: Some(format!("from 0.0.0.0/0:{port}")),
            }],
            egress: vec![EgressRule::allow_all()],
        }
    }

    /// No ingress, no egress until granted with [`allow_egress`](Self::allow_egress).
    pub fn compute(network: AttrRef) -> Self {
        Self {
            description: "Security group for the usage writer functions".to_string(),
            network,
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// Grant outbound traffic to `peer` on `port`.
    pub fn allow_egress(mut self, peer: Peer, port: Port, description: impl Into<String>) -> Self {
        self.egress.push(EgressRule {
            peer,
            port,
            description: Some(description.into()),
        });
        self
    }
}

/// One end of a connection: its address and the boundaries it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub boundaries: Vec<LogicalId>,
}

/// A connection attempt against the database.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Network-layer allow/deny, in both directions.
pub trait NetworkGate {
    fn permits_ingress(&self, source: &Endpoint, port: u16) -> bool;
    fn permits_egress(&self, destination: &Endpoint, port: u16) -> bool;
}

/// Identity-layer allow/deny.
pub trait CredentialGate {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

impl NetworkGate for AccessBoundary {
    fn permits_ingress(&self, source: &Endpoint, port: u16) -> bool {
        self.ingress
            .iter()
            .any(|rule| rule.port.covers(port) && rule.peer.matches(source))
    }

    fn permits_egress(&self, destination: &Endpoint, port: u16) -> bool {
        self.egress
            .iter()
            .any(|rule| rule.port.covers(port) && rule.peer.matches(destination))
    }
}

impl CredentialGate for GeneratedCredential {
    fn authenticate(&self, username: &str, password: &str) -> bool {
        // Compare every byte so timing does not leak the matching prefix.
        let expected = self.password().as_bytes();
        let given = password.as_bytes();
        let mut diff = expected.len() ^ given.len();
        for (i, b) in expected.iter().enumerate() {
            diff |= usize::from(b ^ given.get(i).copied().unwrap_or(0));
        }
        username == self.username && diff == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    DeniedByNetwork,
    DeniedByCredentials,
}

/// Both gates must agree. The network gate is consulted first: the
/// source's boundary must let the traffic out and the destination's
/// boundary must let it in.
pub fn evaluate_access(
    source_boundary: &dyn NetworkGate,
    destination_boundary: &dyn NetworkGate,
    credentials: &dyn CredentialGate,
    request: &AccessRequest,
) -> AccessDecision {
    if !source_boundary.permits_egress(&request.destination, request.port)
        || !destination_boundary.permits_ingress(&request.source, request.port)
    {
        return AccessDecision::DeniedByNetwork;
    }
    if !credentials.authenticate(&request.username, &request.password) {
        return AccessDecision::DeniedByCredentials;
    }
    AccessDecision::Allowed
}
