//! Network topology: one VPC, subnet tiers spread across availability zones.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::graph::AttrRef;

/// Routing class of a subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetKind {
    /// Routes to an internet gateway; hosts the NAT gateways.
    Public,
    /// Outbound internet through NAT only.
    PrivateWithEgress,
    /// No route to the internet at all.
    PrivateIsolated,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubnetKind::Public => "public",
            SubnetKind::PrivateWithEgress => "private-with-egress",
            SubnetKind::PrivateIsolated => "private-isolated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetTier {
    pub name: String,
    pub kind: SubnetKind,
    pub cidr_mask: u8,
}

/// An isolated VPC with its subnet tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    /// VPC block, always a /16.
    pub cidr: Ipv4Addr,
    pub max_azs: u8,
    pub nat_gateways: u32,
    pub tiers: Vec<SubnetTier>,
}

/// One concrete subnet produced by the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetBlock {
    pub tier: String,
    pub kind: SubnetKind,
    pub az_index: u8,
    pub cidr: String,
}

/// Where a resource is placed: a tier of a particular network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSelection {
    pub network: AttrRef,
    pub tier: String,
    pub kind: SubnetKind,
}

impl NetworkTopology {
    const VPC_MASK: u8 = 16;

    pub fn new(nat_gateways: u32, tiers: Vec<SubnetTier>) -> Self {
        Self {
            cidr: Ipv4Addr::new(10, 0, 0, 0),
            max_azs: 2,
            nat_gateways,
            tiers,
        }
    }

    /// The usage-pipeline layout: a public tier for NAT egress and an
    /// isolated tier for the database and functions.
    pub fn public_and_isolated(nat_gateways: u32, cidr_mask: u8) -> Self {
        Self::new(
            nat_gateways,
            vec![
                SubnetTier {
                    name: "public".to_string(),
                    kind: SubnetKind::Public,
                    cidr_mask,
                },
                SubnetTier {
                    name: "Private".to_string(),
                    kind: SubnetKind::PrivateIsolated,
                    cidr_mask,
                },
            ],
        )
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.tiers.is_empty() {
            return Err(GraphError::Network("at least one subnet tier is required".to_string()));
        }
        if self.max_azs == 0 {
            return Err(GraphError::Network("max_azs must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for tier in &self.tiers {
            if !names.insert(tier.name.as_str()) {
                return Err(GraphError::Network(format!("duplicate tier name `{}`", tier.name)));
            }
            if !(Self::VPC_MASK..=28).contains(&tier.cidr_mask) {
                return Err(GraphError::Network(format!(
                    "tier `{}` mask /{} does not fit a /16",
                    tier.name, tier.cidr_mask
                )));
            }
        }

        let has_public = self.has_kind(SubnetKind::Public);
        if self.nat_gateways > 0 && !has_public {
            return Err(GraphError::Network(
                "NAT gateways need a public tier to live in".to_string(),
            ));
        }
        if self.nat_gateways > u32::from(self.max_azs) {
            return Err(GraphError::Network(format!(
                "{} NAT gateways for {} availability zones",
                self.nat_gateways, self.max_azs
            )));
        }
        if self.has_kind(SubnetKind::PrivateWithEgress) && self.nat_gateways == 0 {
            return Err(GraphError::Network(
                "a private-with-egress tier needs at least one NAT gateway".to_string(),
            ));
        }

        let needed: u64 = self
            .tiers
            .iter()
            .map(|t| u64::from(self.max_azs) << (32 - u32::from(t.cidr_mask)))
            .sum();
        if needed > 1 << (32 - u32::from(Self::VPC_MASK)) {
            return Err(GraphError::Network(format!(
                "subnets need {needed} addresses, more than the /16 holds"
            )));
        }
        Ok(())
    }

    pub fn has_kind(&self, kind: SubnetKind) -> bool {
        self.tiers.iter().any(|t| t.kind == kind)
    }

    /// Select the first tier of `kind` in the network `network`.
    pub fn select(&self, network: AttrRef, kind: SubnetKind) -> GraphResult<SubnetSelection> {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.kind == kind)
            .ok_or_else(|| GraphError::Network(format!("no {kind} tier in topology")))?;
        Ok(SubnetSelection {
            network,
            tier: tier.name.clone(),
            kind,
        })
    }

    /// Carve concrete subnets out of the VPC block, tier by tier, one per
    /// availability zone. Larger subnets are laid out first so every block
    /// stays aligned to its own size.
    pub fn subnet_blocks(&self) -> Vec<SubnetBlock> {
        let mut order: Vec<&SubnetTier> = self.tiers.iter().collect();
        order.sort_by_key(|t| t.cidr_mask);

        let base = u32::from(self.cidr);
        let mut offset: u32 = 0;
        let mut blocks = Vec::new();
        for tier in order {
            let size = 1u32 << (32 - u32::from(tier.cidr_mask));
            for az_index in 0..self.max_azs {
                let addr = Ipv4Addr::from(base + offset);
                blocks.push(SubnetBlock {
                    tier: tier.name.clone(),
                    kind: tier.kind,
                    az_index,
                    cidr: format!("{addr}/{}", tier.cidr_mask),
                });
                offset += size;
            }
        }
        blocks
    }
}
