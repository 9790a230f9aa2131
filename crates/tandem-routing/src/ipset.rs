//! CIDR blocks and allow-sets.
//!
//! Parsing is strict: an empty set, an unparseable address, an out-of-range
//! prefix, or host bits set below the prefix are all configuration errors.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RoutingError, RoutingResult};

/// A single IPv4 or IPv6 network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` falls inside this block. IPv4-mapped IPv6 addresses
    /// are compared as IPv4.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                u32::from(ip) & mask == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                u128::from(ip) & mask == u128::from(net)
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) }
}

impl FromStr for Cidr {
    type Err = RoutingError;

    /// Parse `a.b.c.d/n`, `x::y/n`, or a bare address (a host route).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RoutingError::InvalidCidr(s.to_string());
        let s_trim = s.trim();
        let (addr, prefix) = match s_trim.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s_trim, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        let host_bits_clear = match network {
            IpAddr::V4(v4) => u32::from(v4) & !v4_mask(prefix) == 0,
            IpAddr::V6(v6) => u128::from(v6) & !v6_mask(prefix) == 0,
        };
        if !host_bits_clear {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// A non-empty set of CIDR blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IpSet {
    blocks: Vec<Cidr>,
}

impl IpSet {
    /// Parse an allow-list. Empty or malformed input is rejected; it is
    /// never interpreted as "allow all".
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> RoutingResult<Self> {
        if entries.is_empty() {
            return Err(RoutingError::EmptyAllowList);
        }
        let blocks = entries
            .iter()
            .map(|e| e.as_ref().parse::<Cidr>())
            .collect::<RoutingResult<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.blocks.iter().any(|b| b.contains(ip))
    }

    pub fn blocks(&self) -> &[Cidr] {
        &self.blocks
    }
}

impl TryFrom<Vec<String>> for IpSet {
    type Error = RoutingError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IpSet> for Vec<String> {
    fn from(set: IpSet) -> Self {
        set.blocks.iter().map(Cidr::to_string).collect()
    }
}
