//! Trusted-subnet admission for mutating requests.

use crate::{ConfigError, MetricError};
use ip_network::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// CIDR block whose members may submit metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet(IpNetwork);

impl TrustedSubnet {
    /// Parse `addr/prefix`. Host bits are cleared, so `10.1.2.3/8` is
    /// accepted as `10.0.0.0/8`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Subnet(text.to_string());
        let (addr, prefix) = text.trim().split_once('/').ok_or_else(invalid)?;
        let addr = IpAddr::from_str(addr).map_err(|_| invalid())?;
        let prefix = u8::from_str(prefix).map_err(|_| invalid())?;
        IpNetwork::new_truncate(addr, prefix)
            .map(TrustedSubnet)
            .map_err(|_| invalid())
    }

    /// Whether `addr` lies inside the subnet. IPv4-mapped IPv6 addresses
    /// are compared as IPv4.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
            v4 => v4,
        };
        self.0.contains(addr)
    }

    /// Admit `addr` or return [`MetricError::Authorization`]
    pub fn check(&self, addr: IpAddr) -> Result<(), MetricError> {
        if self.contains(addr) {
            Ok(())
        } else {
            Err(MetricError::Authorization(addr))
        }
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TrustedSubnet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check `addr` against an optional subnet; no subnet admits everyone
pub fn admit(subnet: Option<&TrustedSubnet>, addr: IpAddr) -> Result<(), MetricError> {
    match subnet {
        Some(subnet) => subnet.check(addr),
        None => Ok(()),
    }
}
