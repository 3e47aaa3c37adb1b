//! Decides which peers are subject to bandwidth limiting.

use ipnet::IpNet;
use std::net::SocketAddr;

/// LAN classification policy.
#[derive(Debug, Clone, Default)]
pub struct LanPolicy {
    limit_bandwidth_in_lan: bool,
    local_subnets: Vec<IpNet>,
}

impl LanPolicy {
    /// Build a policy from the node options.
    pub fn new(limit_bandwidth_in_lan: bool, local_subnets: Vec<IpNet>) -> Self {
        Self {
            limit_bandwidth_in_lan,
            local_subnets,
        }
    }

    /// Whether traffic with `remote` should go through the limiter.
    ///
    /// Unknown addresses are limited. Local subnets and loopback are not,
    /// unless limiting in the LAN is enabled.
    pub fn should_limit(&self, remote: Option<SocketAddr>) -> bool {
        if self.limit_bandwidth_in_lan {
            return true;
        }
        let Some(remote) = remote else {
            return true;
        };

        let ip = remote.ip().to_canonical();
        if self.local_subnets.iter().any(|net| net.contains(&ip)) {
            return false;
        }
        !ip.is_loopback()
    }
}
