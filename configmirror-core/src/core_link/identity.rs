//! Instance identity sent to the authority on registration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;
use url::Url;

/// Who this agent is, as far as the authority is concerned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub local_address: String,
}

impl InstanceIdentity {
    pub fn new(instance_id: impl Into<String>, local_address: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            local_address: local_address.into(),
        }
    }

    /// Build an identity, detecting the local address from the route to `server_url`
    /// unless one is given explicitly.
    pub fn resolve(
        instance_id: impl Into<String>,
        local_address: Option<String>,
        server_url: &str,
    ) -> Self {
        let local_address = local_address.unwrap_or_else(|| detect_local_address(server_url).to_string());
        Self::new(instance_id, local_address)
    }

    /// Generated id for operators who don't pick one
    pub fn generate_instance_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("agent-{}", &id[..8])
    }
}

/// Address of the interface that routes to `server_url`.
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick a route.
/// Falls back to loopback when the server cannot be resolved.
pub fn detect_local_address(server_url: &str) -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let target = match Url::parse(server_url) {
        Ok(url) => match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            _ => return fallback,
        },
        Err(_) => return fallback,
    };

    let detected = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect(&target)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip());

    match detected {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => fallback,
        Err(e) => {
            debug!("Could not detect local address towards {}: {}", target, e);
            fallback
        }
    }
}
