//! Well-known services a spike generator can impersonate.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// A named service with a fixed transport protocol and destination port
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// tcp/21
    Ftp,
    /// tcp/22
    Ssh,
    /// udp/53
    Dns,
    /// tcp/80
    Http,
    /// tcp/443
    Https,
    /// udp/123
    Ntp,
    /// udp/161
    Snmp,
    /// tcp/993
    Imaps,
    /// tcp/3306
    Mysql,
    /// tcp/8080
    HttpsAlt,
    /// udp/6681
    P2p,
    /// udp/6682
    Bittorrent,
}

/// Every service, in the order shown to users
pub const ALL: [Service; 12] = [
    Service::Ftp,
    Service::Ssh,
    Service::Dns,
    Service::Http,
    Service::Https,
    Service::Ntp,
    Service::Snmp,
    Service::Imaps,
    Service::Mysql,
    Service::HttpsAlt,
    Service::P2p,
    Service::Bittorrent,
];

impl Service {
    /// The IP protocol number the service runs over
    #[must_use]
    pub fn protocol(self) -> u8 {
        match self {
            Service::Dns | Service::Ntp | Service::Snmp | Service::P2p | Service::Bittorrent => {
                IPPROTO_UDP
            }
            Service::Ftp
            | Service::Ssh
            | Service::Http
            | Service::Https
            | Service::Imaps
            | Service::Mysql
            | Service::HttpsAlt => IPPROTO_TCP,
        }
    }

    /// The well-known destination port
    #[must_use]
    pub fn port(self) -> u16 {
        match self {
            Service::Ftp => 21,
            Service::Ssh => 22,
            Service::Dns => 53,
            Service::Http => 80,
            Service::Https => 443,
            Service::Ntp => 123,
            Service::Snmp => 161,
            Service::Imaps => 993,
            Service::Mysql => 3306,
            Service::HttpsAlt => 8080,
            Service::P2p => 6681,
            Service::Bittorrent => 6682,
        }
    }

    /// The name accepted on the command line and in configuration
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Service::Ftp => "ftp",
            Service::Ssh => "ssh",
            Service::Dns => "dns",
            Service::Http => "http",
            Service::Https => "https",
            Service::Ntp => "ntp",
            Service::Snmp => "snmp",
            Service::Imaps => "imaps",
            Service::Mysql => "mysql",
            Service::HttpsAlt => "https_alt",
            Service::P2p => "p2p",
            Service::Bittorrent => "bittorrent",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = if self.protocol() == IPPROTO_TCP {
            "tcp"
        } else {
            "udp"
        };
        write!(f, "{} ({transport}/{})", self.name(), self.port())
    }
}

/// Error for an unrecognized service name
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown service '{0}', expected one of ftp, ssh, dns, http, https, ntp, snmp, imaps, mysql, https_alt, p2p, bittorrent")]
pub struct UnknownService(pub String);

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let wanted = input.trim().to_ascii_lowercase().replace('-', "_");
        ALL.into_iter()
            .find(|svc| svc.name() == wanted)
            .ok_or_else(|| UnknownService(input.to_string()))
    }
}
