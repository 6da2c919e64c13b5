//! Transport protection choice shared by clients and servers

use crate::dtls::DtlsSettings;
use serde::{Deserialize, Serialize};
use zwaveip_core::{ZGW_DTLS_PORT, ZGW_UDP_PORT};

/// How a Z/IP connection is protected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Security {
    /// Plain UDP, default port 4123
    #[default]
    Udp,
    /// DTLS with a pre-shared key, default port 41230
    Dtls(DtlsSettings),
}

impl Security {
    /// Port used when an address does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            Security::Udp => ZGW_UDP_PORT,
            Security::Dtls(_) => ZGW_DTLS_PORT,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Security::Dtls(_))
    }
}
