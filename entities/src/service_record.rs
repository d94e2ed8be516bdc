//! The record a Receiver advertises on the local network and a Sender
//! discovers while browsing.

use std::net::IpAddr;

/// One advertised (or discovered) peer.
///
/// Equality and hashing are by `(name, service_type, domain)`, matching the
/// DNS-SD notion of identity: the same logical service re-announced with a
/// new address is still "the same" service record.
#[derive(Clone, Debug)]
pub struct ServiceRecord {
    /// `<hostname>-<first-8-of-uuid>`, unique per running Receiver instance.
    pub name: String,
    /// DNS-SD service type, e.g. `_file-sharing._websocket._tcp`.
    pub service_type: String,
    /// DNS-SD domain, normally `local`.
    pub domain: String,
    /// Resolved address of the advertising host.
    pub address: IpAddr,
    /// TCP port the HTTP signalling server listens on.
    pub port: u16,
}

impl ServiceRecord {
    /// The fully-qualified service instance name DNS-SD uses as identity,
    /// e.g. `my-host-abcd1234._file-sharing._websocket._tcp.local.`.
    pub fn instance_name(&self) -> String {
        format!(
            "{}.{}.{}.",
            self.name, self.service_type, self.domain
        )
    }

    /// Base URL of the Receiver's signalling HTTP server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl PartialEq for ServiceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.service_type == other.service_type
            && self.domain == other.domain
    }
}
impl Eq for ServiceRecord {}

impl std::hash::Hash for ServiceRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.service_type.hash(state);
        self.domain.hash(state);
    }
}
