//! Client identity keys.

use std::borrow::Borrow;
use std::net::IpAddr;
use std::sync::Arc;

/// A key that identifies one caller in the rate table.
///
/// Keys are cheap to clone; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(Arc<str>);

impl ClientKey {
    /// Create a key from any text.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Create a key from an IP address.
    ///
    /// IPv4-mapped IPv6 addresses collapse to their IPv4 form so a dual-stack
    /// listener sees the same key for the same client.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self::new(ip.to_canonical().to_string())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
