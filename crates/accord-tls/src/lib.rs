#![forbid(unsafe_code)]
#![doc = "TLS client handshake engine for accord: decides which ClientHello to offer, when to fall back to an older protocol version, and how to close."]

pub mod alert;
pub mod config;
pub mod connection;
pub mod handshake;
pub mod probe;
pub mod record;
pub mod session;

use std::fmt;

/// TLS/SSL protocol version, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
}

impl TlsVersion {
    /// Wire encoding as (major, minor).
    pub fn wire(self) -> (u8, u8) {
        match self {
            TlsVersion::Ssl3 => (3, 0),
            TlsVersion::Tls10 => (3, 1),
            TlsVersion::Tls11 => (3, 2),
            TlsVersion::Tls12 => (3, 3),
        }
    }

    /// Decode a (major, minor) wire pair.
    pub fn from_wire(major: u8, minor: u8) -> Result<Self, (u8, u8)> {
        match (major, minor) {
            (3, 0) => Ok(TlsVersion::Ssl3),
            (3, 1) => Ok(TlsVersion::Tls10),
            (3, 2) => Ok(TlsVersion::Tls11),
            (3, 3) => Ok(TlsVersion::Tls12),
            other => Err(other),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLS 1.0",
            TlsVersion::Tls11 => "TLS 1.1",
            TlsVersion::Tls12 => "TLS 1.2",
        };
        f.write_str(s)
    }
}

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    // TLS 1.2 AEAD suites
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02F);
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC030);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02B);
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC02C);

    // CBC suites usable down to SSLv3/TLS 1.0
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0035);
    pub const TLS_RSA_WITH_3DES_EDE_CBC_SHA: Self = Self(0x000A);

    /// Oldest protocol version at which this suite may be offered.
    ///
    /// GCM suites require TLS 1.2; the legacy CBC suites go back to SSLv3.
    pub fn min_version(self) -> TlsVersion {
        match self.0 {
            0xC02B..=0xC030 => TlsVersion::Tls12,
            _ => TlsVersion::Ssl3,
        }
    }
}

/// Identity of a remote server; the key for session and feature-status caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    pub host: String,
    pub port: u16,
}

impl ServerIdentity {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
