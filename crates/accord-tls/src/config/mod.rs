//! Security policy configuration with builder pattern.
//!
//! The policy replaces the ambient security-manager globals of older
//! engines: every knob the handshake controller consults lives here and is
//! passed in at construction time.

use crate::alert::AlertDescription;
use crate::{CipherSuite, TlsVersion};

/// Security policy for outgoing TLS connections.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Oldest protocol version the policy allows.
    pub min_version: TlsVersion,
    /// Newest protocol version the policy allows.
    pub max_version: TlsVersion,
    /// Enabled cipher suites (in preference order).
    pub cipher_suites: Vec<CipherSuite>,
    /// Retry at a lower protocol version when a server mishandles the offer.
    pub auto_fallback: bool,
    /// Offer and accept session resumption.
    pub session_resumption: bool,
    /// How long a connection waits on a shared in-flight negotiation before
    /// proceeding on its own.
    pub session_wait_timeout_ms: u64,
    /// Warning alerts the connection may survive while staying open.
    pub continuable_warnings: Vec<AlertDescription>,
    /// Alert descriptions that count as version-related handshake rejection
    /// and are eligible for automatic fallback.
    pub fallback_triggers: Vec<AlertDescription>,
    /// Seconds a per-server feature-test result stays valid.
    pub feature_status_lifetime_secs: u64,
    /// Maximum number of cached sessions.
    pub session_cache_size: usize,
    /// Seconds a cached session stays resumable. 0 means no expiry.
    pub session_lifetime_secs: u64,
}

impl SecurityPolicy {
    /// Create a builder for a security policy.
    pub fn builder() -> SecurityPolicyBuilder {
        SecurityPolicyBuilder::default()
    }

    /// Whether the policy allows `version` at all.
    pub fn version_enabled(&self, version: TlsVersion) -> bool {
        version >= self.min_version && version <= self.max_version
    }

    /// Highest enabled version at or below `cap`, if any.
    pub fn highest_enabled_at_or_below(&self, cap: TlsVersion) -> Option<TlsVersion> {
        let candidate = self.max_version.min(cap);
        self.version_enabled(candidate).then_some(candidate)
    }

    /// Whether a failure with this description is version-related enough to
    /// retry at a lower protocol version.
    pub fn fallback_eligible(&self, description: AlertDescription) -> bool {
        !description.is_certificate_related() && self.fallback_triggers.contains(&description)
    }

    /// Whether a warning alert with this description may be survived.
    pub fn warning_continuable(&self, description: AlertDescription) -> bool {
        self.continuable_warnings.contains(&description)
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicyBuilder::default().build()
    }
}

/// Builder for `SecurityPolicy`.
#[derive(Debug)]
pub struct SecurityPolicyBuilder {
    min_version: TlsVersion,
    max_version: TlsVersion,
    cipher_suites: Vec<CipherSuite>,
    auto_fallback: bool,
    session_resumption: bool,
    session_wait_timeout_ms: u64,
    continuable_warnings: Vec<AlertDescription>,
    fallback_triggers: Vec<AlertDescription>,
    feature_status_lifetime_secs: u64,
    session_cache_size: usize,
    session_lifetime_secs: u64,
}

impl Default for SecurityPolicyBuilder {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Ssl3,
            max_version: TlsVersion::Tls12,
            cipher_suites: vec![
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA,
                CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
                CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA,
            ],
            auto_fallback: true,
            session_resumption: true,
            session_wait_timeout_ms: 20_000,
            continuable_warnings: vec![
                AlertDescription::UnrecognizedName,
                AlertDescription::NoRenegotiation,
                AlertDescription::UserCanceled,
            ],
            fallback_triggers: vec![
                AlertDescription::HandshakeFailure,
                AlertDescription::ProtocolVersion,
                AlertDescription::IllegalParameter,
                AlertDescription::UnexpectedMessage,
                AlertDescription::DecodeError,
                AlertDescription::DecryptError,
                AlertDescription::BadRecordMac,
                AlertDescription::InsufficientSecurity,
                AlertDescription::UnsupportedExtension,
            ],
            feature_status_lifetime_secs: 3_600,
            session_cache_size: 256,
            session_lifetime_secs: 7_200,
        }
    }
}

impl SecurityPolicyBuilder {
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    pub fn max_version(mut self, version: TlsVersion) -> Self {
        self.max_version = version;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    pub fn session_resumption(mut self, enabled: bool) -> Self {
        self.session_resumption = enabled;
        self
    }

    pub fn session_wait_timeout_ms(mut self, timeout: u64) -> Self {
        self.session_wait_timeout_ms = timeout;
        self
    }

    pub fn continuable_warnings(mut self, descriptions: &[AlertDescription]) -> Self {
        self.continuable_warnings = descriptions.to_vec();
        self
    }

    pub fn fallback_triggers(mut self, descriptions: &[AlertDescription]) -> Self {
        self.fallback_triggers = descriptions.to_vec();
        self
    }

    pub fn feature_status_lifetime_secs(mut self, secs: u64) -> Self {
        self.feature_status_lifetime_secs = secs;
        self
    }

    pub fn session_cache_size(mut self, size: usize) -> Self {
        self.session_cache_size = size;
        self
    }

    pub fn session_lifetime_secs(mut self, secs: u64) -> Self {
        self.session_lifetime_secs = secs;
        self
    }

    pub fn build(self) -> SecurityPolicy {
        SecurityPolicy {
            min_version: self.min_version,
            max_version: self.max_version,
            cipher_suites: self.cipher_suites,
            auto_fallback: self.auto_fallback,
            session_resumption: self.session_resumption,
            session_wait_timeout_ms: self.session_wait_timeout_ms,
            continuable_warnings: self.continuable_warnings,
            fallback_triggers: self.fallback_triggers,
            feature_status_lifetime_secs: self.feature_status_lifetime_secs,
            session_cache_size: self.session_cache_size,
            session_lifetime_secs: self.session_lifetime_secs,
        }
    }
}
