//! TLS alert protocol.

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes (RFC 5246 Section 7.2, plus legacy SSLv3 codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    /// Deprecated in TLS 1.2 (RFC 5246); replaced by BadRecordMac.
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    /// Reserved (SSLv3 legacy, not used in TLS 1.0+).
    NoCertificateReserved = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    /// Reserved (export cipher suites removed).
    ExportRestrictionReserved = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
}

/// A TLS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    /// The warning-level close_notify alert.
    pub fn close_notify() -> Self {
        Self {
            level: AlertLevel::Warning,
            description: AlertDescription::CloseNotify,
        }
    }

    /// Wire encoding: `[level, description]`.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }
}

impl AlertLevel {
    /// Convert from u8 to AlertLevel.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    /// Convert from u8 to AlertDescription.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(AlertDescription::CloseNotify),
            10 => Ok(AlertDescription::UnexpectedMessage),
            20 => Ok(AlertDescription::BadRecordMac),
            21 => Ok(AlertDescription::DecryptionFailed),
            22 => Ok(AlertDescription::RecordOverflow),
            30 => Ok(AlertDescription::DecompressionFailure),
            40 => Ok(AlertDescription::HandshakeFailure),
            41 => Ok(AlertDescription::NoCertificateReserved),
            42 => Ok(AlertDescription::BadCertificate),
            43 => Ok(AlertDescription::UnsupportedCertificate),
            44 => Ok(AlertDescription::CertificateRevoked),
            45 => Ok(AlertDescription::CertificateExpired),
            46 => Ok(AlertDescription::CertificateUnknown),
            47 => Ok(AlertDescription::IllegalParameter),
            48 => Ok(AlertDescription::UnknownCa),
            49 => Ok(AlertDescription::AccessDenied),
            50 => Ok(AlertDescription::DecodeError),
            51 => Ok(AlertDescription::DecryptError),
            60 => Ok(AlertDescription::ExportRestrictionReserved),
            70 => Ok(AlertDescription::ProtocolVersion),
            71 => Ok(AlertDescription::InsufficientSecurity),
            80 => Ok(AlertDescription::InternalError),
            86 => Ok(AlertDescription::InappropriateFallback),
            90 => Ok(AlertDescription::UserCanceled),
            100 => Ok(AlertDescription::NoRenegotiation),
            110 => Ok(AlertDescription::UnsupportedExtension),
            112 => Ok(AlertDescription::UnrecognizedName),
            _ => Err(v),
        }
    }

    /// Whether this description concerns the peer's certificate rather than
    /// the negotiation itself.
    pub fn is_certificate_related(self) -> bool {
        matches!(
            self,
            AlertDescription::BadCertificate
                | AlertDescription::UnsupportedCertificate
                | AlertDescription::CertificateRevoked
                | AlertDescription::CertificateExpired
                | AlertDescription::CertificateUnknown
                | AlertDescription::UnknownCa
                | AlertDescription::NoCertificateReserved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_values() {
        assert_eq!(AlertLevel::Warning as u8, 1);
        assert_eq!(AlertLevel::Fatal as u8, 2);
    }

    #[test]
    fn test_alert_level_from_u8() {
        assert_eq!(AlertLevel::from_u8(1).unwrap(), AlertLevel::Warning);
        assert_eq!(AlertLevel::from_u8(2).unwrap(), AlertLevel::Fatal);
        assert_eq!(AlertLevel::from_u8(0).unwrap_err(), 0);
        assert_eq!(AlertLevel::from_u8(255).unwrap_err(), 255);
    }

    #[test]
    fn test_alert_description_values() {
        assert_eq!(AlertDescription::CloseNotify as u8, 0);
        assert_eq!(AlertDescription::UnexpectedMessage as u8, 10);
        assert_eq!(AlertDescription::HandshakeFailure as u8, 40);
        assert_eq!(AlertDescription::IllegalParameter as u8, 47);
        assert_eq!(AlertDescription::ProtocolVersion as u8, 70);
        assert_eq!(AlertDescription::InsufficientSecurity as u8, 71);
        assert_eq!(AlertDescription::InternalError as u8, 80);
        assert_eq!(AlertDescription::UnrecognizedName as u8, 112);
    }

    #[test]
    fn test_alert_description_from_u8_roundtrip() {
        let codes: &[u8] = &[
            0, 10, 20, 21, 22, 30, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 60, 70, 71, 80,
            86, 90, 100, 110, 112,
        ];
        for &code in codes {
            let desc = AlertDescription::from_u8(code).unwrap();
            assert_eq!(desc as u8, code);
        }
    }

    #[test]
    fn test_alert_description_unknown() {
        assert!(AlertDescription::from_u8(5).is_err());
        assert!(AlertDescription::from_u8(109).is_err());
        assert!(AlertDescription::from_u8(255).is_err());
    }

    #[test]
    fn test_close_notify_bytes() {
        let alert = Alert::close_notify();
        assert_eq!(alert.to_bytes(), [1, 0]);
    }

    #[test]
    fn test_fatal_alert_bytes() {
        let alert = Alert {
            level: AlertLevel::Fatal,
            description: AlertDescription::HandshakeFailure,
        };
        assert_eq!(alert.to_bytes(), [2, 40]);
    }

    #[test]
    fn test_certificate_related() {
        assert!(AlertDescription::BadCertificate.is_certificate_related());
        assert!(AlertDescription::UnknownCa.is_certificate_related());
        assert!(!AlertDescription::HandshakeFailure.is_certificate_related());
        assert!(!AlertDescription::ProtocolVersion.is_certificate_related());
        assert!(!AlertDescription::CloseNotify.is_certificate_related());
    }
}
