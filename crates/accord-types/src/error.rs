/// TLS handshake engine errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("alert received: {0}")]
    AlertReceived(String),
    #[error("record layer error: {0}")]
    RecordError(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("no usable cipher suite")]
    NoSharedCipherSuite,
    #[error("every protocol fallback step failed")]
    FallbackExhausted,
    #[error("session expired")]
    SessionExpired,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("internal error: {0}")]
    Internal(String),
}
