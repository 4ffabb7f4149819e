//! Record-layer adapter.
//!
//! Framing, encryption, and MAC live below this interface; the engine only
//! decides which records to hand down and when.

use accord_types::TlsError;

use crate::TlsVersion;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

/// Interface the handshake engine drives the record layer through.
pub trait RecordIo {
    /// Queue a record for transmission.
    fn send_record(&mut self, content_type: ContentType, payload: &[u8]) -> Result<(), TlsError>;

    /// Pin the record layer to a protocol version.
    fn set_version(&mut self, version: TlsVersion);

    /// Whether the underlying transport is closed.
    fn closed(&self) -> bool;

    /// Whether the active protocol version requires a close_notify exchange
    /// on shutdown.
    fn send_closure(&self) -> bool;

    /// Drive buffered data toward the transport; returns true once the
    /// outgoing buffers are empty. `flush_all` forces pending application
    /// data out first.
    fn empty_buffers(&mut self, flush_all: bool) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_values() {
        assert_eq!(ContentType::ChangeCipherSpec as u8, 20);
        assert_eq!(ContentType::Alert as u8, 21);
        assert_eq!(ContentType::Handshake as u8, 22);
        assert_eq!(ContentType::ApplicationData as u8, 23);
    }
}
