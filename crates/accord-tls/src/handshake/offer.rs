//! ClientHello offer construction.
//!
//! The offered version, cipher set, session identifier, and extension
//! presence are the one piece of wire contract this engine owns.

use accord_types::TlsError;

use crate::config::SecurityPolicy;
use crate::session::SessionHandle;
use crate::{CipherSuite, ServerIdentity, TlsVersion};

/// Handshake message type byte for ClientHello.
const MSG_CLIENT_HELLO: u8 = 1;

/// signature_algorithms pairs offered with extensions:
/// rsa_pkcs1_sha256, ecdsa_secp256r1_sha256, rsa_pkcs1_sha1.
const SIGNATURE_ALGORITHMS: [(u8, u8); 3] = [(4, 1), (4, 3), (2, 1)];

/// The ClientHello the engine decides to put on the wire.
#[derive(Debug, Clone)]
pub struct ClientHelloOffer {
    pub version: TlsVersion,
    pub random: [u8; 32],
    /// Session identifier offered for resumption; empty for a fresh
    /// negotiation.
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    /// Whether TLS extensions are included (feature-test stages below
    /// `TestTls10Ext` omit them for servers that choke on extension blocks).
    pub extensions: bool,
    /// Host name carried in the server_name extension.
    pub server_name: String,
}

impl ClientHelloOffer {
    /// Build an offer for `server` at `version`.
    ///
    /// The cipher list is the policy's preference order filtered to suites
    /// usable at `version`; a resumption attempt narrows it further to the
    /// session's negotiated cipher and carries the session's ticket.
    pub fn build(
        server: &ServerIdentity,
        policy: &SecurityPolicy,
        version: TlsVersion,
        extensions: bool,
        resume: Option<&SessionHandle>,
    ) -> Result<Self, TlsError> {
        let mut random = [0u8; 32];
        getrandom::getrandom(&mut random)
            .map_err(|e| TlsError::Internal(format!("random gen failed: {e}")))?;

        let mut cipher_suites: Vec<CipherSuite> = policy
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| s.min_version() <= version)
            .collect();

        let mut session_id = Vec::new();
        if let Some(handle) = resume {
            let session = handle.borrow();
            if let Some(cipher) = session.cipher {
                cipher_suites.retain(|s| *s == cipher);
            }
            session_id = session.ticket.clone();
        }

        if cipher_suites.is_empty() {
            return Err(TlsError::NoSharedCipherSuite);
        }

        Ok(Self {
            version,
            random,
            session_id,
            cipher_suites,
            extensions,
            server_name: server.host.clone(),
        })
    }

    /// Serialize as a full handshake message (type + 24-bit length + body).
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(128);

        let (major, minor) = self.version.wire();
        body.push(major);
        body.push(minor);
        body.extend_from_slice(&self.random);

        body.push(self.session_id.len() as u8);
        body.extend_from_slice(&self.session_id);

        body.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            body.extend_from_slice(&suite.0.to_be_bytes());
        }

        // compression_methods: null only
        body.push(1);
        body.push(0);

        if self.extensions {
            let ext = self.encode_extensions();
            body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            body.extend_from_slice(&ext);
        }

        let mut msg = Vec::with_capacity(4 + body.len());
        msg.push(MSG_CLIENT_HELLO);
        let len = body.len() as u32;
        msg.push((len >> 16) as u8);
        msg.push((len >> 8) as u8);
        msg.push(len as u8);
        msg.extend_from_slice(&body);
        msg
    }

    fn encode_extensions(&self) -> Vec<u8> {
        let mut ext = Vec::new();

        // server_name (type 0): list of one host_name entry
        let host = self.server_name.as_bytes();
        ext.extend_from_slice(&0u16.to_be_bytes());
        ext.extend_from_slice(&((host.len() + 5) as u16).to_be_bytes());
        ext.extend_from_slice(&((host.len() + 3) as u16).to_be_bytes());
        ext.push(0); // name_type host_name
        ext.extend_from_slice(&(host.len() as u16).to_be_bytes());
        ext.extend_from_slice(host);

        // signature_algorithms (type 13), TLS 1.2 only
        if self.version >= TlsVersion::Tls12 {
            ext.extend_from_slice(&13u16.to_be_bytes());
            let list_len = SIGNATURE_ALGORITHMS.len() * 2;
            ext.extend_from_slice(&((list_len + 2) as u16).to_be_bytes());
            ext.extend_from_slice(&(list_len as u16).to_be_bytes());
            for (hash, sig) in SIGNATURE_ALGORITHMS {
                ext.push(hash);
                ext.push(sig);
            }
        }

        // renegotiation_info (type 0xFF01), empty for an initial handshake
        ext.extend_from_slice(&0xFF01u16.to_be_bytes());
        ext.extend_from_slice(&1u16.to_be_bytes());
        ext.push(0);

        ext
    }
}

/// Test/diagnostic helpers for inspecting an encoded ClientHello.
pub mod inspect {
    /// The (major, minor) version an encoded ClientHello offers.
    pub fn offered_version(msg: &[u8]) -> Option<(u8, u8)> {
        if msg.len() < 6 || msg[0] != super::MSG_CLIENT_HELLO {
            return None;
        }
        Some((msg[4], msg[5]))
    }

    /// Whether an encoded ClientHello carries an extensions block.
    pub fn has_extensions(msg: &[u8]) -> Option<bool> {
        if msg.len() < 6 || msg[0] != super::MSG_CLIENT_HELLO {
            return None;
        }
        let mut at = 6 + 32; // version + random
        let sid_len = *msg.get(at)? as usize;
        at += 1 + sid_len;
        let cs_len = u16::from_be_bytes([*msg.get(at)?, *msg.get(at + 1)?]) as usize;
        at += 2 + cs_len;
        let comp_len = *msg.get(at)? as usize;
        at += 1 + comp_len;
        Some(at < msg.len())
    }

    /// The session identifier an encoded ClientHello offers.
    pub fn offered_session_id(msg: &[u8]) -> Option<Vec<u8>> {
        if msg.len() < 6 || msg[0] != super::MSG_CLIENT_HELLO {
            return None;
        }
        let at = 6 + 32;
        let sid_len = *msg.get(at)? as usize;
        msg.get(at + 1..at + 1 + sid_len).map(|s| s.to_vec())
    }
}
