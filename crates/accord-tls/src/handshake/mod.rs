//! Handshake message surface.
//!
//! Byte-level parsing happens in the record layer; the engine receives
//! already-parsed messages and only routes and interprets them.

pub mod offer;

use crate::{CipherSuite, TlsVersion};

/// Parsed handshake messages the record layer hands back to the engine.
///
/// Certificate and key-exchange payloads stay opaque: their validation is an
/// external operation the engine merely sequences.
#[derive(Debug, Clone)]
pub enum HandshakeMsg {
    ServerHello {
        version: TlsVersion,
        cipher: CipherSuite,
        session_id: Vec<u8>,
    },
    Certificate {
        payload: Vec<u8>,
    },
    ServerKeyExchange {
        payload: Vec<u8>,
    },
    ServerHelloDone,
    NewSessionTicket {
        ticket: Vec<u8>,
    },
    ChangeCipherSpec,
    Finished {
        payload: Vec<u8>,
    },
    HelloRequest,
}

impl HandshakeMsg {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeMsg::ServerHello { .. } => "ServerHello",
            HandshakeMsg::Certificate { .. } => "Certificate",
            HandshakeMsg::ServerKeyExchange { .. } => "ServerKeyExchange",
            HandshakeMsg::ServerHelloDone => "ServerHelloDone",
            HandshakeMsg::NewSessionTicket { .. } => "NewSessionTicket",
            HandshakeMsg::ChangeCipherSpec => "ChangeCipherSpec",
            HandshakeMsg::Finished { .. } => "Finished",
            HandshakeMsg::HelloRequest => "HelloRequest",
        }
    }
}
