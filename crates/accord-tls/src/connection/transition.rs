//! Phase transition table.
//!
//! `dispatch` is a total function over (phase, event): every combination
//! resolves to an explicit action list, so the compiler flags unhandled
//! pairs when a phase or event variant is added. `Step::next` is the phase
//! adopted when every action completes; actions that route into error
//! handling or close sequencing settle the phase themselves.

use crate::alert::AlertDescription;
use crate::handshake::HandshakeMsg;

use super::{ConnectionPhase, Event, TimerKind};

/// What the controller does in response to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Action {
    /// Validate and accept a ServerHello.
    AcceptServerHello,
    /// Fold an intermediate handshake message into the transcript.
    TrackTranscript,
    /// Answer ServerHelloDone with the client flight.
    SendClientFlight,
    /// Store a freshly issued resumption ticket.
    StoreTicket,
    /// Accept the peer's ChangeCipherSpec.
    AcceptChangeCipher,
    /// Accept the peer's Finished and promote pending to current.
    CompleteHandshake,
    /// Route a peer alert through the close sequencer.
    RoutePeerAlert,
    /// Unexpected (phase, message) combination.
    ProtocolViolation(AlertDescription),
    /// Buffer-empty callback continues a deferred close.
    ResumeClose,
    /// Shared-session wait timed out; negotiate independently.
    AbandonSharedWait,
    /// Scheduled fallback reconnect fires.
    DispatchRetry,
    /// The peer closed the transport.
    PeerClosed,
    /// Forced shutdown.
    BeginStop,
    /// HelloRequest while connected; replace the pending state and rerun.
    BeginRenegotiation,
    /// Nothing to do (stale timer, teardown noise, anything after Closed).
    Ignore,
}

pub(super) struct Step {
    /// Phase adopted once every action completes.
    pub next: Option<ConnectionPhase>,
    pub actions: Vec<Action>,
}

impl Step {
    fn stay(action: Action) -> Self {
        Self {
            next: None,
            actions: vec![action],
        }
    }

    fn to(next: ConnectionPhase, action: Action) -> Self {
        Self {
            next: Some(next),
            actions: vec![action],
        }
    }

    fn all(actions: Vec<Action>) -> Self {
        Self {
            next: None,
            actions,
        }
    }
}

pub(super) fn dispatch(phase: ConnectionPhase, event: &Event) -> Step {
    match phase {
        ConnectionPhase::NotConnected => match event {
            Event::Message(_) => {
                Step::stay(Action::ProtocolViolation(AlertDescription::UnexpectedMessage))
            }
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(_) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        ConnectionPhase::SentClientHello => match event {
            Event::Message(HandshakeMsg::ServerHello { .. }) => {
                Step::to(ConnectionPhase::Negotiating, Action::AcceptServerHello)
            }
            Event::Message(HandshakeMsg::HelloRequest) => Step::stay(Action::Ignore),
            Event::Message(_) => {
                Step::stay(Action::ProtocolViolation(AlertDescription::UnexpectedMessage))
            }
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(_) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        ConnectionPhase::Negotiating => match event {
            Event::Message(HandshakeMsg::Certificate { .. })
            | Event::Message(HandshakeMsg::ServerKeyExchange { .. }) => {
                Step::stay(Action::TrackTranscript)
            }
            Event::Message(HandshakeMsg::ServerHelloDone) => {
                Step::all(vec![Action::TrackTranscript, Action::SendClientFlight])
            }
            Event::Message(HandshakeMsg::NewSessionTicket { .. }) => {
                Step::all(vec![Action::TrackTranscript, Action::StoreTicket])
            }
            Event::Message(HandshakeMsg::ChangeCipherSpec) => {
                Step::stay(Action::AcceptChangeCipher)
            }
            Event::Message(HandshakeMsg::Finished { .. }) => {
                Step::to(ConnectionPhase::Connected, Action::CompleteHandshake)
            }
            Event::Message(HandshakeMsg::HelloRequest) => Step::stay(Action::Ignore),
            Event::Message(HandshakeMsg::ServerHello { .. }) => {
                Step::stay(Action::ProtocolViolation(AlertDescription::UnexpectedMessage))
            }
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(_) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        ConnectionPhase::WaitingForSharedSession => match event {
            Event::Message(_) => {
                Step::stay(Action::ProtocolViolation(AlertDescription::UnexpectedMessage))
            }
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(TimerKind::SessionWait) => Step::stay(Action::AbandonSharedWait),
            Event::Timer(TimerKind::RetryDispatch) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        ConnectionPhase::Connected => match event {
            Event::Message(HandshakeMsg::HelloRequest) => Step::stay(Action::BeginRenegotiation),
            Event::Message(_) => {
                Step::stay(Action::ProtocolViolation(AlertDescription::UnexpectedMessage))
            }
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(_) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        ConnectionPhase::PreClose | ConnectionPhase::Closing => match event {
            Event::Message(_) => Step::stay(Action::Ignore),
            Event::Alert(_) => Step::stay(Action::RoutePeerAlert),
            Event::BuffersEmpty => Step::stay(Action::ResumeClose),
            Event::TransportClosed => Step::stay(Action::PeerClosed),
            Event::Timer(_) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },

        // Terminal: events arriving after Closed are ignored.
        ConnectionPhase::Closed => Step::stay(Action::Ignore),

        ConnectionPhase::Retry => match event {
            Event::Message(_) => Step::stay(Action::Ignore),
            Event::Alert(_) => Step::stay(Action::Ignore),
            Event::BuffersEmpty => Step::stay(Action::Ignore),
            Event::TransportClosed => Step::stay(Action::Ignore),
            Event::Timer(TimerKind::RetryDispatch) => Step::stay(Action::DispatchRetry),
            Event::Timer(TimerKind::SessionWait) => Step::stay(Action::Ignore),
            Event::StopRequested => Step::stay(Action::BeginStop),
        },
    }
}
