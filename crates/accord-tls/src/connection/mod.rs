//! Client handshake controller.
//!
//! The controller never blocks: it returns to its caller and is re-entered
//! through record-layer callbacks (`handle_message`, `handle_alert`,
//! `on_buffers_empty`, `on_transport_closed`), timer callbacks (`on_timer`),
//! and session wakeups (`on_shared_session_resolved`). Notifications for the
//! caller and timer requests are queued and drained by the surrounding event
//! loop; the engine holds no ambient globals.

mod close;
mod transition;


use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, trace, warn};

use accord_types::TlsError;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::config::SecurityPolicy;
use crate::handshake::offer::ClientHelloOffer;
use crate::handshake::HandshakeMsg;
use crate::probe::{FeatureTestStage, ServerFeatureCache};
use crate::record::{ContentType, RecordIo};
use crate::session::{NegotiationOutcome, SessionHandle, SessionStore, WaiterId};
use crate::{CipherSuite, ServerIdentity, TlsVersion};

use transition::Action;

/// Connection phase discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    NotConnected,
    SentClientHello,
    Negotiating,
    WaitingForSharedSession,
    Connected,
    PreClose,
    Closing,
    Closed,
    Retry,
}

/// Timers the engine asks the surrounding event loop to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Bounded wait on a shared in-flight negotiation.
    SessionWait,
    /// Dispatch of a scheduled fallback reconnect.
    RetryDispatch,
}

/// Timer requests drained by the event loop, which owns the timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Schedule { kind: TimerKind, delay_ms: u64 },
    Cancel { kind: TimerKind },
}

/// Notifications the engine queues for its caller.
#[derive(Debug)]
pub enum EngineEvent {
    HandshakeComplete,
    HandshakeFailed(TlsError),
    ConnectionClosed { clean: bool },
}

/// Everything that can re-enter the engine for one connection.
#[derive(Debug, Clone)]
pub enum Event {
    Message(HandshakeMsg),
    Alert(Alert),
    BuffersEmpty,
    TransportClosed,
    Timer(TimerKind),
    StopRequested,
}

/// Negotiation parameters for one side of the switch-over.
///
/// Two instances live per connection: the pending one being negotiated and
/// the current one in use. Pending becomes current once the peer's Finished
/// is accepted; it is replaced wholesale on retry or renegotiation.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    /// Protocol version offered, later the version the server settled on.
    pub version: TlsVersion,
    /// Cipher the server selected, once known.
    pub cipher: Option<CipherSuite>,
    /// Cipher suites carried in our ClientHello.
    pub offered_ciphers: Vec<CipherSuite>,
    /// Raw transcript of handshake message bytes; hashing happens below the
    /// record adapter.
    pub transcript: Vec<u8>,
    /// Session this negotiation fills or resumes.
    pub session: Option<SessionHandle>,
    /// Whether this connection drives the session's negotiation (false while
    /// parked on another connection's in-flight negotiation).
    pub owns_negotiation: bool,
}

impl NegotiationState {
    fn new(version: TlsVersion, session: Option<SessionHandle>, owns: bool) -> Self {
        Self {
            version,
            cipher: None,
            offered_ciphers: Vec::new(),
            transcript: Vec::new(),
            session,
            owns_negotiation: owns,
        }
    }

    fn waiting(version: TlsVersion, session: SessionHandle) -> Self {
        Self::new(version, Some(session), false)
    }

    fn add_transcript(&mut self, bytes: &[u8]) {
        self.transcript.extend_from_slice(bytes);
    }
}

/// How `start_handshake` proceeds after the session lookup.
enum StartPlan {
    /// Parked on another connection's negotiation.
    Wait,
    /// Resume the cached session.
    Resume(SessionHandle),
    /// Fresh negotiation, filling the given session if any.
    Fresh(Option<SessionHandle>),
}

/// The client handshake state machine for one connection.
pub struct HandshakeController<R: RecordIo> {
    id: WaiterId,
    server: ServerIdentity,
    policy: SecurityPolicy,
    record: R,
    sessions: Rc<RefCell<SessionStore>>,
    features: Rc<RefCell<ServerFeatureCache>>,

    phase: ConnectionPhase,
    pending: Option<NegotiationState>,
    current: Option<NegotiationState>,

    /// Feature-test stage the in-progress fresh negotiation is running.
    attempt_stage: FeatureTestStage,
    attempt_extensions: bool,
    resuming: bool,
    saw_change_cipher: bool,

    /// Whether the most recent transport operation was a write.
    last_io_write: bool,
    graceful_close_started: bool,
    close_errored: bool,
    terminal_notified: bool,
    failure_notified: bool,

    /// Externally raised error awaiting classification.
    raised: Option<Alert>,

    events: VecDeque<EngineEvent>,
    timer_ops: Vec<TimerOp>,
}

impl<R: RecordIo> HandshakeController<R> {
    pub fn new(
        id: WaiterId,
        server: ServerIdentity,
        policy: SecurityPolicy,
        record: R,
        sessions: Rc<RefCell<SessionStore>>,
        features: Rc<RefCell<ServerFeatureCache>>,
    ) -> Self {
        Self {
            id,
            server,
            policy,
            record,
            sessions,
            features,
            phase: ConnectionPhase::NotConnected,
            pending: None,
            current: None,
            attempt_stage: FeatureTestStage::Untested,
            attempt_extensions: true,
            resuming: false,
            saw_change_cipher: false,
            last_io_write: false,
            graceful_close_started: false,
            close_errored: false,
            terminal_notified: false,
            failure_notified: false,
            raised: None,
            events: VecDeque::new(),
            timer_ops: Vec::new(),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    /// Version of the established connection, if any.
    pub fn negotiated_version(&self) -> Option<TlsVersion> {
        self.current.as_ref().map(|c| c.version)
    }

    /// Cipher of the established connection, if any.
    pub fn negotiated_cipher(&self) -> Option<CipherSuite> {
        self.current.as_ref().and_then(|c| c.cipher)
    }

    /// Next queued caller notification.
    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }

    /// Drain queued timer requests; the event loop owns the timer queue.
    pub fn take_timer_ops(&mut self) -> Vec<TimerOp> {
        std::mem::take(&mut self.timer_ops)
    }

    /// Start (or restart) the handshake toward `preferred_next_phase`.
    ///
    /// Returns `WaitingForSharedSession` when another connection is already
    /// negotiating a session for the same server and `ignore_in_flight` is
    /// false; the wait is bounded by the policy's session-wait timeout.
    pub fn start_handshake(
        &mut self,
        preferred_next_phase: ConnectionPhase,
        ignore_in_flight: bool,
    ) -> ConnectionPhase {
        if self.raised.is_some() {
            return self.phase;
        }
        match self.phase {
            ConnectionPhase::PreClose | ConnectionPhase::Closing | ConnectionPhase::Closed => {
                return self.phase
            }
            _ => {}
        }
        match self.try_start(preferred_next_phase, ignore_in_flight) {
            Ok(phase) => phase,
            Err(err) => {
                warn!("{}: could not start handshake: {err}", self.server);
                self.handle_local_error(
                    AlertLevel::Fatal,
                    AlertDescription::InternalError,
                    ConnectionPhase::Closed,
                    false,
                )
            }
        }
    }

    /// Route a parsed handshake message from the record layer.
    pub fn handle_message(&mut self, msg: HandshakeMsg) -> ConnectionPhase {
        self.handle_event(Event::Message(msg))
    }

    /// Route an alert received from the peer.
    pub fn handle_alert(&mut self, alert: Alert) -> ConnectionPhase {
        self.handle_event(Event::Alert(alert))
    }

    /// Record-layer callback: the outgoing buffers drained.
    pub fn on_buffers_empty(&mut self) -> ConnectionPhase {
        self.handle_event(Event::BuffersEmpty)
    }

    /// Record-layer callback: the transport closed underneath us.
    pub fn on_transport_closed(&mut self) -> ConnectionPhase {
        self.handle_event(Event::TransportClosed)
    }

    /// Timer callback from the surrounding event loop.
    pub fn on_timer(&mut self, kind: TimerKind) -> ConnectionPhase {
        self.handle_event(Event::Timer(kind))
    }

    /// Idempotent forced shutdown; always routes through the close sequencer.
    pub fn stop(&mut self) -> ConnectionPhase {
        self.handle_event(Event::StopRequested)
    }

    /// Wakeup after the shared negotiation this connection was parked on
    /// resolved. Routed here by the event loop from `SessionStore` wakeups.
    pub fn on_shared_session_resolved(&mut self, outcome: NegotiationOutcome) -> ConnectionPhase {
        if self.phase != ConnectionPhase::WaitingForSharedSession {
            return self.phase;
        }
        self.cancel(TimerKind::SessionWait);
        match outcome {
            NegotiationOutcome::Completed => {
                let Some(mut pending) = self.pending.take() else {
                    return self.start_handshake(ConnectionPhase::SentClientHello, true);
                };
                let Some(handle) = pending.session.clone() else {
                    return self.start_handshake(ConnectionPhase::SentClientHello, true);
                };
                let (version, cipher) = {
                    let session = handle.borrow();
                    (session.version, session.cipher)
                };
                pending.version = version;
                pending.cipher = cipher;
                self.record.set_version(version);
                debug!(
                    "{}: adopting shared session at {} without own ClientHello",
                    self.server, version
                );
                self.current = Some(pending);
                self.events.push_back(EngineEvent::HandshakeComplete);
                self.set_phase(ConnectionPhase::Connected);
                self.phase
            }
            NegotiationOutcome::Failed => {
                debug!(
                    "{}: shared negotiation failed; negotiating independently",
                    self.server
                );
                self.pending = None;
                self.start_handshake(ConnectionPhase::SentClientHello, true)
            }
        }
    }

    /// Central entry point: every re-entry funnels through the transition
    /// table and the resulting actions.
    pub fn handle_event(&mut self, event: Event) -> ConnectionPhase {
        let step = transition::dispatch(self.phase, &event);
        let mut completed = true;
        for action in step.actions {
            if !self.perform(action, &event) {
                completed = false;
                break;
            }
        }
        if completed {
            if let Some(next) = step.next {
                self.set_phase(next);
            }
        }
        self.phase
    }

    // -----------------------------------------------------------------------
    // Action execution
    // -----------------------------------------------------------------------

    /// Run one action. Returns false when the action settled the phase
    /// itself (error routing, close sequencing, restarts).
    fn perform(&mut self, action: Action, event: &Event) -> bool {
        match action {
            Action::Ignore => {
                trace!("{}: ignoring {:?} in {:?}", self.server, event, self.phase);
                true
            }
            Action::AcceptServerHello => match event {
                Event::Message(HandshakeMsg::ServerHello {
                    version,
                    cipher,
                    session_id,
                }) => self.accept_server_hello(*version, *cipher, session_id),
                _ => true,
            },
            Action::TrackTranscript => {
                if let Event::Message(msg) = event {
                    self.track_transcript(msg);
                }
                true
            }
            Action::SendClientFlight => self.send_client_flight(),
            Action::StoreTicket => {
                if let Event::Message(HandshakeMsg::NewSessionTicket { ticket }) = event {
                    self.store_ticket(ticket);
                }
                true
            }
            Action::AcceptChangeCipher => {
                self.saw_change_cipher = true;
                true
            }
            Action::CompleteHandshake => match event {
                Event::Message(HandshakeMsg::Finished { payload }) => {
                    self.complete_handshake(payload.clone())
                }
                _ => true,
            },
            Action::RoutePeerAlert => {
                if let Event::Alert(alert) = event {
                    self.handle_peer_alert(*alert);
                }
                false
            }
            Action::ProtocolViolation(description) => {
                if let Event::Message(msg) = event {
                    warn!(
                        "{}: unexpected {} in {:?}",
                        self.server,
                        msg.name(),
                        self.phase
                    );
                }
                self.violation(description)
            }
            Action::ResumeClose => {
                self.continue_close();
                false
            }
            Action::AbandonSharedWait => {
                self.abandon_shared_wait();
                false
            }
            Action::DispatchRetry => {
                self.dispatch_retry();
                false
            }
            Action::PeerClosed => {
                self.on_peer_closed();
                false
            }
            Action::BeginStop => {
                debug!("{}: stop requested in {:?}", self.server, self.phase);
                self.close(ConnectionPhase::Closed);
                false
            }
            Action::BeginRenegotiation => {
                debug!("{}: HelloRequest; renegotiating", self.server);
                self.start_handshake(ConnectionPhase::SentClientHello, true);
                false
            }
        }
    }

    fn accept_server_hello(
        &mut self,
        version: TlsVersion,
        cipher: CipherSuite,
        session_id: &[u8],
    ) -> bool {
        let (offered_version, cipher_offered) = match self.pending.as_ref() {
            Some(p) => (p.version, p.offered_ciphers.contains(&cipher)),
            None => return self.violation(AlertDescription::InternalError),
        };
        if version > offered_version || !self.policy.version_enabled(version) {
            return self.violation(AlertDescription::IllegalParameter);
        }
        if !cipher_offered {
            return self.violation(AlertDescription::IllegalParameter);
        }

        self.record.set_version(version);

        let mut resumed = false;
        if self.resuming {
            let handle = self.pending.as_ref().and_then(|p| p.session.clone());
            if let Some(handle) = handle {
                let (ticket_match, session_version) = {
                    let session = handle.borrow();
                    (
                        !session.ticket.is_empty() && session.ticket == session_id,
                        session.version,
                    )
                };
                if ticket_match && session_version == version {
                    resumed = true;
                } else {
                    // The session can't actually be reused; drop it and
                    // finish as a full handshake into a fresh one.
                    let fresh = {
                        let mut store = self.sessions.borrow_mut();
                        store.invalidate(&handle);
                        store.remove(&self.server);
                        store.find_or_create(&self.server, version).0
                    };
                    if let Some(p) = self.pending.as_mut() {
                        p.session = Some(fresh);
                    }
                }
            }
            self.resuming = resumed;
        }
        if !resumed && !session_id.is_empty() {
            if let Some(handle) = self.pending.as_ref().and_then(|p| p.session.clone()) {
                handle.borrow_mut().ticket = session_id.to_vec();
            }
        }

        if let Some(p) = self.pending.as_mut() {
            p.version = version;
            p.cipher = Some(cipher);
        }
        debug!(
            "{}: ServerHello {} cipher 0x{:04X} (resumed: {resumed})",
            self.server, version, cipher.0
        );
        true
    }

    fn track_transcript(&mut self, msg: &HandshakeMsg) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        match msg {
            HandshakeMsg::Certificate { payload }
            | HandshakeMsg::ServerKeyExchange { payload }
            | HandshakeMsg::Finished { payload } => pending.add_transcript(payload),
            HandshakeMsg::NewSessionTicket { ticket } => pending.add_transcript(ticket),
            _ => {}
        }
    }

    /// Send the client flight answering ServerHelloDone. Key-exchange and
    /// verify-data bytes are assembled below the record adapter.
    fn send_client_flight(&mut self) -> bool {
        let sent = self
            .record
            .send_record(ContentType::Handshake, &[]) // ClientKeyExchange
            .and_then(|()| self.record.send_record(ContentType::ChangeCipherSpec, &[1]))
            .and_then(|()| self.record.send_record(ContentType::Handshake, &[])); // Finished
        self.last_io_write = true;
        match sent {
            Ok(()) => true,
            Err(err) => {
                warn!("{}: client flight failed: {err}", self.server);
                self.handle_local_error(
                    AlertLevel::Fatal,
                    AlertDescription::InternalError,
                    ConnectionPhase::Closed,
                    false,
                );
                false
            }
        }
    }

    fn store_ticket(&mut self, ticket: &[u8]) {
        if let Some(handle) = self.pending.as_ref().and_then(|p| p.session.clone()) {
            handle.borrow_mut().ticket = ticket.to_vec();
        }
    }

    fn complete_handshake(&mut self, finished_payload: Vec<u8>) -> bool {
        if !self.saw_change_cipher {
            return self.violation(AlertDescription::UnexpectedMessage);
        }
        let Some(mut pending) = self.pending.take() else {
            return self.violation(AlertDescription::InternalError);
        };
        pending.add_transcript(&finished_payload);

        if self.resuming {
            // Abbreviated handshake: the server finished first; answer with
            // our own ChangeCipherSpec and Finished.
            let sent = self
                .record
                .send_record(ContentType::ChangeCipherSpec, &[1])
                .and_then(|()| self.record.send_record(ContentType::Handshake, &[]));
            self.last_io_write = true;
            if let Err(err) = sent {
                warn!("{}: abbreviated flight failed: {err}", self.server);
                self.pending = Some(pending);
                self.handle_local_error(
                    AlertLevel::Fatal,
                    AlertDescription::InternalError,
                    ConnectionPhase::Closed,
                    false,
                );
                return false;
            }
        }

        if let Some(handle) = pending.session.clone() {
            {
                let mut session = handle.borrow_mut();
                session.version = pending.version;
                session.cipher = pending.cipher;
            }
            self.sessions
                .borrow_mut()
                .complete_negotiation(&handle, NegotiationOutcome::Completed);
        }
        self.features
            .borrow_mut()
            .record_success(&self.server, pending.version, self.attempt_extensions);

        debug!(
            "{}: handshake complete at {} (resumed: {})",
            self.server, pending.version, self.resuming
        );
        self.current = Some(pending);
        self.resuming = false;
        self.events.push_back(EngineEvent::HandshakeComplete);
        true
    }

    fn abandon_shared_wait(&mut self) {
        if let Some(handle) = self.pending.as_ref().and_then(|p| p.session.clone()) {
            handle.borrow_mut().unsubscribe(self.id);
        }
        self.pending = None;
        debug!(
            "{}: shared-session wait timed out; negotiating independently",
            self.server
        );
        self.set_phase(ConnectionPhase::NotConnected);
        self.start_handshake(ConnectionPhase::SentClientHello, true);
    }

    fn dispatch_retry(&mut self) {
        self.pending = None;
        self.resuming = false;
        self.saw_change_cipher = false;
        self.set_phase(ConnectionPhase::NotConnected);
        self.start_handshake(ConnectionPhase::SentClientHello, true);
    }

    // -----------------------------------------------------------------------
    // Handshake start
    // -----------------------------------------------------------------------

    fn try_start(
        &mut self,
        preferred_next_phase: ConnectionPhase,
        ignore_in_flight: bool,
    ) -> Result<ConnectionPhase, TlsError> {
        let status = self.features.borrow().status(&self.server);
        // A recent successful configuration skips the probe ladder entirely.
        let (fresh_version, fresh_ext) = match status.last_working {
            Some((version, ext)) if self.policy.version_enabled(version) => (version, ext),
            _ => status
                .stage
                .offer(&self.policy)
                .ok_or(TlsError::UnsupportedVersion)?,
        };
        let running_stage = status.stage.as_running_test();

        let (version, extensions, resume, session) =
            match self.resolve_session(fresh_version, ignore_in_flight) {
                StartPlan::Wait => return Ok(self.phase),
                StartPlan::Resume(handle) => {
                    let version = handle.borrow().version;
                    (version, fresh_ext, Some(Rc::clone(&handle)), Some(handle))
                }
                StartPlan::Fresh(session) => (fresh_version, fresh_ext, None, session),
            };

        self.resuming = resume.is_some();
        if !self.resuming {
            self.features
                .borrow_mut()
                .record_attempt(&self.server, running_stage);
        }
        self.attempt_stage = running_stage;
        self.attempt_extensions = extensions;

        let offer =
            ClientHelloOffer::build(&self.server, &self.policy, version, extensions, resume.as_ref())?;
        let msg = offer.encode();

        self.record.set_version(version);
        self.record.send_record(ContentType::Handshake, &msg)?;
        self.last_io_write = true;

        let mut pending = NegotiationState::new(version, session, true);
        pending.offered_ciphers = offer.cipher_suites.clone();
        pending.add_transcript(&msg);
        self.pending = Some(pending);
        self.saw_change_cipher = false;

        debug!(
            "{}: offering {} (extensions: {}, resuming: {})",
            self.server, version, extensions, self.resuming
        );
        self.set_phase(preferred_next_phase);
        Ok(self.phase)
    }

    fn resolve_session(&mut self, fresh_version: TlsVersion, ignore_in_flight: bool) -> StartPlan {
        if !self.policy.session_resumption {
            return StartPlan::Fresh(None);
        }
        let (handle, created) = self
            .sessions
            .borrow_mut()
            .find_or_create(&self.server, fresh_version);
        if created {
            return StartPlan::Fresh(Some(handle));
        }

        let (negotiated, offerable, version, cipher) = {
            let session = handle.borrow();
            (
                session.negotiated,
                session.offerable(),
                session.version,
                session.cipher,
            )
        };

        if !negotiated {
            if ignore_in_flight {
                return StartPlan::Fresh(Some(handle));
            }
            handle.borrow_mut().subscribe(self.id);
            self.pending = Some(NegotiationState::waiting(version, Rc::clone(&handle)));
            self.schedule(TimerKind::SessionWait, self.policy.session_wait_timeout_ms);
            debug!(
                "{}: waiting on shared in-flight negotiation ({}ms bound)",
                self.server, self.policy.session_wait_timeout_ms
            );
            self.set_phase(ConnectionPhase::WaitingForSharedSession);
            return StartPlan::Wait;
        }

        let version_ok = self.policy.version_enabled(version);
        let cipher_ok = cipher.map_or(true, |c| self.policy.cipher_suites.contains(&c));
        if offerable && version_ok && cipher_ok {
            return StartPlan::Resume(handle);
        }

        // Recorded parameters are no longer acceptable; discard the session
        // and open a fresh one.
        debug!("{}: cached session unusable; starting fresh", self.server);
        let fresh = {
            let mut store = self.sessions.borrow_mut();
            store.invalidate(&handle);
            store.remove(&self.server);
            store.find_or_create(&self.server, fresh_version).0
        };
        StartPlan::Fresh(Some(fresh))
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn set_phase(&mut self, next: ConnectionPhase) {
        if self.phase != next {
            trace!("{}: phase {:?} -> {:?}", self.server, self.phase, next);
            self.phase = next;
        }
    }

    fn schedule(&mut self, kind: TimerKind, delay_ms: u64) {
        self.timer_ops.push(TimerOp::Schedule { kind, delay_ms });
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.timer_ops.push(TimerOp::Cancel { kind });
    }

    /// Route an unexpected (phase, message) combination into error handling.
    /// Always returns false.
    fn violation(&mut self, description: AlertDescription) -> bool {
        self.handle_local_error(
            AlertLevel::Fatal,
            description,
            ConnectionPhase::Closed,
            false,
        );
        false
    }
}
