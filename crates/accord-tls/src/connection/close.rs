//! Alert and close sequencing.
//!
//! Classifies failures as local or peer-raised, decides whether a close
//! alert goes out, walks the graceful/abrupt shutdown paths, and owns the
//! fallback decision: a version-related rejection becomes a `Retry` instead
//! of a close while the feature-test ladder has steps left.

use log::{debug, warn};

use accord_types::TlsError;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::probe::FeatureTestStage;
use crate::record::{ContentType, RecordIo};
use crate::session::NegotiationOutcome;
use crate::TlsVersion;

use super::{ConnectionPhase, EngineEvent, HandshakeController, TimerKind};

impl<R: RecordIo> HandshakeController<R> {
    /// Close the connection.
    ///
    /// Idempotent: a re-entrant call while teardown is already underway is a
    /// no-op returning the target phase. A graceful close flushes pending
    /// application data, sends close_notify when the negotiated version
    /// requires the closure exchange, and defers completion until the
    /// outgoing buffers drain.
    pub fn close(&mut self, preferred_next_phase: ConnectionPhase) -> ConnectionPhase {
        match self.phase {
            ConnectionPhase::Closed => return ConnectionPhase::Closed,
            ConnectionPhase::PreClose | ConnectionPhase::Closing => return preferred_next_phase,
            _ => {}
        }

        self.cancel(TimerKind::SessionWait);
        self.cancel(TimerKind::RetryDispatch);
        self.release_pending();

        let graceful = self.last_io_write
            && !self.graceful_close_started
            && !self.close_errored
            && !self.record.closed();
        if graceful {
            self.graceful_close_started = true;
            self.set_phase(ConnectionPhase::PreClose);
            self.record.empty_buffers(true);
            if self.record.send_closure() {
                if let Err(err) = self
                    .record
                    .send_record(ContentType::Alert, &Alert::close_notify().to_bytes())
                {
                    warn!("{}: close_notify failed: {err}", self.server);
                    self.close_errored = true;
                }
                self.last_io_write = true;
            }
            self.set_phase(ConnectionPhase::Closing);
            if !self.close_errored && !self.record.empty_buffers(false) {
                // Drain still pending; completion resumes from the
                // buffer-empty callback.
                return preferred_next_phase;
            }
        }
        self.finish_close()
    }

    /// Classify a locally detected failure.
    ///
    /// A version-related rejection with ladder steps left becomes a `Retry`;
    /// a policy-continuable warning is survived; anything else notifies the
    /// caller (unless already notified), sends the alert while the transport
    /// still accepts one, invalidates the session, and closes.
    pub fn handle_local_error(
        &mut self,
        level: AlertLevel,
        description: AlertDescription,
        next_phase: ConnectionPhase,
        user_already_notified: bool,
    ) -> ConnectionPhase {
        self.fail(level, description, next_phase, user_already_notified, true)
    }

    /// Record an externally raised error for later classification.
    pub fn raise_error(&mut self, alert: Alert) {
        self.raised = Some(alert);
    }

    /// Drain and classify an externally raised error. A no-op when nothing
    /// was raised.
    pub fn handle_raised_error(&mut self, next_phase: ConnectionPhase) -> ConnectionPhase {
        match self.raised.take() {
            Some(alert) => self.fail(alert.level, alert.description, next_phase, false, true),
            None => self.phase,
        }
    }

    /// Handle an alert received from the peer.
    pub(super) fn handle_peer_alert(&mut self, alert: Alert) {
        match self.phase {
            ConnectionPhase::Closed => return,
            ConnectionPhase::PreClose | ConnectionPhase::Closing => {
                // The peer's close_notify completes our own teardown.
                if alert.description == AlertDescription::CloseNotify {
                    self.finish_close();
                }
                return;
            }
            _ => {}
        }

        if alert.description == AlertDescription::CloseNotify {
            self.on_peer_close_notify();
            return;
        }

        if alert.level == AlertLevel::Warning && self.policy.warning_continuable(alert.description)
        {
            debug!(
                "{}: surviving warning alert {:?}",
                self.server, alert.description
            );
            return;
        }

        // Peer-raised: no alert goes back.
        self.fail(
            alert.level,
            alert.description,
            ConnectionPhase::Closed,
            false,
            false,
        );
    }

    /// Buffer-empty callback while a deferred close is pending.
    pub(super) fn continue_close(&mut self) {
        if !matches!(
            self.phase,
            ConnectionPhase::PreClose | ConnectionPhase::Closing
        ) {
            return;
        }
        if self.close_errored || self.record.empty_buffers(false) {
            self.finish_close();
        }
    }

    /// The transport closed underneath us.
    pub(super) fn on_peer_closed(&mut self) {
        match self.phase {
            ConnectionPhase::Closed => {}
            ConnectionPhase::PreClose | ConnectionPhase::Closing => {
                self.finish_close();
            }
            ConnectionPhase::SentClientHello | ConnectionPhase::Negotiating => {
                // A server that drops the connection mid-handshake is the
                // classic version-intolerance signal.
                self.fail(
                    AlertLevel::Fatal,
                    AlertDescription::HandshakeFailure,
                    ConnectionPhase::Closed,
                    false,
                    false,
                );
            }
            ConnectionPhase::Connected => {
                // Truncation when the version requires a closure exchange.
                if self.record.send_closure() {
                    self.close_errored = true;
                }
                self.close(ConnectionPhase::Closed);
            }
            ConnectionPhase::NotConnected
            | ConnectionPhase::WaitingForSharedSession
            | ConnectionPhase::Retry => {
                self.close_errored = true;
                self.close(ConnectionPhase::Closed);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn fail(
        &mut self,
        level: AlertLevel,
        description: AlertDescription,
        next_phase: ConnectionPhase,
        user_already_notified: bool,
        send_alert: bool,
    ) -> ConnectionPhase {
        if self.phase == ConnectionPhase::Closed {
            return ConnectionPhase::Closed;
        }

        if self.fallback_applicable(description) {
            return self.begin_retry(description);
        }

        if level == AlertLevel::Warning && self.policy.warning_continuable(description) {
            return self.phase;
        }

        // A failure before any handshake completed surfaces once.
        if self.current.is_none() && !user_already_notified && !self.failure_notified {
            self.failure_notified = true;
            let error = self.error_for(description, !send_alert);
            self.events.push_back(EngineEvent::HandshakeFailed(error));
        }

        if send_alert && !self.record.closed() {
            let alert = Alert { level, description };
            let _ = self
                .record
                .send_record(ContentType::Alert, &alert.to_bytes());
            self.last_io_write = true;
        }

        // Only the negotiation owner may poison the session; a parked waiter
        // failing for its own reasons leaves the shared session alone.
        if let Some(pending) = self.pending.as_ref() {
            if pending.owns_negotiation {
                if let Some(handle) = pending.session.clone() {
                    self.sessions.borrow_mut().invalidate(&handle);
                }
            }
        }

        self.close_errored = true;
        self.close(next_phase)
    }

    /// Whether this failure should become a fallback retry instead of a
    /// close.
    fn fallback_applicable(&self, description: AlertDescription) -> bool {
        if !self.policy.auto_fallback || !self.policy.fallback_eligible(description) {
            return false;
        }
        if !matches!(
            self.phase,
            ConnectionPhase::SentClientHello | ConnectionPhase::Negotiating
        ) {
            return false;
        }
        let Some(pending) = self.pending.as_ref() else {
            return false;
        };
        // Only offers newer than SSLv3 have somewhere to fall to, and a
        // server already probed down to SSLv3-only is out of steps.
        if pending.version <= TlsVersion::Ssl3 {
            return false;
        }
        if self.attempt_stage == FeatureTestStage::TestSsl3Only {
            return false;
        }
        match self.attempt_stage.downgrade() {
            Some(next) => next.offer(&self.policy).is_some(),
            None => false,
        }
    }

    fn begin_retry(&mut self, description: AlertDescription) -> ConnectionPhase {
        if let Some(pending) = self.pending.take() {
            if let Some(handle) = pending.session {
                let mut store = self.sessions.borrow_mut();
                if pending.owns_negotiation && !handle.borrow().negotiated {
                    store.complete_negotiation(&handle, NegotiationOutcome::Failed);
                } else {
                    store.invalidate(&handle);
                }
                store.remove(&self.server);
            }
        }
        let next = self.features.borrow_mut().advance(&self.server);
        warn!(
            "{}: handshake rejected ({:?}) at {:?}; falling back to {:?}",
            self.server, description, self.attempt_stage, next
        );
        self.resuming = false;
        self.saw_change_cipher = false;
        self.set_phase(ConnectionPhase::Retry);
        self.schedule(TimerKind::RetryDispatch, 0);
        ConnectionPhase::Retry
    }

    fn finish_close(&mut self) -> ConnectionPhase {
        self.release_pending();
        self.set_phase(ConnectionPhase::Closed);
        if !self.terminal_notified {
            self.terminal_notified = true;
            let clean = !self.close_errored;
            debug!("{}: closed (clean: {clean})", self.server);
            self.events.push_back(EngineEvent::ConnectionClosed { clean });
        }
        ConnectionPhase::Closed
    }

    /// Detach from the pending negotiation: unpark from the session and, if
    /// we drove a negotiation that will never finish, unblock its sharers.
    fn release_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(handle) = pending.session {
            handle.borrow_mut().unsubscribe(self.id);
            if pending.owns_negotiation && !handle.borrow().negotiated {
                self.sessions
                    .borrow_mut()
                    .complete_negotiation(&handle, NegotiationOutcome::Failed);
            }
        }
    }

    fn on_peer_close_notify(&mut self) {
        match self.phase {
            ConnectionPhase::SentClientHello | ConnectionPhase::Negotiating => {
                // Handshake truncated; candidate for version fallback.
                self.fail(
                    AlertLevel::Fatal,
                    AlertDescription::HandshakeFailure,
                    ConnectionPhase::Closed,
                    false,
                    false,
                );
            }
            _ => {
                // Orderly shutdown: answer in kind, then finish cleanly.
                self.record.empty_buffers(true);
                if self.record.send_closure() && !self.record.closed() {
                    let _ = self
                        .record
                        .send_record(ContentType::Alert, &Alert::close_notify().to_bytes());
                    self.last_io_write = true;
                }
                self.graceful_close_started = true;
                self.close(ConnectionPhase::Closed);
            }
        }
    }

    fn error_for(&self, description: AlertDescription, peer_raised: bool) -> TlsError {
        if self.policy.auto_fallback && self.policy.fallback_eligible(description) {
            // Eligible descriptions only reach here once the ladder is out
            // of steps (or the policy blocks the next one).
            TlsError::FallbackExhausted
        } else if peer_raised {
            TlsError::AlertReceived(format!("{description:?}"))
        } else {
            TlsError::HandshakeFailed(format!("{description:?}"))
        }
    }
}
