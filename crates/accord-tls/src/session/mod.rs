//! Session cache and shared-negotiation notification.
//!
//! Sessions are shared between connections to the same server through
//! `Rc<RefCell<_>>` handles: all access happens on the single
//! connection-processing context, so a resumability change made by one
//! sharer is visible to every other sharer before its next decision point.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::Zeroize;

use crate::{CipherSuite, ServerIdentity, TlsVersion};

/// Identifies a connection waiting on a shared in-flight negotiation.
pub type WaiterId = u64;

/// Outcome delivered to waiters once a shared negotiation resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Completed,
    Failed,
}

/// A resumable (or in-flight) negotiation with one server.
#[derive(Debug)]
pub struct Session {
    /// Server the session belongs to.
    pub server: ServerIdentity,
    /// Version the session was (or is being) negotiated at.
    pub version: TlsVersion,
    /// Cipher negotiated for the session, once known.
    pub cipher: Option<CipherSuite>,
    /// Resumption ticket or session identifier handed out by the server.
    pub ticket: Vec<u8>,
    /// False once any sharer determines the session cannot be reused.
    pub resumable: bool,
    /// True once the owning connection finished negotiating.
    pub negotiated: bool,
    /// When the session was created (seconds since UNIX epoch).
    pub created_at: u64,
    /// Connections parked on this negotiation.
    waiters: Vec<WaiterId>,
}

impl Session {
    fn new(server: ServerIdentity, version: TlsVersion) -> Self {
        Self {
            server,
            version,
            cipher: None,
            ticket: Vec::new(),
            resumable: true,
            negotiated: false,
            created_at: now_secs(),
            waiters: Vec::new(),
        }
    }

    /// Whether this session may be offered for resumption right now.
    pub fn offerable(&self) -> bool {
        self.resumable && self.negotiated && !self.ticket.is_empty()
    }

    /// Park a connection on this negotiation.
    pub fn subscribe(&mut self, waiter: WaiterId) {
        if !self.waiters.contains(&waiter) {
            self.waiters.push(waiter);
        }
    }

    /// Remove a parked connection (e.g. after its wait timed out).
    pub fn unsubscribe(&mut self, waiter: WaiterId) {
        self.waiters.retain(|w| *w != waiter);
    }

    /// Number of parked connections.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ticket.zeroize();
    }
}

/// Shared handle to a session; freed once the cache entry and every
/// connection holding it are gone.
pub type SessionHandle = Rc<RefCell<Session>>;

/// Per-server session cache.
///
/// Thread-unsafe by design: only the connection-processing context touches
/// it, so there is no locking.
pub struct SessionStore {
    sessions: HashMap<ServerIdentity, SessionHandle>,
    max_size: usize,
    /// Session lifetime in seconds. 0 means no expiry.
    lifetime_secs: u64,
    /// Wakeups produced by resolved negotiations, drained by the event loop.
    pending_wakeups: Vec<(WaiterId, NegotiationOutcome)>,
}

impl SessionStore {
    /// Create a store holding at most `max_size` sessions, each resumable
    /// for `lifetime_secs` seconds (0 = no expiry).
    pub fn new(max_size: usize, lifetime_secs: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            max_size,
            lifetime_secs,
            pending_wakeups: Vec::new(),
        }
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the live session for `server`, or create a fresh one pinned at
    /// `fresh_version`. The bool is true when the session was created by
    /// this call (the caller owns the negotiation).
    pub fn find_or_create(
        &mut self,
        server: &ServerIdentity,
        fresh_version: TlsVersion,
    ) -> (SessionHandle, bool) {
        let live = self.sessions.get(server).and_then(|handle| {
            let session = handle.borrow();
            (session.resumable && !self.is_expired(&session)).then(|| Rc::clone(handle))
        });
        if let Some(handle) = live {
            return (handle, false);
        }
        // Dead or missing entry either way.
        self.sessions.remove(server);

        if self.sessions.len() >= self.max_size {
            // Evict one entry; the handle keeps any sharers alive.
            if let Some(key) = self.sessions.keys().next().cloned() {
                self.sessions.remove(&key);
            }
        }

        let handle = Rc::new(RefCell::new(Session::new(server.clone(), fresh_version)));
        self.sessions.insert(server.clone(), Rc::clone(&handle));
        (handle, true)
    }

    /// Mark a session as unusable for resumption. Effective immediately for
    /// every sharer.
    pub fn invalidate(&mut self, handle: &SessionHandle) {
        handle.borrow_mut().resumable = false;
    }

    /// Drop the cache entry for `server`; sharers keep the session alive
    /// until their handles go away.
    pub fn remove(&mut self, server: &ServerIdentity) {
        self.sessions.remove(server);
    }

    /// Resolve an in-flight negotiation, waking every parked connection.
    pub fn complete_negotiation(&mut self, handle: &SessionHandle, outcome: NegotiationOutcome) {
        let waiters = {
            let mut session = handle.borrow_mut();
            match outcome {
                NegotiationOutcome::Completed => session.negotiated = true,
                NegotiationOutcome::Failed => session.resumable = false,
            }
            std::mem::take(&mut session.waiters)
        };
        self.pending_wakeups
            .extend(waiters.into_iter().map(|w| (w, outcome)));
    }

    /// Drain the wakeups produced since the last call. The event loop routes
    /// each to the waiting connection's `on_shared_session_resolved`.
    pub fn take_wakeups(&mut self) -> Vec<(WaiterId, NegotiationOutcome)> {
        std::mem::take(&mut self.pending_wakeups)
    }

    /// Remove every expired session from the cache.
    pub fn cleanup(&mut self) {
        if self.lifetime_secs == 0 {
            return;
        }
        let now = now_secs();
        let lifetime = self.lifetime_secs;
        self.sessions
            .retain(|_, handle| now.saturating_sub(handle.borrow().created_at) <= lifetime);
    }

    fn is_expired(&self, session: &Session) -> bool {
        if self.lifetime_secs == 0 {
            return false;
        }
        now_secs().saturating_sub(session.created_at) > self.lifetime_secs
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
