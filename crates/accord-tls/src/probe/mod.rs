//! Per-server protocol feature probing.
//!
//! Servers that mishandle extensions or newer protocol versions are walked
//! down a fixed ladder of feature tests; the result is cached per server so
//! later connections skip straight to a configuration the server accepts.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SecurityPolicy;
use crate::{ServerIdentity, TlsVersion};

/// Which protocol variant to try next for a server.
///
/// The ladder runs newest-first; `downgrade` steps strictly toward
/// `TestSsl3Only` and never back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureTestStage {
    /// Never probed; offer the newest configuration the policy allows.
    Untested,
    /// Newest enabled version, extensions included.
    TestTls12Ext,
    /// TLS 1.0 with extensions.
    TestTls10Ext,
    /// TLS 1.0 without extensions.
    TestTls10,
    /// SSLv3 only; the bottom of the ladder.
    TestSsl3Only,
}

impl FeatureTestStage {
    /// The next stage down the ladder, or `None` at the bottom.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            FeatureTestStage::Untested | FeatureTestStage::TestTls12Ext => {
                Some(FeatureTestStage::TestTls10Ext)
            }
            FeatureTestStage::TestTls10Ext => Some(FeatureTestStage::TestTls10),
            FeatureTestStage::TestTls10 => Some(FeatureTestStage::TestSsl3Only),
            FeatureTestStage::TestSsl3Only => None,
        }
    }

    /// Number of downgrade steps remaining below this stage.
    pub fn steps_remaining(self) -> usize {
        match self {
            FeatureTestStage::Untested | FeatureTestStage::TestTls12Ext => 3,
            FeatureTestStage::TestTls10Ext => 2,
            FeatureTestStage::TestTls10 => 1,
            FeatureTestStage::TestSsl3Only => 0,
        }
    }

    /// The (version, extensions) pair this stage offers under `policy`, or
    /// `None` when the policy forbids the step.
    pub fn offer(self, policy: &SecurityPolicy) -> Option<(TlsVersion, bool)> {
        match self {
            FeatureTestStage::Untested | FeatureTestStage::TestTls12Ext => policy
                .highest_enabled_at_or_below(TlsVersion::Tls12)
                .map(|v| (v, true)),
            FeatureTestStage::TestTls10Ext => policy
                .version_enabled(TlsVersion::Tls10)
                .then_some((TlsVersion::Tls10, true)),
            FeatureTestStage::TestTls10 => policy
                .version_enabled(TlsVersion::Tls10)
                .then_some((TlsVersion::Tls10, false)),
            FeatureTestStage::TestSsl3Only => policy
                .version_enabled(TlsVersion::Ssl3)
                .then_some((TlsVersion::Ssl3, false)),
        }
    }

    /// The stage that represents a running test of this offer. `Untested`
    /// maps onto the top test; every other stage is already a test.
    pub fn as_running_test(self) -> Self {
        match self {
            FeatureTestStage::Untested => FeatureTestStage::TestTls12Ext,
            other => other,
        }
    }
}

/// Feature-test state for one server.
#[derive(Debug, Clone, Copy)]
pub struct FeatureTestStatus {
    /// Stage the next fresh negotiation should run.
    pub stage: FeatureTestStage,
    /// When the stage was last updated (seconds since UNIX epoch).
    pub tested_at: u64,
    /// Configuration that most recently completed a handshake, if any.
    pub last_working: Option<(TlsVersion, bool)>,
}

impl FeatureTestStatus {
    fn fresh() -> Self {
        Self {
            stage: FeatureTestStage::Untested,
            tested_at: now_secs(),
            last_working: None,
        }
    }
}

/// Per-server cache of feature-test results with lazy expiry.
pub struct ServerFeatureCache {
    entries: HashMap<ServerIdentity, FeatureTestStatus>,
    /// Entry lifetime in seconds. 0 means entries never lapse.
    lifetime_secs: u64,
}

impl ServerFeatureCache {
    pub fn new(lifetime_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            lifetime_secs,
        }
    }

    /// Number of tracked servers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current status for a server. Lapsed or missing entries read as a
    /// fresh `Untested` status.
    pub fn status(&self, server: &ServerIdentity) -> FeatureTestStatus {
        match self.entries.get(server) {
            Some(entry) if !self.is_lapsed(entry) => *entry,
            _ => FeatureTestStatus::fresh(),
        }
    }

    /// Store a status verbatim (e.g. restored from a previous run).
    pub fn set_status(&mut self, server: &ServerIdentity, status: FeatureTestStatus) {
        self.entries.insert(server.clone(), status);
    }

    /// Record that a fresh negotiation is running `stage` against `server`.
    pub fn record_attempt(&mut self, server: &ServerIdentity, stage: FeatureTestStage) {
        let entry = self
            .entries
            .entry(server.clone())
            .or_insert_with(FeatureTestStatus::fresh);
        entry.stage = stage.as_running_test();
        entry.tested_at = now_secs();
    }

    /// Step the server one stage down the ladder after a version-related
    /// failure. Returns the new stage, or `None` at the bottom.
    pub fn advance(&mut self, server: &ServerIdentity) -> Option<FeatureTestStage> {
        let entry = self
            .entries
            .entry(server.clone())
            .or_insert_with(FeatureTestStatus::fresh);
        let next = entry.stage.downgrade()?;
        entry.stage = next;
        entry.tested_at = now_secs();
        entry.last_working = None;
        Some(next)
    }

    /// Record a completed handshake so future connections skip probing.
    pub fn record_success(&mut self, server: &ServerIdentity, version: TlsVersion, ext: bool) {
        let entry = self
            .entries
            .entry(server.clone())
            .or_insert_with(FeatureTestStatus::fresh);
        entry.last_working = Some((version, ext));
        entry.tested_at = now_secs();
    }

    /// Drop every lapsed entry.
    pub fn cleanup(&mut self) {
        if self.lifetime_secs == 0 {
            return;
        }
        let now = now_secs();
        let lifetime = self.lifetime_secs;
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.tested_at) <= lifetime);
    }

    fn is_lapsed(&self, entry: &FeatureTestStatus) -> bool {
        if self.lifetime_secs == 0 {
            return false;
        }
        now_secs().saturating_sub(entry.tested_at) > self.lifetime_secs
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerIdentity {
        ServerIdentity::new("probe.example.com", 443)
    }

    #[test]
    fn test_ladder_order() {
        let mut stage = FeatureTestStage::TestTls12Ext;
        let mut walked = vec![stage];
        while let Some(next) = stage.downgrade() {
            walked.push(next);
            stage = next;
        }
        assert_eq!(
            walked,
            vec![
                FeatureTestStage::TestTls12Ext,
                FeatureTestStage::TestTls10Ext,
                FeatureTestStage::TestTls10,
                FeatureTestStage::TestSsl3Only,
            ]
        );
    }

    #[test]
    fn test_ladder_is_bounded() {
        // The ladder terminates after exactly steps_remaining downgrades.
        let stage = FeatureTestStage::Untested;
        let mut count = 0;
        let mut cur = stage;
        while let Some(next) = cur.downgrade() {
            count += 1;
            cur = next;
        }
        assert_eq!(count, stage.steps_remaining());
        assert_eq!(cur, FeatureTestStage::TestSsl3Only);
        assert!(cur.downgrade().is_none());
    }

    #[test]
    fn test_offer_respects_policy() {
        let policy = SecurityPolicy::default();
        assert_eq!(
            FeatureTestStage::Untested.offer(&policy),
            Some((TlsVersion::Tls12, true))
        );
        assert_eq!(
            FeatureTestStage::TestTls10Ext.offer(&policy),
            Some((TlsVersion::Tls10, true))
        );
        assert_eq!(
            FeatureTestStage::TestTls10.offer(&policy),
            Some((TlsVersion::Tls10, false))
        );
        assert_eq!(
            FeatureTestStage::TestSsl3Only.offer(&policy),
            Some((TlsVersion::Ssl3, false))
        );
    }

    #[test]
    fn test_offer_blocked_by_policy() {
        let no_ssl3 = SecurityPolicy::builder()
            .min_version(TlsVersion::Tls10)
            .build();
        assert!(FeatureTestStage::TestSsl3Only.offer(&no_ssl3).is_none());
        assert!(FeatureTestStage::TestTls10.offer(&no_ssl3).is_some());

        let tls11_max = SecurityPolicy::builder()
            .max_version(TlsVersion::Tls11)
            .build();
        assert_eq!(
            FeatureTestStage::Untested.offer(&tls11_max),
            Some((TlsVersion::Tls11, true))
        );
    }

    #[test]
    fn test_cache_default_untested() {
        let cache = ServerFeatureCache::new(3600);
        let status = cache.status(&server());
        assert_eq!(status.stage, FeatureTestStage::Untested);
        assert!(status.last_working.is_none());
    }

    #[test]
    fn test_advance_walks_ladder() {
        let mut cache = ServerFeatureCache::new(3600);
        cache.record_attempt(&server(), FeatureTestStage::Untested);
        assert_eq!(
            cache.status(&server()).stage,
            FeatureTestStage::TestTls12Ext
        );
        assert_eq!(
            cache.advance(&server()),
            Some(FeatureTestStage::TestTls10Ext)
        );
        assert_eq!(cache.advance(&server()), Some(FeatureTestStage::TestTls10));
        assert_eq!(
            cache.advance(&server()),
            Some(FeatureTestStage::TestSsl3Only)
        );
        assert_eq!(cache.advance(&server()), None);
        assert_eq!(cache.advance(&server()), None);
    }

    #[test]
    fn test_success_marker_recorded() {
        let mut cache = ServerFeatureCache::new(3600);
        cache.record_attempt(&server(), FeatureTestStage::Untested);
        cache.record_success(&server(), TlsVersion::Tls12, true);
        let status = cache.status(&server());
        assert_eq!(status.last_working, Some((TlsVersion::Tls12, true)));
    }

    #[test]
    fn test_advance_clears_success_marker() {
        let mut cache = ServerFeatureCache::new(3600);
        cache.record_success(&server(), TlsVersion::Tls12, true);
        cache.advance(&server());
        assert!(cache.status(&server()).last_working.is_none());
    }

    #[test]
    fn test_lapsed_entry_reads_untested() {
        let mut cache = ServerFeatureCache::new(3600);
        cache.set_status(
            &server(),
            FeatureTestStatus {
                stage: FeatureTestStage::TestSsl3Only,
                tested_at: now_secs() - 7200,
                last_working: None,
            },
        );
        assert_eq!(cache.status(&server()).stage, FeatureTestStage::Untested);
    }

    #[test]
    fn test_zero_lifetime_never_lapses() {
        let mut cache = ServerFeatureCache::new(0);
        cache.set_status(
            &server(),
            FeatureTestStatus {
                stage: FeatureTestStage::TestTls10,
                tested_at: 1,
                last_working: None,
            },
        );
        assert_eq!(cache.status(&server()).stage, FeatureTestStage::TestTls10);
    }

    #[test]
    fn test_cleanup_drops_lapsed() {
        let mut cache = ServerFeatureCache::new(3600);
        cache.set_status(
            &server(),
            FeatureTestStatus {
                stage: FeatureTestStage::TestTls10,
                tested_at: now_secs() - 7200,
                last_working: None,
            },
        );
        let other = ServerIdentity::new("fresh.example.com", 443);
        cache.record_attempt(&other, FeatureTestStage::Untested);
        assert_eq!(cache.len(), 2);
        cache.cleanup();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.status(&other).stage, FeatureTestStage::TestTls12Ext);
    }
}
