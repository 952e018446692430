//! Clipboard change detection
//!
//! [`ChangeDetector`] decides, once per tick, whether a clipboard change should
//! be captured. It compares the clipboard's change counter against the last one
//! seen, then applies, in order, self-write suppression, application exclusion
//! and the minimum-interval debounce. All timing uses wall-clock elapsed time so
//! the decisions stay correct when ticks arrive late (for example after sleep).

pub mod filter;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::clipboard::SourceApp;
use crate::config::MonitorConfig;

pub use filter::{CaptureFilter, Rejection};

/// Elapsed wall-clock time, `None` when the clock went backwards
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    now.signed_duration_since(since).to_std().ok()
}

/// Marks the engine's own clipboard writes so the resulting change is not
/// captured again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelfWriteGuard {
    armed_at: Option<DateTime<Utc>>,
}

impl SelfWriteGuard {
    /// Arm (or re-arm) the guard; called right before every clipboard write
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.armed_at = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn armed_at(&self) -> Option<DateTime<Utc>> {
        self.armed_at
    }

    pub fn clear(&mut self) {
        self.armed_at = None;
    }

    /// Drop a guard older than `timeout`. Returns `true` if it was dropped.
    ///
    /// A guard armed "in the future" (the clock went backwards) is dropped too.
    pub fn expire(&mut self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.armed_at {
            Some(armed_at) if elapsed(armed_at, now).map_or(true, |e| e > timeout) => {
                self.armed_at = None;
                true
            }
            _ => false,
        }
    }

    /// Attribute a change observed at `now`.
    ///
    /// Returns `true` if the guard was armed no longer than `suppression` ago.
    /// The guard is consumed either way.
    pub fn consume(&mut self, now: DateTime<Utc>, suppression: Duration) -> bool {
        self.armed_at
            .take()
            .and_then(|armed_at| elapsed(armed_at, now))
            .is_some_and(|e| e <= suppression)
    }
}

/// Outcome of evaluating one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Counter unchanged since the last tick
    Unchanged,
    /// The change was caused by the engine's own write
    SelfWrite,
    /// The frontmost application is excluded
    Excluded(SourceApp),
    /// Too soon after the previous accepted change
    Debounced,
    /// Capture the clipboard content
    Accepted { source_app: Option<SourceApp> },
}

/// Per-engine change detection state
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    last_counter: Option<u64>,
    last_accepted: Option<DateTime<Utc>>,
    guard: SelfWriteGuard,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector that treats `counter` as already seen, so content present on
    /// the clipboard at startup is not captured
    pub fn seeded(counter: u64) -> Self {
        Self {
            last_counter: Some(counter),
            ..Self::default()
        }
    }

    pub fn last_counter(&self) -> Option<u64> {
        self.last_counter
    }

    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    pub fn guard(&self) -> &SelfWriteGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut SelfWriteGuard {
        &mut self.guard
    }

    /// Decide what to do with the clipboard state observed at `now`.
    ///
    /// `frontmost` is only queried when the change survives self-write
    /// suppression. Every changed counter is recorded, whatever the decision.
    pub fn evaluate(
        &mut self,
        counter: u64,
        frontmost: impl FnOnce() -> Option<SourceApp>,
        config: &MonitorConfig,
        now: DateTime<Utc>,
    ) -> Decision {
        if self.guard.expire(now, config.self_write_timeout()) {
            debug!("Self-write guard expired without an observed change");
        }

        if self.last_counter == Some(counter) {
            return Decision::Unchanged;
        }
        self.last_counter = Some(counter);

        if self.guard.consume(now, config.self_write_suppression()) {
            debug!("Ignoring own clipboard write (counter {})", counter);
            return Decision::SelfWrite;
        }

        let source_app = frontmost();
        if let Some(app) = source_app.as_ref().filter(|a| config.is_excluded(&a.identifier)) {
            debug!("Ignoring copy from excluded application {}", app.identifier);
            return Decision::Excluded(app.clone());
        }

        let too_soon = self
            .last_accepted
            .and_then(|last| elapsed(last, now))
            .is_some_and(|e| e < config.monitoring_interval());
        if too_soon {
            debug!("Dropping clipboard change inside the monitoring interval");
            return Decision::Debounced;
        }

        Decision::Accepted { source_app }
    }

    /// Record that an accepted change yielded a payload; starts the debounce
    pub fn mark_accepted(&mut self, now: DateTime<Utc>) {
        self.last_accepted = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn ms(n: i64) -> TimeDelta {
        TimeDelta::milliseconds(n)
    }

    fn accept(detector: &mut ChangeDetector, counter: u64, now: DateTime<Utc>) -> Decision {
        let decision = detector.evaluate(counter, || None, &config(), now);
        if matches!(decision, Decision::Accepted { .. }) {
            detector.mark_accepted(now);
        }
        decision
    }

    #[test]
    fn test_unchanged_counter() {
        let mut detector = ChangeDetector::seeded(7);
        let now = Utc::now();
        assert_eq!(accept(&mut detector, 7, now), Decision::Unchanged);
        assert_eq!(
            accept(&mut detector, 8, now),
            Decision::Accepted { source_app: None }
        );
        assert_eq!(accept(&mut detector, 8, now + ms(10)), Decision::Unchanged);
    }

    #[test]
    fn test_unseeded_detector_sees_first_counter_as_change() {
        let mut detector = ChangeDetector::new();
        assert!(matches!(
            accept(&mut detector, 0, Utc::now()),
            Decision::Accepted { .. }
        ));
    }

    #[test]
    fn test_self_write_is_suppressed_once() {
        let mut detector = ChangeDetector::seeded(1);
        let t0 = Utc::now();
        detector.guard_mut().arm(t0);

        assert_eq!(accept(&mut detector, 2, t0 + ms(300)), Decision::SelfWrite);
        assert!(!detector.guard().is_armed());

        // The next external change is captured normally
        assert!(matches!(
            accept(&mut detector, 3, t0 + ms(2_000)),
            Decision::Accepted { .. }
        ));
    }

    #[test]
    fn test_late_change_after_self_write_is_captured() {
        let mut detector = ChangeDetector::seeded(1);
        let t0 = Utc::now();
        detector.guard_mut().arm(t0);

        assert!(matches!(
            accept(&mut detector, 2, t0 + ms(1_500)),
            Decision::Accepted { .. }
        ));
        assert!(!detector.guard().is_armed());
    }

    #[test]
    fn test_stale_guard_is_cleared_without_a_change() {
        let mut detector = ChangeDetector::seeded(1);
        let t0 = Utc::now();
        detector.guard_mut().arm(t0);

        assert_eq!(accept(&mut detector, 1, t0 + ms(4_000)), Decision::Unchanged);
        assert!(detector.guard().is_armed());

        assert_eq!(accept(&mut detector, 1, t0 + ms(5_001)), Decision::Unchanged);
        assert!(!detector.guard().is_armed());
    }

    #[test]
    fn test_guard_cleared_when_clock_goes_backwards() {
        let mut guard = SelfWriteGuard::default();
        let t0 = Utc::now();
        guard.arm(t0);
        assert!(guard.expire(t0 - ms(10), Duration::from_secs(5)));

        guard.arm(t0);
        assert!(!guard.consume(t0 - ms(10), Duration::from_secs(1)));
        assert!(!guard.is_armed());
    }

    #[test]
    fn test_excluded_application() {
        let mut detector = ChangeDetector::seeded(1);
        let mut config = config();
        config.excluded_apps.insert("org.keepassxc.KeePassXC".to_string());

        let app = SourceApp::new("org.keepassxc.KeePassXC", "KeePassXC");
        let frontmost = app.clone();
        let decision = detector.evaluate(2, move || Some(frontmost), &config, Utc::now());
        assert_eq!(decision, Decision::Excluded(app));

        // Counter was recorded, so the same change is not re-evaluated
        assert_eq!(detector.last_counter(), Some(2));
        assert_eq!(
            detector.evaluate(2, || panic!("not queried"), &config, Utc::now()),
            Decision::Unchanged
        );
    }

    #[test]
    fn test_frontmost_not_queried_for_self_writes() {
        let mut detector = ChangeDetector::seeded(1);
        let now = Utc::now();
        detector.guard_mut().arm(now);
        let decision = detector.evaluate(2, || panic!("not queried"), &config(), now);
        assert_eq!(decision, Decision::SelfWrite);
    }

    #[test]
    fn test_debounce_drops_rapid_changes() {
        let mut detector = ChangeDetector::seeded(0);
        let t0 = Utc::now();

        assert!(matches!(accept(&mut detector, 1, t0), Decision::Accepted { .. }));
        assert_eq!(accept(&mut detector, 2, t0 + ms(200)), Decision::Debounced);
        assert_eq!(accept(&mut detector, 3, t0 + ms(400)), Decision::Debounced);
        // Measured from the last accepted change, not the last observed one
        assert!(matches!(
            accept(&mut detector, 4, t0 + ms(500)),
            Decision::Accepted { .. }
        ));
        assert_eq!(detector.last_accepted(), Some(t0 + ms(500)));
    }

    #[test]
    fn test_source_app_is_reported() {
        let mut detector = ChangeDetector::seeded(0);
        let app = SourceApp::new("firefox", "Firefox");
        let frontmost = app.clone();
        let decision = detector.evaluate(1, move || Some(frontmost), &config(), Utc::now());
        assert_eq!(decision, Decision::Accepted { source_app: Some(app) });
    }
}
