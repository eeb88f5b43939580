use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::{SessionEndReason, TokenLifecycle};
use crate::clock::SharedClock;
use crate::error::{CoreError, Result};

use super::activity::{ActivityHub, ListenerId, TRACKED_ACTIVITY};

/// Idle time after which the session is ended.
pub const DEFAULT_TIMEOUT_MINUTES: i64 = 30;

/// How long before the timeout the user is warned.
pub const DEFAULT_WARNING_LEAD_MINUTES: i64 = 5;

/// Period of the background idle check.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 1000;

/// Shortest period the background check accepts; tokio rejects zero.
const MIN_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub timeout: Duration,
    pub warning_lead: Duration,
    pub check_interval: std::time::Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::minutes(DEFAULT_TIMEOUT_MINUTES),
            warning_lead: Duration::minutes(DEFAULT_WARNING_LEAD_MINUTES),
            check_interval: std::time::Duration::from_millis(DEFAULT_CHECK_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Warning,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub last_activity_at: DateTime<Utc>,
    pub warning_issued: bool,
    pub phase: SessionPhase,
}

type WarningCallback = Arc<dyn Fn(i64) + Send + Sync>;
type ExpireCallback = Arc<dyn Fn() + Send + Sync>;

struct Tracked {
    state: SessionState,
    on_warning: WarningCallback,
    on_expire: ExpireCallback,
}

enum Escalation {
    None,
    Warn(WarningCallback, i64),
    Expire(ExpireCallback),
}

struct MonitorInner {
    settings: MonitorSettings,
    clock: SharedClock,
    hub: Arc<ActivityHub>,
    tokens: Arc<TokenLifecycle>,
    tracked: Mutex<Option<Tracked>>,
    listeners: Mutex<Vec<ListenerId>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Idle-timeout watchdog: `Active` → `Warning` → `Expired`.
///
/// Activity comes from an `ActivityHub`; the idle check runs on a tokio
/// interval when a runtime is available and can always be driven
/// directly through `check()`.
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new(
        mut settings: MonitorSettings,
        clock: SharedClock,
        hub: Arc<ActivityHub>,
        tokens: Arc<TokenLifecycle>,
    ) -> Self {
        if settings.check_interval < MIN_CHECK_INTERVAL {
            warn!(
                interval_ms = settings.check_interval.as_millis() as u64,
                "Check interval too short, using 1ms"
            );
            settings.check_interval = MIN_CHECK_INTERVAL;
        }
        Self {
            inner: Arc::new(MonitorInner {
                settings,
                clock,
                hub,
                tokens,
                tracked: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Start tracking. `on_warning` receives the seconds left before the
    /// session ends. Re-initializing replaces any previous tracking.
    pub fn init(
        &self,
        on_warning: impl Fn(i64) + Send + Sync + 'static,
        on_expire: impl Fn() + Send + Sync + 'static,
    ) -> Result<()> {
        if self.inner.tokens.get_token().is_none() {
            return Err(CoreError::NoSession);
        }
        self.cleanup();

        *self.inner.lock_tracked() = Some(Tracked {
            state: SessionState {
                last_activity_at: self.inner.clock.now(),
                warning_issued: false,
                phase: SessionPhase::Active,
            },
            on_warning: Arc::new(on_warning),
            on_expire: Arc::new(on_expire),
        });

        self.attach_listeners();
        self.start_timer();
        info!(
            timeout_secs = self.inner.settings.timeout.num_seconds(),
            warning_lead_secs = self.inner.settings.warning_lead.num_seconds(),
            "Session monitor started"
        );
        Ok(())
    }

    /// Evaluate the idle clock once. Returns the phase afterwards, or
    /// `None` when not tracking.
    pub fn check(&self) -> Option<SessionPhase> {
        self.inner.check()
    }

    /// Count as user activity without going through the hub.
    pub fn record_activity(&self) {
        self.inner.record_activity();
    }

    /// Stop tracking: detach every listener added by `init` and stop the
    /// timer. Safe to call any number of times.
    pub fn cleanup(&self) {
        self.inner.detach();
        *self.inner.lock_tracked() = None;
    }

    pub fn state(&self) -> Option<SessionState> {
        self.inner.lock_tracked().as_ref().map(|t| t.state)
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.state().map(|s| s.phase)
    }

    /// Time left before the session ends, if tracking.
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.state()?;
        let idle = self.inner.clock.now() - state.last_activity_at;
        Some((self.inner.settings.timeout - idle).max(Duration::zero()))
    }

    pub fn is_timer_running(&self) -> bool {
        self.inner
            .lock_timer()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn attach_listeners(&self) {
        let mut ids = self.inner.lock_listeners();
        for kind in TRACKED_ACTIVITY {
            // Weak: the hub must not keep a stopped monitor alive
            let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
            let id = self.inner.hub.add_listener(
                kind,
                Arc::new(move |_| {
                    if let Some(inner) = weak.upgrade() {
                        inner.record_activity();
                    }
                }),
            );
            ids.push(id);
        }
    }

    fn start_timer(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, idle checks must be driven with check()");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.check_interval;
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.check() {
                    Some(SessionPhase::Expired) | None => break,
                    _ => {}
                }
            }
        });
        *self.inner.lock_timer() = Some(handle);
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl MonitorInner {
    fn check(&self) -> Option<SessionPhase> {
        let now = self.clock.now();
        let timeout = self.settings.timeout;
        let warn_after = timeout - self.settings.warning_lead;

        let escalation = {
            let mut guard = self.lock_tracked();
            let tracked = guard.as_mut()?;
            let state = &mut tracked.state;

            if state.phase == SessionPhase::Expired {
                return Some(SessionPhase::Expired);
            }

            let idle = now - state.last_activity_at;
            if idle >= timeout {
                // Flip before anything else so a concurrent check sees Expired
                state.phase = SessionPhase::Expired;
                Escalation::Expire(tracked.on_expire.clone())
            } else if idle >= warn_after && !state.warning_issued {
                state.warning_issued = true;
                state.phase = SessionPhase::Warning;
                let remaining = (timeout - idle).num_seconds().max(0);
                Escalation::Warn(tracked.on_warning.clone(), remaining)
            } else {
                Escalation::None
            }
        };

        match escalation {
            Escalation::None => {}
            Escalation::Warn(on_warning, remaining) => {
                info!(remaining_secs = remaining, "Session about to expire");
                on_warning(remaining);
            }
            Escalation::Expire(on_expire) => {
                info!("Session expired after inactivity");
                self.detach();
                self.tokens.end_session(SessionEndReason::IdleTimeout);
                on_expire();
            }
        }

        self.lock_tracked().as_ref().map(|t| t.state.phase)
    }

    fn record_activity(&self) {
        let now = self.clock.now();
        let mut guard = self.lock_tracked();
        let Some(tracked) = guard.as_mut() else {
            return;
        };
        let state = &mut tracked.state;
        if state.phase == SessionPhase::Expired {
            return;
        }

        state.last_activity_at = now;
        if state.phase == SessionPhase::Warning {
            debug!("Activity during warning, session resumed");
            state.phase = SessionPhase::Active;
            state.warning_issued = false;
        }
    }

    /// Remove exactly the listeners this monitor attached and stop the timer.
    fn detach(&self) {
        let ids: Vec<ListenerId> = self.lock_listeners().drain(..).collect();
        for id in ids {
            self.hub.remove_listener(id);
        }
        if let Some(handle) = self.lock_timer().take() {
            handle.abort();
        }
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Option<Tracked>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<ListenerId>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AUTH_NAMESPACE;
    use crate::clock::{Clock, ManualClock};
    use crate::crypto::{XChaChaCipher, KEY_LEN};
    use crate::session::ActivityKind;
    use crate::storage::{EncodedStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        monitor: SessionMonitor,
        clock: ManualClock,
        hub: Arc<ActivityHub>,
        tokens: Arc<TokenLifecycle>,
        warnings: Arc<Mutex<Vec<(DateTime<Utc>, i64)>>>,
        expiries: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(settings: MonitorSettings) -> Self {
            let clock = ManualClock::default();
            let store = EncodedStore::new(
                Arc::new(MemoryStore::new()),
                Arc::new(XChaChaCipher::new(&[1u8; KEY_LEN])),
                AUTH_NAMESPACE,
            );
            let tokens = Arc::new(TokenLifecycle::new(store, Arc::new(clock.clone())));
            tokens.set_token("header.payload.signature");
            let hub = Arc::new(ActivityHub::new());
            let monitor =
                SessionMonitor::new(settings, Arc::new(clock.clone()), hub.clone(), tokens.clone());
            Self {
                monitor,
                clock,
                hub,
                tokens,
                warnings: Arc::new(Mutex::new(Vec::new())),
                expiries: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn start(&self) {
            let warnings = self.warnings.clone();
            let clock = self.clock.clone();
            let expiries = self.expiries.clone();
            self.monitor
                .init(
                    move |remaining| warnings.lock().unwrap().push((clock.now(), remaining)),
                    move || {
                        expiries.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .unwrap();
        }

        fn warning_count(&self) -> usize {
            self.warnings.lock().unwrap().len()
        }

        fn expiry_count(&self) -> usize {
            self.expiries.load(Ordering::SeqCst)
        }

        /// Advance in `step` increments, checking after each.
        fn run_for(&self, total: Duration, step: Duration) {
            let mut elapsed = Duration::zero();
            while elapsed < total {
                self.clock.advance(step);
                elapsed += step;
                self.monitor.check();
            }
        }
    }

    #[test]
    fn test_idle_session_warns_once_then_expires_once() {
        let h = Harness::new(MonitorSettings::default());
        let t0 = h.clock.now();
        h.start();

        h.run_for(Duration::minutes(40), Duration::seconds(1));

        let warnings = h.warnings.lock().unwrap().clone();
        assert_eq!(warnings.len(), 1);
        let (warned_at, remaining) = warnings[0];
        assert!(warned_at >= t0 + Duration::minutes(25));
        assert!(warned_at < t0 + Duration::minutes(30));
        assert_eq!(remaining, 300);

        assert_eq!(h.expiry_count(), 1);
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Expired));
    }

    #[test]
    fn test_no_warning_before_lead_window() {
        let h = Harness::new(MonitorSettings::default());
        h.start();

        h.clock.advance(Duration::minutes(25) - Duration::milliseconds(1));
        assert_eq!(h.monitor.check(), Some(SessionPhase::Active));
        assert_eq!(h.warning_count(), 0);

        h.clock.advance(Duration::milliseconds(1));
        assert_eq!(h.monitor.check(), Some(SessionPhase::Warning));
        assert_eq!(h.warning_count(), 1);

        // Repeated checks inside the window do not warn again
        h.clock.advance(Duration::minutes(2));
        h.monitor.check();
        assert_eq!(h.warning_count(), 1);
    }

    #[test]
    fn test_expires_exactly_at_budget() {
        let h = Harness::new(MonitorSettings::default());
        h.start();

        h.clock.advance(Duration::minutes(30) - Duration::milliseconds(1));
        h.monitor.check();
        assert_eq!(h.expiry_count(), 0);

        h.clock.advance(Duration::milliseconds(1));
        assert_eq!(h.monitor.check(), Some(SessionPhase::Expired));
        assert_eq!(h.expiry_count(), 1);

        h.clock.advance(Duration::minutes(5));
        h.monitor.check();
        h.monitor.check();
        assert_eq!(h.expiry_count(), 1);
    }

    #[test]
    fn test_activity_resets_clock_and_clears_warning() {
        let h = Harness::new(MonitorSettings::default());
        h.start();

        h.clock.advance(Duration::minutes(26));
        h.monitor.check();
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Warning));

        h.hub.emit(ActivityKind::Pointer);
        let state = h.monitor.state().unwrap();
        assert_eq!(state.phase, SessionPhase::Active);
        assert!(!state.warning_issued);
        assert_eq!(state.last_activity_at, h.clock.now());

        // Relations re-apply from the new activity time
        h.clock.advance(Duration::minutes(24));
        h.monitor.check();
        assert_eq!(h.warning_count(), 1);
        h.clock.advance(Duration::minutes(1));
        h.monitor.check();
        assert_eq!(h.warning_count(), 2);
        assert_eq!(h.expiry_count(), 0);
    }

    #[test]
    fn test_repeated_activity_does_not_warn() {
        let h = Harness::new(MonitorSettings::default());
        h.start();

        for _ in 0..100 {
            h.clock.advance(Duration::minutes(1));
            h.hub.emit(ActivityKind::Keyboard);
            h.monitor.check();
        }
        assert_eq!(h.warning_count(), 0);
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Active));
    }

    #[test]
    fn test_expiry_ends_session() {
        let h = Harness::new(MonitorSettings::default());
        let ended = Arc::new(Mutex::new(None));
        let slot = ended.clone();
        h.tokens
            .on_session_end(move |reason| *slot.lock().unwrap() = Some(reason));
        h.start();

        h.clock.advance(Duration::minutes(31));
        h.monitor.check();

        assert!(h.tokens.get_token().is_none());
        assert_eq!(*ended.lock().unwrap(), Some(SessionEndReason::IdleTimeout));
        // Listeners are gone, activity after expiry changes nothing
        assert_eq!(h.hub.listener_count(), 0);
        h.hub.emit(ActivityKind::Touch);
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Expired));
    }

    #[test]
    fn test_jump_past_budget_skips_warning() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        h.clock.advance(Duration::hours(2));
        h.monitor.check();
        assert_eq!(h.warning_count(), 0);
        assert_eq!(h.expiry_count(), 1);
    }

    #[test]
    fn test_init_requires_token() {
        let h = Harness::new(MonitorSettings::default());
        h.tokens.remove_token();
        let result = h.monitor.init(|_| {}, || {});
        assert!(matches!(result, Err(CoreError::NoSession)));
        assert_eq!(h.hub.listener_count(), 0);
    }

    #[test]
    fn test_cleanup_detaches_and_is_idempotent() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        assert_eq!(h.hub.listener_count(), TRACKED_ACTIVITY.len());

        h.monitor.cleanup();
        h.monitor.cleanup();
        assert_eq!(h.hub.listener_count(), 0);
        assert!(h.monitor.state().is_none());
        assert!(h.monitor.check().is_none());
    }

    #[test]
    fn test_reinit_does_not_stack_listeners() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        h.start();
        assert_eq!(h.hub.listener_count(), TRACKED_ACTIVITY.len());
    }

    #[test]
    fn test_reinit_after_expiry() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        h.clock.advance(Duration::minutes(30));
        h.monitor.check();
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Expired));

        h.tokens.set_token("new.session.token");
        h.start();
        assert_eq!(h.monitor.phase(), Some(SessionPhase::Active));
        assert_eq!(h.monitor.remaining(), Some(Duration::minutes(30)));
    }

    #[test]
    fn test_drop_detaches_listeners() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        let hub = h.hub.clone();
        drop(h);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_idle_session() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        assert!(h.monitor.is_timer_running());

        h.clock.advance(Duration::minutes(26));
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(h.warning_count(), 1);

        h.clock.advance(Duration::minutes(5));
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(h.expiry_count(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(h.expiry_count(), 1);
        assert!(!h.monitor.is_timer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_check_interval_still_expires() {
        let h = Harness::new(MonitorSettings {
            check_interval: std::time::Duration::ZERO,
            ..MonitorSettings::default()
        });
        h.start();
        assert!(h.monitor.is_timer_running());

        h.clock.advance(Duration::hours(2));
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        assert_eq!(h.expiry_count(), 1);
        assert!(h.tokens.get_token().is_none());
        assert!(!h.monitor.is_timer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_timer() {
        let h = Harness::new(MonitorSettings::default());
        h.start();
        h.monitor.cleanup();
        assert!(!h.monitor.is_timer_running());

        h.clock.advance(Duration::hours(1));
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(h.expiry_count(), 0);
        assert!(h.tokens.get_token().is_some());
    }
}
