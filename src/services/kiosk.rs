//! Idle/kiosk display coordinator
//!
//! Two views: `Live` (camera and overlay) and `Idle` (advertising content).
//! Any detection or new result brings the live view back on the same tick;
//! the idle view returns once no face is present and the last result is
//! older than the display time. Every method returns the view to switch to,
//! or None when nothing visible changes.

use tokio::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskView {
    Live,
    Idle,
}

impl KioskView {
    pub fn as_str(&self) -> &'static str {
        match self {
            KioskView::Live => "live",
            KioskView::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KioskState {
    pub view: KioskView,
    pub last_result_at: Option<Instant>,
    pub return_deadline: Option<Instant>,
}

pub struct KioskCoordinator {
    enabled: bool,
    display_time: Duration,
    state: KioskState,
}

impl KioskCoordinator {
    pub fn new(enabled: bool, display_time: Duration) -> Self {
        Self {
            enabled,
            display_time,
            state: KioskState { view: KioskView::Live, last_result_at: None, return_deadline: None },
        }
    }

    /// Switch views. Idempotent: re-entering the current view is a no-op.
    pub fn transition_to(&mut self, view: KioskView) -> Option<KioskView> {
        if !self.enabled || self.state.view == view {
            return None;
        }
        debug!(from = %self.state.view.as_str(), to = %view.as_str(), "kiosk_transition");
        self.state.view = view;
        Some(view)
    }

    /// Monitoring started: idle content until someone shows up
    pub fn start(&mut self) -> Option<KioskView> {
        self.transition_to(KioskView::Idle)
    }

    /// A face is present this tick
    pub fn on_detection(&mut self) -> Option<KioskView> {
        self.state.return_deadline = None;
        self.transition_to(KioskView::Live)
    }

    /// A new result (fresh, cached or averaged) was produced
    pub fn on_result(&mut self, now: Instant) -> Option<KioskView> {
        self.state.last_result_at = Some(now);
        self.state.return_deadline = Some(now + self.display_time);
        self.transition_to(KioskView::Live)
    }

    /// A tick with no face
    pub fn on_empty_tick(&mut self, now: Instant) -> Option<KioskView> {
        if self.idle_due(now) {
            self.state.return_deadline = None;
            self.transition_to(KioskView::Idle)
        } else {
            None
        }
    }

    /// Monitoring stopped: cancel the deadline and show idle content
    pub fn stop(&mut self) -> Option<KioskView> {
        self.state.return_deadline = None;
        self.state.last_result_at = None;
        self.transition_to(KioskView::Idle)
    }

    fn idle_due(&self, now: Instant) -> bool {
        let result_stale = self
            .state
            .last_result_at
            .map_or(true, |t| now.saturating_duration_since(t) > self.display_time);
        let deadline_passed = self.state.return_deadline.is_some_and(|d| now >= d);
        result_stale || deadline_passed
    }

    pub fn state(&self) -> KioskState {
        self.state
    }

    pub fn view(&self) -> KioskView {
        self.state.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    fn coordinator() -> KioskCoordinator {
        KioskCoordinator::new(true, secs(5))
    }

    #[test]
    fn test_idle_transition_is_idempotent() {
        let mut kiosk = coordinator();
        assert_eq!(kiosk.transition_to(KioskView::Idle), Some(KioskView::Idle));
        assert_eq!(kiosk.transition_to(KioskView::Idle), None);
        assert_eq!(kiosk.view(), KioskView::Idle);
    }

    #[test]
    fn test_detection_shows_live_immediately() {
        let mut kiosk = coordinator();
        kiosk.start();
        assert_eq!(kiosk.on_detection(), Some(KioskView::Live));
        assert_eq!(kiosk.on_detection(), None);
    }

    #[test]
    fn test_no_result_returns_to_idle_on_empty_tick() {
        let mut kiosk = coordinator();
        let t0 = Instant::now();
        kiosk.start();
        kiosk.on_detection();
        assert_eq!(kiosk.on_empty_tick(t0), Some(KioskView::Idle));
    }

    #[test]
    fn test_result_holds_live_for_display_time() {
        let mut kiosk = coordinator();
        let t0 = Instant::now();
        kiosk.start();
        assert_eq!(kiosk.on_result(t0), Some(KioskView::Live));
        assert_eq!(kiosk.state().return_deadline, Some(t0 + secs(5)));

        assert_eq!(kiosk.on_empty_tick(t0 + secs(1)), None);
        assert_eq!(kiosk.on_empty_tick(t0 + secs(4)), None);
        assert_eq!(kiosk.on_empty_tick(t0 + secs(5)), Some(KioskView::Idle));
        assert_eq!(kiosk.state().return_deadline, None);
    }

    #[test]
    fn test_new_result_resets_deadline() {
        let mut kiosk = coordinator();
        let t0 = Instant::now();
        kiosk.on_result(t0);
        kiosk.on_result(t0 + secs(3));

        assert_eq!(kiosk.on_empty_tick(t0 + secs(6)), None);
        assert_eq!(kiosk.on_empty_tick(t0 + secs(8)), Some(KioskView::Idle));
    }

    #[test]
    fn test_stop_shows_idle_and_clears_deadline() {
        let mut kiosk = coordinator();
        let t0 = Instant::now();
        kiosk.on_result(t0);

        assert_eq!(kiosk.stop(), Some(KioskView::Idle));
        assert_eq!(kiosk.state().return_deadline, None);
        assert_eq!(kiosk.stop(), None);
    }

    #[test]
    fn test_disabled_never_transitions() {
        let mut kiosk = KioskCoordinator::new(false, secs(5));
        let t0 = Instant::now();
        assert_eq!(kiosk.start(), None);
        assert_eq!(kiosk.on_detection(), None);
        assert_eq!(kiosk.on_result(t0), None);
        assert_eq!(kiosk.on_empty_tick(t0 + secs(10)), None);
        assert_eq!(kiosk.stop(), None);
    }
}
