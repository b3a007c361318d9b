//! Capture/analysis coordinator
//!
//! Single-flight guard plus cooldown. Decides whether a capture-eligible face
//! may trigger, and which path (single capture or averaging session) it
//! takes. Each acquisition bumps a generation so the engine can drop
//! outcomes from work that was cancelled by `reset`.

use tokio::time::{Duration, Instant};

/// What currently holds the single-flight lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureLock {
    #[default]
    Free,
    Single,
    Averaging,
}

impl CaptureLock {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureLock::Free => "free",
            CaptureLock::Single => "single",
            CaptureLock::Averaging => "averaging",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Take one capture and analyze it
    Single,
    /// Start a multi-sample averaging session
    StartAveraging,
    /// Another capture or session is in flight
    Busy(CaptureLock),
    CoolingDown { remaining: Duration },
}

impl TriggerDecision {
    pub fn is_go(&self) -> bool {
        matches!(self, TriggerDecision::Single | TriggerDecision::StartAveraging)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    pub last_capture_at: Option<Instant>,
}

pub struct CaptureCoordinator {
    lock: CaptureLock,
    cooldown: CooldownState,
    cooldown_period: Duration,
    averaging_enabled: bool,
    generation: u64,
}

impl CaptureCoordinator {
    pub fn new(cooldown_period: Duration, averaging_enabled: bool) -> Self {
        Self {
            lock: CaptureLock::Free,
            cooldown: CooldownState::default(),
            cooldown_period,
            averaging_enabled,
            generation: 0,
        }
    }

    /// Decide without changing state
    pub fn evaluate(&self, now: Instant) -> TriggerDecision {
        if self.lock != CaptureLock::Free {
            return TriggerDecision::Busy(self.lock);
        }
        if let Some(last) = self.cooldown.last_capture_at {
            let since = now.saturating_duration_since(last);
            if since < self.cooldown_period {
                return TriggerDecision::CoolingDown { remaining: self.cooldown_period - since };
            }
        }
        if self.averaging_enabled {
            TriggerDecision::StartAveraging
        } else {
            TriggerDecision::Single
        }
    }

    /// Take the lock for a go decision and start the cooldown clock.
    ///
    /// Returns the generation the new job must report back with, or None if
    /// the decision is not a go.
    pub fn acquire(&mut self, decision: TriggerDecision, now: Instant) -> Option<u64> {
        let lock = match decision {
            TriggerDecision::Single => CaptureLock::Single,
            TriggerDecision::StartAveraging => CaptureLock::Averaging,
            TriggerDecision::Busy(_) | TriggerDecision::CoolingDown { .. } => return None,
        };
        self.lock = lock;
        self.cooldown.last_capture_at = Some(now);
        self.generation += 1;
        Some(self.generation)
    }

    /// Release the lock held by `generation`. Stale generations are ignored.
    pub fn release(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.lock == CaptureLock::Free {
            return false;
        }
        self.lock = CaptureLock::Free;
        true
    }

    /// Restart the cooldown clock without taking the lock
    pub fn start_cooldown(&mut self, now: Instant) {
        self.cooldown.last_capture_at = Some(now);
    }

    /// Drop the lock and cooldown; invalidates every outstanding generation
    pub fn reset(&mut self) {
        self.lock = CaptureLock::Free;
        self.cooldown = CooldownState::default();
        self.generation += 1;
    }

    pub fn lock(&self) -> CaptureLock {
        self.lock
    }

    pub fn is_locked(&self) -> bool {
        self.lock != CaptureLock::Free
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cooldown(&self) -> CooldownState {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_trigger_goes() {
        let coordinator = CaptureCoordinator::new(ms(5000), false);
        assert_eq!(coordinator.evaluate(Instant::now()), TriggerDecision::Single);

        let coordinator = CaptureCoordinator::new(ms(5000), true);
        assert_eq!(coordinator.evaluate(Instant::now()), TriggerDecision::StartAveraging);
    }

    #[test]
    fn test_lock_blocks_second_trigger() {
        let mut coordinator = CaptureCoordinator::new(ms(0), false);
        let now = Instant::now();

        let generation = coordinator.acquire(TriggerDecision::Single, now).unwrap();
        assert_eq!(coordinator.evaluate(now), TriggerDecision::Busy(CaptureLock::Single));
        assert!(coordinator.acquire(coordinator.evaluate(now), now).is_none());

        assert!(coordinator.release(generation));
        assert_eq!(coordinator.evaluate(now), TriggerDecision::Single);
    }

    #[test]
    fn test_cooldown_measured_from_trigger() {
        let mut coordinator = CaptureCoordinator::new(ms(5000), false);
        let t0 = Instant::now();

        let generation = coordinator.acquire(TriggerDecision::Single, t0).unwrap();
        // slow analysis settles at t0+3s; cooldown still ends at t0+5s
        coordinator.release(generation);

        assert_eq!(
            coordinator.evaluate(t0 + ms(3000)),
            TriggerDecision::CoolingDown { remaining: ms(2000) }
        );
        assert_eq!(coordinator.evaluate(t0 + ms(5000)), TriggerDecision::Single);
    }

    #[test]
    fn test_stale_release_ignored() {
        let mut coordinator = CaptureCoordinator::new(ms(0), true);
        let now = Instant::now();

        let stale = coordinator.acquire(TriggerDecision::StartAveraging, now).unwrap();
        coordinator.reset();
        let current = coordinator.acquire(TriggerDecision::StartAveraging, now).unwrap();

        assert!(!coordinator.release(stale));
        assert_eq!(coordinator.lock(), CaptureLock::Averaging);
        assert!(coordinator.release(current));
        assert!(!coordinator.is_locked());
    }

    #[test]
    fn test_reset_clears_cooldown() {
        let mut coordinator = CaptureCoordinator::new(ms(5000), false);
        let now = Instant::now();
        coordinator.acquire(TriggerDecision::Single, now);
        coordinator.reset();

        assert_eq!(coordinator.cooldown(), CooldownState::default());
        assert_eq!(coordinator.evaluate(now), TriggerDecision::Single);
    }
}
