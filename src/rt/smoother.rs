use atomic::Atomic;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lock-free linear ramp used everywhere a control-rate parameter (clip gain, group gain) must
/// reach the audio thread without a click.
///
/// `set_target` is called from the UI thread (or from the audio thread itself when a `Command`
/// carries a new target); `process` is called once per sample from the audio thread only.
///
/// Targets are clamped to non-negative only — gain is linear, never negative, but is otherwise
/// unbounded (a clip or group fader may sit above unity). The ramp rate is fixed by
/// `smoothing_time_ms` regardless of how far current is from target, so a large jump (e.g.
/// unity to a boosted group gain) takes proportionally longer than a small one; this mirrors the
/// reference gain smoother's fixed-increment-per-sample design.
#[derive(Debug)]
pub struct GainSmoother {
    increment: f32,
    current: f32,
    target: f32,
    pending_target: Atomic<f32>,
    has_pending: AtomicBool,
}

impl GainSmoother {
    /// `smoothing_time_ms` is the nominal time to traverse a full `0.0..1.0` excursion, clamped
    /// to `[1.0, 100.0]` ms. Larger excursions take proportionally longer at this same rate.
    pub fn new(sample_rate: u32, smoothing_time_ms: f32) -> Self {
        let smoothing_time_ms = smoothing_time_ms.clamp(1.0, 100.0);
        let smoothing_samples = (smoothing_time_ms / 1000.0) * sample_rate as f32;
        Self {
            increment: 1.0 / smoothing_samples,
            current: 1.0,
            target: 1.0,
            pending_target: Atomic::new(1.0),
            has_pending: AtomicBool::new(false),
        }
    }

    /// Publishes a new target. Lock-free; safe to call from the UI thread.
    pub fn set_target(&self, target: f32) {
        let target = target.max(0.0);
        self.pending_target.store(target, Ordering::Release);
        self.has_pending.store(true, Ordering::Release);
    }

    /// Returns the most recently published target (or the currently-ramping-toward target if no
    /// update is pending).
    pub fn target(&self) -> f32 {
        if self.has_pending.load(Ordering::Acquire) {
            self.pending_target.load(Ordering::Acquire)
        } else {
            self.target
        }
    }

    /// Returns the current value without advancing the ramp.
    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_ramping(&self) -> bool {
        self.current != self.target || self.has_pending.load(Ordering::Acquire)
    }

    /// Returns the pre-ramp current sample, then advances one step toward the target.
    ///
    /// Audio-thread only: no allocation, no locking.
    pub fn process(&mut self) -> f32 {
        if self.has_pending.load(Ordering::Acquire) {
            self.target = self.pending_target.load(Ordering::Acquire);
            self.has_pending.store(false, Ordering::Release);
        }
        let output = self.current;
        if self.current < self.target {
            self.current = (self.current + self.increment).min(self.target);
        } else if self.current > self.target {
            self.current = (self.current - self.increment).max(self.target);
        }
        output
    }

    /// Snaps both current and target to `gain` immediately, no ramp. Used at initialization.
    pub fn reset(&mut self, gain: f32) {
        let gain = gain.max(0.0);
        self.current = gain;
        self.target = gain;
        self.pending_target.store(gain, Ordering::Release);
        self.has_pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_target_without_overshoot() {
        let mut s = GainSmoother::new(48_000, 10.0);
        s.reset(0.0);
        s.set_target(1.0);
        let mut last = 0.0;
        for _ in 0..10_000 {
            last = s.process();
        }
        assert_eq!(last, 1.0);
        assert!(s.current() <= 1.0);
    }

    #[test]
    fn ramp_is_monotonic_up() {
        let mut s = GainSmoother::new(48_000, 10.0);
        s.reset(0.0);
        s.set_target(1.0);
        let mut prev = s.process();
        for _ in 0..480 {
            let v = s.process();
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn set_target_allows_gain_above_unity() {
        let mut s = GainSmoother::new(48_000, 10.0);
        s.reset(1.0);
        s.set_target(2.0);
        for _ in 0..100_000 {
            s.process();
        }
        assert_eq!(s.current(), 2.0);
    }

    #[test]
    fn set_target_clamps_negative_to_zero() {
        let mut s = GainSmoother::new(48_000, 10.0);
        s.set_target(-3.0);
        for _ in 0..100_000 {
            s.process();
        }
        assert_eq!(s.current(), 0.0);
    }

    #[test]
    fn reset_is_immediate() {
        let mut s = GainSmoother::new(48_000, 10.0);
        s.reset(0.25);
        assert_eq!(s.process(), 0.25);
        assert!(!s.is_ramping());
    }
}
