//! Exponential backoff with jitter and an idle reset, pacing retry loops.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use rand::{rng, Rng};

const DEFAULT_MIN_MS: u64 = 800;
const DEFAULT_MAX_MS: u64 = 15_000;
const DEFAULT_FACTOR: f64 = 1.5;
const DEFAULT_JITTER: f64 = 0.1;
const DEFAULT_RESET_MS: u64 = 60_000;

/// Retry delay source: `min · factor^attempt`, clamped to `max`, with
/// symmetric multiplicative jitter. A quiet interval of `reset_duration`
/// between calls zeroes the attempt counter again.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    reset_duration: Duration,
    attempt: u32,
    reset_deadline: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(DEFAULT_MIN_MS),
            max: Duration::from_millis(DEFAULT_MAX_MS),
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
            reset_duration: Duration::from_millis(DEFAULT_RESET_MS),
            attempt: 0,
            reset_deadline: None,
        }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// First delay.
    pub fn min(mut self, min: Duration) -> Self {
        self.min = min;
        self
    }

    /// Delay ceiling.
    pub fn max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Multiplicative growth per attempt.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Fraction of uniform symmetric noise, clamped to [0, 1]. Zero disables
    /// jitter entirely.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Quiet interval after which the attempt counter starts over.
    pub fn reset_duration(mut self, reset_duration: Duration) -> Self {
        self.reset_duration = reset_duration;
        self
    }

    /// Attempts after which the raw (unjittered) delay would exceed `max`.
    fn max_attempt(&self) -> u32 {
        let ratio = self.max.as_millis() as f64 / self.min.as_millis().max(1) as f64;
        (ratio.ln() / self.factor.ln()).floor() as u32
    }

    /// Produce the next delay and advance the attempt counter. Re-arms the
    /// idle-reset deadline on every call.
    pub fn duration(&mut self) -> Duration {
        let now = Instant::now();
        if let Some(deadline) = self.reset_deadline {
            if now >= deadline {
                self.attempt = 0;
            }
        }
        self.reset_deadline = Some(now + self.reset_duration);

        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        if attempt > self.max_attempt() {
            return self.max;
        }

        let mut delay = self.min.as_millis() as f64 * self.factor.powi(attempt as i32);
        if self.jitter > 0.0 {
            let r: f64 = rng().random();
            delay *= 1.0 + self.jitter * (2.0 * r - 1.0);
        }
        Duration::from_millis(delay.floor() as u64).min(self.max)
    }

    /// Start the progression over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Disarm the idle reset.
    pub fn clear_timeout(&mut self) {
        self.reset_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> Backoff {
        Backoff::new().jitter(0.0)
    }

    #[test]
    fn grows_by_factor_and_clamps_at_max() {
        let mut b = no_jitter();
        let expect = [800, 1200, 1800, 2700, 4050, 6075, 9112, 13668, 15000, 15000];
        for (i, want) in expect.iter().enumerate() {
            assert_eq!(b.duration(), Duration::from_millis(*want), "attempt {}", i);
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut b = no_jitter();
        assert_eq!(b.duration(), Duration::from_millis(800));
        assert_eq!(b.duration(), Duration::from_millis(1200));
        b.reset();
        assert_eq!(b.duration(), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_band() {
        let mut b = Backoff::new().jitter(0.5);
        for _ in 0..100 {
            b.reset();
            let d = b.duration().as_millis() as f64;
            assert!((400.0..1200.0).contains(&d), "got {}", d);
        }
    }

    #[test]
    fn jitter_is_clamped_to_unit() {
        let mut b = Backoff::new().jitter(7.0);
        for _ in 0..100 {
            b.reset();
            let d = b.duration().as_millis();
            assert!(d < 1600, "got {}", d);
        }
    }

    #[test]
    fn idle_window_zeroes_the_attempt() {
        let mut b = no_jitter().reset_duration(Duration::from_millis(10));
        assert_eq!(b.duration(), Duration::from_millis(800));
        assert_eq!(b.duration(), Duration::from_millis(1200));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(b.duration(), Duration::from_millis(800));
    }

    #[test]
    fn clear_timeout_disarms_the_idle_reset() {
        let mut b = no_jitter().reset_duration(Duration::from_millis(10));
        assert_eq!(b.duration(), Duration::from_millis(800));
        b.clear_timeout();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(b.duration(), Duration::from_millis(1200));
    }

    #[test]
    fn min_above_max_returns_max() {
        let mut b = no_jitter()
            .min(Duration::from_millis(20_000))
            .max(Duration::from_millis(15_000));
        assert_eq!(b.duration(), Duration::from_millis(15_000));
        assert_eq!(b.duration(), Duration::from_millis(15_000));
    }
}
