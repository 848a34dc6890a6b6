use mindhaven_config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Bounded reconnect schedule: capped exponential delays with randomized jitter.
///
/// `max_attempts` counts consecutive failed connection attempts, the initial
/// one included. Once that many attempts in a row have failed the channel
/// gives up for good.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ReconnectPolicy {
    /// # Examples
    ///
    /// ```
    /// use mindhaven_realtime::ReconnectPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = ReconnectPolicy::new(
    ///     5,
    ///     Duration::from_millis(100),
    ///     Duration::from_millis(5000),
    ///     2.0,
    /// )
    /// .with_jitter(0.0);
    /// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    /// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    /// ```
    #[must_use]
    pub const fn new(max_attempts: u32, initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            max_attempts,
            initial,
            max,
            factor,
            jitter: 0.25,
        }
    }

    /// Spread applied to every delay, as a fraction in `[0, 1)`.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.factor,
        )
        .with_jitter(config.jitter)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempts` consecutive failures use up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    /// Delay before reconnect number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let initial_ms = self.initial.as_millis().min(u128::from(u64::MAX)) as f64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as f64;
        let scaled = (initial_ms * self.factor.powi(exponent)).min(max_ms);
        Duration::from_millis(scaled as u64)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    /// Delay before reconnect number `attempt`, jittered and never above the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }

        let spread = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let jittered_ms = (base.as_millis() as f64 * spread) as u64;
        Duration::from_millis(jittered_ms).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
