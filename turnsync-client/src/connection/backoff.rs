use std::time::Duration;

use rand::Rng;
use shared::config::SyncSettings;

/// Reconnect delay law: `min(base * 2^(attempt - 1), cap)`, widened by
/// symmetric jitter of `jitter * delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    jitter: f64,
}

impl Backoff {
    #[must_use]
    pub const fn new(base_ms: u64, cap_ms: u64, jitter: f64) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter,
        }
    }

    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            settings.backoff_base_ms,
            settings.backoff_cap_ms,
            settings.backoff_jitter,
        )
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_ms.saturating_mul(1_u64 << exponent).min(self.cap_ms)
    }

    /// Delay with jitter applied for `unit` in `[-1, 1]`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let delay = self.base_delay_ms(attempt);
        if self.jitter <= 0.0 {
            return Duration::from_millis(delay);
        }
        let spread = delay as f64 * self.jitter * unit.clamp(-1.0, 1.0);
        let jittered = (delay as f64 + spread).max(0.0).round();
        Duration::from_millis(jittered as u64)
    }

    /// Delay for `attempt`, drawing the jitter from the thread RNG.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay_with(attempt, unit)
    }
}
