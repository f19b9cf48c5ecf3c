use std::time::Duration;

/// Exponential backoff: `base * factor^(n-1)` for the n-th consecutive
/// failure, capped. Zero failures means no delay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2,
            cap: Duration::from_secs(10 * 60),
        }
    }
}

impl Backoff {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let mut d = self.base;
        for _ in 1..consecutive_failures {
            if d >= self.cap {
                break;
            }
            d = d.saturating_mul(self.factor);
        }
        d.min(self.cap)
    }
}
