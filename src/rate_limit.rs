use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::config::DEFAULT_RATE_DELAY_MS;

/// Holds callers for a fixed interval before each outbound request.
///
/// The gate is held for the whole delay, so concurrent callers are released
/// one interval apart rather than all at once.
pub struct RateLimiter {
    interval: Duration,
    gate: AsyncMutex<()>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn throttle(&self) {
        let _gate = self.gate.lock().await;
        sleep(self.interval).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RATE_DELAY_MS))
    }
}
