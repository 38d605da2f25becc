use std::time::Duration;

use tokio::time::Instant;

/// Keeps one worker's output at or below `bytes_per_second`.
#[derive(Debug)]
pub struct Throttle {
    bytes_per_second: u64,
    started: Instant,
    bytes: u64,
}

impl Throttle {
    /// `0` disables throttling.
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            started: Instant::now(),
            bytes: 0,
        }
    }

    /// How long to wait after `bytes` more were written.
    pub fn delay_for(&mut self, bytes: u64) -> Option<Duration> {
        if self.bytes_per_second == 0 {
            return None;
        }
        self.bytes += bytes;
        let expected = Duration::from_secs_f64(self.bytes as f64 / self.bytes_per_second as f64);
        let elapsed = self.started.elapsed();
        (expected > elapsed).then(|| expected - elapsed)
    }

    pub async fn throttle(&mut self, bytes: u64) {
        if let Some(delay) = self.delay_for(bytes) {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttles_to_rate() {
        let mut throttle = Throttle::new(1000);
        let start = Instant::now();
        for _ in 0..5 {
            throttle.throttle(1000).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_unlimited() {
        let mut throttle = Throttle::new(0);
        assert_eq!(throttle.delay_for(u64::MAX), None);
    }
}
