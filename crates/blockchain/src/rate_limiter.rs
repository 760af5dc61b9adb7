use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Token bucket shared by every outgoing RPC call.
///
/// Holds up to `burst` tokens and regains one every `every`.
pub struct RpcRateLimiter {
    bucket: Mutex<Bucket>,
    every: Duration,
    burst: u32,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RpcRateLimiter {
    pub fn new(every: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            every,
            burst,
        }
    }

    /// Wait until a call may be issued.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!("RPC rate limit reached, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Take a token now, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|p| p.into_inner());

        if self.every.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let regained = (elapsed.as_nanos() / self.every.as_nanos()) as u64;
        if regained > 0 {
            let tokens = (bucket.tokens as u64 + regained).min(self.burst as u64);
            bucket.tokens = tokens as u32;
            bucket.last_refill += self.every * regained.min(u32::MAX as u64) as u32;
            if bucket.tokens == self.burst {
                bucket.last_refill = now;
            }
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(())
        } else {
            Err((bucket.last_refill + self.every).saturating_duration_since(now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let limiter = RpcRateLimiter::new(Duration::from_millis(100), 3);

        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_burst() {
        let limiter = RpcRateLimiter::new(Duration::from_millis(10), 2);
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_token() {
        let limiter = RpcRateLimiter::new(Duration::from_millis(50), 1);
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_interval_is_unlimited() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let limiter = RpcRateLimiter::new(Duration::ZERO, 1);
            for _ in 0..100 {
                assert!(limiter.try_acquire().is_ok());
            }
        });
    }
}
