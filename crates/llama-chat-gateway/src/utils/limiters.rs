use anyhow::Result;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::{
    net::IpAddr,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::LimitsConfig;

/// Chat checks between sweeps of idle client entries
const RETAIN_EVERY: u64 = 1024;

#[derive(Clone)]
pub struct Limiters {
    /// Per-client quota on chat requests
    pub chat_requests: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    /// Bounds how many generation processes run at once
    pub llm_stream: Arc<Semaphore>,
    pub acquire_timeout: Duration,
    chat_checks: Arc<AtomicU64>,
}

impl Limiters {
    pub fn new(cfg: &LimitsConfig) -> Result<Self> {
        let per_hour = NonZeroU32::new(cfg.chat_requests_per_hour)
            .ok_or_else(|| anyhow::anyhow!("limits.chat_requests_per_hour must be > 0"))?;

        Ok(Self {
            chat_requests: Arc::new(RateLimiter::keyed(Quota::per_hour(per_hour))),
            llm_stream: Arc::new(Semaphore::new(cfg.max_concurrent_generations.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
            chat_checks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns false once `ip` has used up its hourly quota.
    pub fn check_chat(&self, ip: IpAddr) -> bool {
        let checks = self.chat_checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % RETAIN_EVERY == 0 {
            self.sweep_idle_clients();
        }
        self.chat_requests.check_key(&ip).is_ok()
    }

    /// Drop clients whose quota has fully replenished; they behave exactly
    /// like a client that was never seen.
    pub fn sweep_idle_clients(&self) {
        let before = self.chat_requests.len();
        self.chat_requests.retain_recent();
        self.chat_requests.shrink_to_fit();
        debug!(
            "Chat rate limiter swept: {} -> {} tracked clients",
            before,
            self.chat_requests.len()
        );
    }

    pub fn tracked_clients(&self) -> usize {
        self.chat_requests.len()
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration)> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("Limiter acquire timeout for op={}", op))??;

        Ok((permit, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_hour: u32, generations: usize) -> LimitsConfig {
        LimitsConfig {
            chat_requests_per_hour: per_hour,
            max_concurrent_generations: generations,
            acquire_timeout_ms: 20,
        }
    }

    #[test]
    fn test_chat_quota_is_per_ip() {
        let limiters = Limiters::new(&limits(2, 1)).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiters.check_chat(a));
        assert!(limiters.check_chat(a));
        assert!(!limiters.check_chat(a));
        assert!(limiters.check_chat(b));
    }

    #[test]
    fn test_sweep_keeps_clients_with_spent_quota() {
        let limiters = Limiters::new(&limits(1, 1)).unwrap();
        let spent: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiters.check_chat(spent));
        assert_eq!(limiters.tracked_clients(), 1);

        limiters.sweep_idle_clients();

        assert_eq!(limiters.tracked_clients(), 1);
        assert!(!limiters.check_chat(spent));
    }

    #[test]
    fn test_zero_quota_rejected() {
        assert!(Limiters::new(&limits(0, 1)).is_err());
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let limiters = Limiters::new(&limits(10, 1)).unwrap();
        let (_held, _) =
            Limiters::acquire_timed(limiters.llm_stream.clone(), limiters.acquire_timeout, "test")
                .await
                .unwrap();

        let second =
            Limiters::acquire_timed(limiters.llm_stream.clone(), limiters.acquire_timeout, "test")
                .await;
        assert!(second.is_err());
    }
}
