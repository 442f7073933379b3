//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stepwise_engine::{AccessGate, ExecutionService, ProcessManager};
use stepwise_sqlite::SqliteStorage;
use tokio::sync::Mutex;

/// Requests seen from one IP in the current window.
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
}

/// In-memory fixed-window per-IP rate limiter.
pub(crate) struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// `Ok(())` if a request from `ip` is allowed now, otherwise the number
    /// of seconds until its window resets.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(ip).or_insert(Window {
            count: 0,
            started: now,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }

        entry.count += 1;
        if entry.count > self.max_requests {
            let remaining = self.window.saturating_sub(now.saturating_duration_since(entry.started));
            Err(remaining.as_secs().max(1))
        } else {
            Ok(())
        }
    }
}

/// Shared across request handlers.
pub(crate) struct AppState {
    pub(crate) service: Arc<ExecutionService<SqliteStorage>>,
    pub(crate) manager: ProcessManager<SqliteStorage>,
    pub(crate) gate: AccessGate,
    pub(crate) rate_limiter: RateLimiter,
    /// Key for the owner routes. `None` disables the check.
    pub(crate) api_key: Option<String>,
    /// Take the client address from `X-Forwarded-For`.
    pub(crate) trust_proxy: bool,
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[tokio::test]
    async fn limit_applies_per_ip_and_resets_with_the_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let start = Instant::now();

        assert!(limiter.check_at(a, start).await.is_ok());
        assert!(limiter.check_at(a, start).await.is_ok());
        let retry = limiter
            .check_at(a, start + Duration::from_secs(15))
            .await
            .unwrap_err();
        assert_eq!(retry, 45);
        assert!(limiter.check_at(b, start).await.is_ok());

        assert!(limiter
            .check_at(a, start + Duration::from_secs(60))
            .await
            .is_ok());
    }
}
