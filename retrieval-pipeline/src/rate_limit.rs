use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use common::{error::AppError, utils::config::AppConfig};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_in: Duration,
}

/// Fixed-window request counter per key, holding at most `max_keys` windows.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: max_requests.max(1),
            window,
            max_keys: max_keys.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_max_requests,
            Duration::from_secs(config.rate_limit_window_secs),
            config.rate_limit_max_keys,
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check(&self, key: &str) -> Result<RateLimitStatus, AppError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<RateLimitStatus, AppError> {
        let mut windows = self.lock();

        let expired = |window: &Window| now.saturating_duration_since(window.started_at) >= self.window;

        if let Some(window) = windows.get_mut(key) {
            if !expired(window) {
                let reset_in = self
                    .window
                    .saturating_sub(now.saturating_duration_since(window.started_at));
                if window.count >= self.max_requests {
                    warn!(key, ?reset_in, "Rate limit exceeded");
                    return Err(AppError::RateLimited(key.to_string()));
                }
                window.count += 1;
                return Ok(RateLimitStatus {
                    remaining: self.max_requests - window.count,
                    reset_in,
                });
            }
        }

        if windows.len() >= self.max_keys && !windows.contains_key(key) {
            windows.retain(|_, window| !expired(window));
            if windows.len() >= self.max_keys {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, window)| window.started_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "Evicted oldest rate limit window");
                    windows.remove(&oldest);
                }
            }
        }

        windows.insert(
            key.to_string(),
            Window {
                count: 1,
                started_at: now,
            },
        );
        Ok(RateLimitStatus {
            remaining: self.max_requests - 1,
            reset_in: self.window,
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}
