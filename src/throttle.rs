// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rate/Retry Governor
//!
//! Fixed-window request throttle shared by every classification caller in
//! the process, plus a retry wrapper for quota errors. The window counter
//! sits behind an async mutex so it stays sound if callers ever run on
//! multiple worker threads.

use log::{debug, warn};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Default window: 15 requests per rolling 60 seconds, process-wide.
pub const DEFAULT_MAX_REQUESTS: u32 = 15;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window request counter. `acquire` blocks the caller until a slot
/// frees up when the window is exhausted.
#[derive(Debug)]
pub struct RateWindow {
    max_requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateWindow {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(WindowState {
                count: 0,
                reset_at: Instant::now() + window,
            }),
        }
    }

    /// Waits until a request slot is available in the current window, then
    /// claims it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now >= state.reset_at {
                    state.count = 0;
                    state.reset_at = now + self.window;
                }
                if state.count < self.max_requests {
                    state.count += 1;
                    return;
                }
                state.reset_at - now
            };
            debug!("Rate window exhausted, waiting {:?} for reset", wait);
            sleep(wait).await;
        }
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Implemented by error types whose failures may be worth retrying.
pub trait RetryableError {
    /// True when the upstream rejected the call for quota/rate reasons.
    fn is_rate_limit(&self) -> bool;

    /// Explicit retry-after duration named by the upstream, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retries `op` up to 3 times on rate-limit errors with exponential backoff
/// (1s doubling plus jitter, capped at 30s). An upstream retry-after wins
/// over the computed backoff. Any other error propagates immediately.
pub async fn with_retry<T, E, F, Fut>(label: &str, mut op: F) -> Result<T, E>
where
    E: RetryableError + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limit() && attempt < MAX_RETRIES => {
                let delay = e.retry_after().unwrap_or_else(|| {
                    let base = BASE_BACKOFF * 2u32.saturating_pow(attempt);
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                    (base + jitter).min(MAX_BACKOFF)
                });
                attempt += 1;
                warn!(
                    "{} rate-limited ({}), retry {}/{} in {:?}",
                    label, e, attempt, MAX_RETRIES, delay
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        rate_limited: bool,
        retry_after: Option<Duration>,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error")
        }
    }

    impl RetryableError for TestError {
        fn is_rate_limit(&self) -> bool {
            self.rate_limited
        }
        fn retry_after(&self) -> Option<Duration> {
            self.retry_after
        }
    }

    #[tokio::test]
    async fn acquire_passes_under_the_limit() {
        let window = RateWindow::new(10, Duration::from_secs(60));
        for _ in 0..10 {
            window.acquire().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_until_window_reset() {
        let window = RateWindow::new(2, Duration::from_secs(60));
        window.acquire().await;
        window.acquire().await;

        let start = Instant::now();
        window.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError {
                        rate_limited: true,
                        retry_after: None,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_rate_limit_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TestError {
                    rate_limited: false,
                    retry_after: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_retry_after_is_honored() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), TestError> = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TestError {
                        rate_limited: true,
                        retry_after: Some(Duration::from_secs(7)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(7));
        // No jitter on top of an explicit retry-after.
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TestError {
                    rate_limited: true,
                    retry_after: None,
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
