use std::collections::HashMap;

use parking_lot::Mutex;
use reqwest::Method;

/// Identity under which consecutive failures are counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub method: Method,
    pub path: String,
}

impl RetryKey {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl std::fmt::Display for RetryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.method, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit; `attempt` is the 1-based number of the upcoming try.
    Retry { attempt: u32 },
    GiveUp { attempts: u32 },
}

/// Consecutive failed tries per [`RetryKey`].
#[derive(Debug, Default)]
pub struct RetryLedger {
    failures: Mutex<HashMap<RetryKey, u32>>,
}

impl RetryLedger {
    /// Counts one failed try. With `max_attempts` total tries allowed, the
    /// entry is dropped and `GiveUp` returned once the ceiling is reached.
    pub fn record_failure(&self, key: &RetryKey, max_attempts: u32) -> RetryDecision {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        *count += 1;
        let attempts = *count;
        if attempts >= max_attempts.max(1) {
            failures.remove(key);
            RetryDecision::GiveUp { attempts }
        } else {
            RetryDecision::Retry {
                attempt: attempts + 1,
            }
        }
    }

    pub fn clear(&self, key: &RetryKey) {
        self.failures.lock().remove(key);
    }

    pub fn reset(&self) {
        self.failures.lock().clear();
    }

    pub fn failures(&self, key: &RetryKey) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}
