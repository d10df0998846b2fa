use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// In-memory sliding window of failed login attempts, keyed by
/// `"<ip_hash>:<username>"`. A successful login clears its key.
pub struct LoginThrottle {
    failures: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginThrottle {
    pub fn new() -> Self {
        LoginThrottle {
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(ip_hash: &str, username: &str) -> String {
        format!("{}:{}", ip_hash, username.trim().to_lowercase())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        // A poisoned map only holds timestamps; keep using it
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while fewer than `max_failures` failures fall inside `window`.
    pub fn allowed(&self, key: &str, max_failures: u64, window: Duration) -> bool {
        let mut map = self.lock();
        let Some(cutoff) = Instant::now().checked_sub(window) else {
            return map.get(key).map_or(0, Vec::len) < max_failures as usize;
        };
        match map.get_mut(key) {
            Some(attempts) => {
                attempts.retain(|t| *t > cutoff);
                (attempts.len() as u64) < max_failures
            }
            None => true,
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.lock()
            .entry(key.to_string())
            .or_default()
            .push(Instant::now());
    }

    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop keys whose newest failure is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut map = self.lock();
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        let before = map.len();
        map.retain(|_, attempts| {
            attempts.retain(|t| *t > cutoff);
            !attempts.is_empty()
        });
        before - map.len()
    }
}
