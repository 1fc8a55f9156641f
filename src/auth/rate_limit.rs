//! Fixed-window rate limiting keyed by client address and endpoint class.
//!
//! Flow Overview:
//! 1) The first request for `class:client` opens a window with `count = 1`.
//! 2) Requests inside the window increment `count` until it reaches the class
//!    limit; further requests are rejected without being counted.
//! 3) The first request after the window closes opens a new one at `count = 1`.
//!
//! Fixed windows allow up to twice the limit across a window boundary. Clients
//! rely on `Retry-After` pointing at the fixed reset time, so the algorithm
//! must stay fixed-window.
//!
//! Scaling: windows live in process memory and expired ones are only swept
//! opportunistically (about 1% of checks). Every instance keeps its own view,
//! so this is only correct for a single-process deployment.

use rand::Rng;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;
/// Longest window a policy may configure (one day).
pub const MAX_WINDOW_SECS: u64 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitClass {
    Auth,
    Register,
    Post,
    Engagement,
    Read,
}

impl RateLimitClass {
    pub const ALL: [Self; 5] = [
        Self::Auth,
        Self::Register,
        Self::Post,
        Self::Engagement,
        Self::Read,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Register => "register",
            Self::Post => "post",
            Self::Engagement => "engagement",
            Self::Read => "read",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

impl FromStr for RateLimitPolicy {
    type Err = String;

    /// Parses `MAX/SECONDS`, e.g. `30/60`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (max, seconds) = value
            .split_once('/')
            .ok_or_else(|| format!("expected MAX/SECONDS, got '{value}'"))?;
        let max_requests = max
            .trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid max requests '{max}': {err}"))?;
        let seconds = seconds
            .trim()
            .trim_end_matches('s')
            .parse::<u64>()
            .map_err(|err| format!("invalid window seconds '{seconds}': {err}"))?;

        if max_requests == 0 || seconds == 0 {
            return Err("max requests and window must be greater than zero".to_string());
        }
        if seconds > MAX_WINDOW_SECS {
            return Err(format!("window must be at most {MAX_WINDOW_SECS} seconds"));
        }

        Ok(Self {
            max_requests,
            window: Duration::from_secs(seconds),
        })
    }
}

/// Policy table, one entry per endpoint class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub auth: RateLimitPolicy,
    pub register: RateLimitPolicy,
    pub post: RateLimitPolicy,
    pub engagement: RateLimitPolicy,
    pub read: RateLimitPolicy,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            auth: RateLimitPolicy::per_minute(5),
            register: RateLimitPolicy::per_minute(3),
            post: RateLimitPolicy::per_minute(30),
            engagement: RateLimitPolicy::per_minute(60),
            read: RateLimitPolicy::per_minute(100),
        }
    }
}

impl RateLimits {
    #[must_use]
    pub const fn policy(&self, class: RateLimitClass) -> RateLimitPolicy {
        match class {
            RateLimitClass::Auth => self.auth,
            RateLimitClass::Register => self.register,
            RateLimitClass::Post => self.post,
            RateLimitClass::Engagement => self.engagement,
            RateLimitClass::Read => self.read,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, class: RateLimitClass, policy: RateLimitPolicy) -> Self {
        match class {
            RateLimitClass::Auth => self.auth = policy,
            RateLimitClass::Register => self.register = policy,
            RateLimitClass::Post => self.post = policy,
            RateLimitClass::Engagement => self.engagement = policy,
            RateLimitClass::Read => self.read = policy,
        }
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        u64::try_from(self.reset_in.as_millis().div_ceil(1000)).unwrap_or(u64::MAX)
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, client_key: &str, class: RateLimitClass) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _client_key: &str, _class: RateLimitClass) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: u32::MAX,
            reset_in: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// In-process fixed-window limiter.
///
/// The whole read-check-increment sequence runs under one lock, so concurrent
/// requests can never both be admitted on the last free slot.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limits: RateLimits,
    sweep_probability: f64,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Check against an explicit policy instead of the configured table.
    pub fn check_with(
        &self,
        client_key: &str,
        class: RateLimitClass,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        self.check_at(client_key, class, policy, Instant::now())
    }

    fn check_at(
        &self,
        client_key: &str,
        class: RateLimitClass,
        policy: RateLimitPolicy,
        now: Instant,
    ) -> RateLimitDecision {
        let key = format!("{}:{client_key}", class.as_str());
        let sweep = self.sweep_probability > 0.0
            && rand::thread_rng().gen_bool(self.sweep_probability);

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if sweep {
            sweep_locked(&mut windows, now);
        }

        // The window stays live through its reset instant.
        if let Some(window) = windows.get_mut(&key).filter(|w| now <= w.reset_at) {
            let reset_in = window.reset_at.saturating_duration_since(now);

            if window.count >= policy.max_requests {
                debug!(class = class.as_str(), client_key, "rate limited");
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_in,
                };
            }

            window.count += 1;
            return RateLimitDecision {
                allowed: true,
                remaining: policy.max_requests - window.count,
                reset_in,
            };
        }

        let window = policy.window.min(Duration::from_secs(MAX_WINDOW_SECS));
        let reset_at = now.checked_add(window).unwrap_or(now);
        windows.insert(key, Window { count: 1, reset_at });

        RateLimitDecision {
            allowed: true,
            remaining: policy.max_requests.saturating_sub(1),
            reset_in: reset_at.saturating_duration_since(now),
        }
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn sweep_locked(windows: &mut HashMap<String, Window>, now: Instant) -> usize {
    let before = windows.len();
    windows.retain(|_, window| now <= window.reset_at);
    let evicted = before - windows.len();
    if evicted > 0 {
        debug!(evicted, "swept expired rate-limit windows");
    }
    evicted
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, client_key: &str, class: RateLimitClass) -> RateLimitDecision {
        self.check_with(client_key, class, self.limits.policy(class))
    }
}
