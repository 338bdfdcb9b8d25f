//! Fixed-window rate limiter with lockout escalation.
//!
//! Each key (source address) gets a counter that resets when its window
//! period elapses. Going over `limit` inside one window soft-blocks the
//! request; reaching `lockout_limit` locks the key out for `lockout_time`,
//! during which every request is refused.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Verdict for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    /// Allowed.
    None,
    /// Over the soft limit for this window.
    Limit,
    /// This request tripped the lockout. Returned once per lockout.
    LimitNowLockout,
    /// Key is serving a lockout.
    Locked,
}

impl RateLimit {
    pub fn is_blocked(self) -> bool {
        self != RateLimit::None
    }
}

/// An imposed lockout. A lockout too long for the clock never ends.
#[derive(Debug, Clone, Copy)]
enum Lockout {
    Until(Instant),
    Forever,
}

impl Lockout {
    fn starting(now: Instant, duration: Duration) -> Self {
        now.checked_add(duration).map_or(Lockout::Forever, Lockout::Until)
    }

    fn holds_at(self, now: Instant) -> bool {
        match self {
            Lockout::Until(until) => now < until,
            Lockout::Forever => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    window_start: Instant,
    count: u32,
    lockout: Option<Lockout>,
}

impl Entry {
    fn fresh(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            lockout: None,
        }
    }
}

/// A rate limiter with configurable per-key limits and window duration.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// Per-key tracking: key → window state.
    entries: HashMap<String, Entry>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Count a request for `key` and return the verdict.
    pub fn limit(&mut self, key: &str) -> RateLimit {
        self.limit_at(key, Instant::now())
    }

    /// [`RateLimiter::limit`] against an explicit clock reading.
    pub fn limit_at(&mut self, key: &str, now: Instant) -> RateLimit {
        if !self.config.enabled {
            return RateLimit::None;
        }

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::fresh(now));

        match entry.lockout {
            Some(lockout) if lockout.holds_at(now) => return RateLimit::Locked,
            Some(_) => *entry = Entry::fresh(now),
            None if now.duration_since(entry.window_start) >= self.config.period => {
                *entry = Entry::fresh(now);
            }
            None => {}
        }

        entry.count += 1;

        if entry.count >= self.config.lockout_limit {
            entry.count = 0;
            entry.lockout = Some(Lockout::starting(now, self.config.lockout_time));
            RateLimit::LimitNowLockout
        } else if entry.count > self.config.limit {
            RateLimit::Limit
        } else {
            RateLimit::None
        }
    }

    /// Drop keys whose window and lockout have both run out.
    pub fn gc(&mut self) {
        self.gc_at(Instant::now());
    }

    pub fn gc_at(&mut self, now: Instant) {
        let period = self.config.period;
        self.entries.retain(|_, entry| match entry.lockout {
            Some(lockout) => lockout.holds_at(now),
            None => now.duration_since(entry.window_start) < period,
        });
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

/// The relay's limiters: one for world creation, one for pings, polls and joins.
#[derive(Debug)]
pub struct RelayRateLimits {
    pub world: RateLimiter,
    pub ping: RateLimiter,
}

impl RelayRateLimits {
    pub fn new(world: RateLimitConfig, ping: RateLimitConfig) -> Self {
        Self {
            world: RateLimiter::new(world),
            ping: RateLimiter::new(ping),
        }
    }

    /// Run garbage collection on all limiters.
    pub fn gc(&mut self) {
        self.world.gc();
        self.ping.gc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: u32, lockout_limit: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            period: Duration::from_secs(60),
            limit,
            lockout_limit,
            lockout_time: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_soft_limit() {
        let mut limiter = RateLimiter::new(config(3, 10));
        let t = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.limit_at("1.2.3.4", t), RateLimit::None);
        }
        assert_eq!(limiter.limit_at("1.2.3.4", t), RateLimit::Limit);
        // Other keys are unaffected.
        assert_eq!(limiter.limit_at("5.6.7.8", t), RateLimit::None);
    }

    #[test]
    fn test_window_resets() {
        let mut limiter = RateLimiter::new(config(1, 10));
        let t = Instant::now();
        assert_eq!(limiter.limit_at("a", t), RateLimit::None);
        assert_eq!(limiter.limit_at("a", t), RateLimit::Limit);
        let later = t + Duration::from_secs(61);
        assert_eq!(limiter.limit_at("a", later), RateLimit::None);
    }

    #[test]
    fn test_lockout_sequence() {
        let mut limiter = RateLimiter::new(config(2, 5));
        let t = Instant::now();
        let verdicts: Vec<RateLimit> = (0..5).map(|_| limiter.limit_at("a", t)).collect();
        assert_eq!(
            verdicts,
            vec![
                RateLimit::None,
                RateLimit::None,
                RateLimit::Limit,
                RateLimit::Limit,
                RateLimit::LimitNowLockout,
            ]
        );

        // Locked for the whole lockout, even across window boundaries.
        assert_eq!(limiter.limit_at("a", t), RateLimit::Locked);
        assert_eq!(
            limiter.limit_at("a", t + Duration::from_secs(299)),
            RateLimit::Locked
        );

        // Afterwards the key starts a fresh window.
        let after = t + Duration::from_secs(300);
        assert_eq!(limiter.limit_at("a", after), RateLimit::None);
        assert_eq!(limiter.limit_at("a", after), RateLimit::None);
        assert_eq!(limiter.limit_at("a", after), RateLimit::Limit);
    }

    #[test]
    fn test_lockout_reported_once() {
        let mut limiter = RateLimiter::new(config(1, 3));
        let t = Instant::now();
        let lockouts = (0..20)
            .map(|_| limiter.limit_at("a", t))
            .filter(|v| *v == RateLimit::LimitNowLockout)
            .count();
        assert_eq!(lockouts, 1);
    }

    #[test]
    fn test_disabled_limiter() {
        let mut cfg = config(1, 2);
        cfg.enabled = false;
        let mut limiter = RateLimiter::new(cfg);
        for _ in 0..10 {
            assert_eq!(limiter.limit("a"), RateLimit::None);
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_gc() {
        let mut limiter = RateLimiter::new(config(1, 2));
        let t = Instant::now();
        limiter.limit_at("windowed", t);
        limiter.limit_at("locked", t);
        limiter.limit_at("locked", t);
        assert_eq!(limiter.tracked(), 2);

        // Window expired, lockout still running.
        limiter.gc_at(t + Duration::from_secs(120));
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(
            limiter.limit_at("locked", t + Duration::from_secs(120)),
            RateLimit::Locked
        );

        limiter.gc_at(t + Duration::from_secs(301));
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_unrepresentable_lockout_never_expires() {
        let mut cfg = config(1, 2);
        cfg.lockout_time = Duration::MAX;
        let mut limiter = RateLimiter::new(cfg);
        let t = Instant::now();
        assert_eq!(limiter.limit_at("a", t), RateLimit::None);
        assert_eq!(limiter.limit_at("a", t), RateLimit::LimitNowLockout);

        let much_later = t + Duration::from_secs(100 * 365 * 24 * 3600);
        assert_eq!(limiter.limit_at("a", much_later), RateLimit::Locked);
        limiter.gc_at(much_later);
        assert_eq!(limiter.tracked(), 1);
    }
}
