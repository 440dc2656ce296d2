use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding one-minute window limiter for outgoing notifications
///
/// Emergency notifications do not pass through the limiter; everything else
/// is refused once `max_per_minute` sends happened in the last minute.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_minute: usize,
    /// Send times inside the current window, oldest first
    sent: VecDeque<DateTime<Utc>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_minute,
            sent: VecDeque::new(),
        }
    }

    /// Whether a send at `now` stays within the limit
    pub fn can_send_at(&mut self, now: DateTime<Utc>) -> bool {
        self.expire(now);
        self.sent.len() < self.max_per_minute
    }

    /// Reserve a slot at `now`, returning `false` when rate limited
    pub fn try_acquire_at(&mut self, now: DateTime<Utc>) -> bool {
        if !self.can_send_at(now) {
            return false;
        }
        self.record_at(now);
        true
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    /// Record a send at `timestamp`, keeping the window ordered
    pub fn record_at(&mut self, timestamp: DateTime<Utc>) {
        let index = self.sent.partition_point(|sent| *sent <= timestamp);
        self.sent.insert(index, timestamp);
    }

    /// Sends counted in the window ending at `now`
    pub fn count_at(&mut self, now: DateTime<Utc>) -> usize {
        self.expire(now);
        self.sent.len()
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(1);
        while self.sent.front().is_some_and(|sent| *sent <= cutoff) {
            self.sent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let mut limiter = RateLimiter::new(3);
        let now = Utc::now();

        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));
        assert_eq!(limiter.count_at(now), 3);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(2);
        let now = Utc::now();

        limiter.record_at(now - Duration::seconds(30));
        limiter.record_at(now - Duration::seconds(10));
        assert!(!limiter.can_send_at(now));

        // The first send leaves the window 30 seconds later
        assert!(limiter.can_send_at(now + Duration::seconds(35)));
        assert_eq!(limiter.count_at(now + Duration::seconds(35)), 1);
    }

    #[test]
    fn test_out_of_order_records_expire_correctly() {
        let mut limiter = RateLimiter::new(5);
        let now = Utc::now();

        limiter.record_at(now - Duration::seconds(10));
        limiter.record_at(now - Duration::minutes(5));
        limiter.record_at(now - Duration::seconds(30));

        assert_eq!(limiter.count_at(now), 2);
    }

    #[test]
    fn test_zero_limit_refuses_everything() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.try_acquire());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_never_exceeds_limit_within_a_minute(limit: u8, attempts: u8) -> bool {
        let limit = limit as usize % 10;
        let mut limiter = RateLimiter::new(limit);
        let start = Utc::now();

        let granted = (0..attempts as i64)
            .filter(|i| limiter.try_acquire_at(start + Duration::milliseconds(i * 100)))
            .count();

        // 255 attempts at 100ms spacing span under 26 seconds
        granted == limit.min(attempts as usize)
    }
}
