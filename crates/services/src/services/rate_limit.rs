//! Per-user fixed-window limits on manager team notifications.

use std::sync::Arc;

use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use ts_rs::TS;
use uuid::Uuid;

use super::config::NotificationLimits;

const HOURLY_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u32,
    pub expires_at: DateTime<Utc>,
}

/// Expiring counters keyed by string.
pub trait CounterStore: Send + Sync {
    /// Live counter for `key`; expired counters read as absent.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Counter>;

    /// Increment `key`, starting a fresh window ending at `expires_at` when absent or expired.
    fn increment(&self, key: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Counter;
}

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.counters.retain(|_, counter| counter.expires_at > now);
    }
}

impl CounterStore for InMemoryCounterStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Counter> {
        self.counters
            .get(key)
            .map(|entry| *entry.value())
            .filter(|counter| counter.expires_at > now)
    }

    fn increment(&self, key: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Counter {
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at,
        });
        if entry.expires_at <= now {
            *entry = Counter {
                count: 0,
                expires_at,
            };
        }
        entry.count += 1;
        *entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
pub struct WindowStatus {
    pub limit: u32,
    pub used: u32,
    pub reset_in_seconds: i64,
}

impl WindowStatus {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
pub struct RateLimitStatus {
    pub hourly: WindowStatus,
    pub daily: WindowStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitRejection {
    #[error("Hourly notification limit reached. Please try again later.")]
    HourlyExceeded { limit: u32, reset_in_seconds: i64 },
    #[error("Daily notification limit reached. Please try again tomorrow.")]
    DailyExceeded { limit: u32, reset_in_seconds: i64 },
    #[error("Cannot send to more than {max} recipients at once")]
    TooManyRecipients { max: usize, requested: usize },
}

#[derive(Clone)]
pub struct NotificationRateLimiter {
    store: Arc<dyn CounterStore>,
    limits: NotificationLimits,
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Days::new(1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

impl NotificationRateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limits: NotificationLimits) -> Self {
        Self { store, limits }
    }

    pub fn in_memory(limits: NotificationLimits) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), limits)
    }

    pub fn limits(&self) -> &NotificationLimits {
        &self.limits
    }

    fn hourly_key(user_id: Uuid) -> String {
        format!("notifications:hourly:{user_id}")
    }

    fn daily_key(user_id: Uuid) -> String {
        format!("notifications:daily:{user_id}")
    }

    fn window(&self, key: &str, limit: u32, fresh_expiry: DateTime<Utc>, now: DateTime<Utc>) -> WindowStatus {
        let counter = self.store.get(key, now);
        let expires_at = counter.map_or(fresh_expiry, |c| c.expires_at);
        WindowStatus {
            limit,
            used: counter.map_or(0, |c| c.count),
            reset_in_seconds: (expires_at - now).num_seconds().max(0),
        }
    }

    pub fn status(&self, user_id: Uuid, now: DateTime<Utc>) -> RateLimitStatus {
        RateLimitStatus {
            hourly: self.window(
                &Self::hourly_key(user_id),
                self.limits.max_per_hour,
                now + Duration::seconds(HOURLY_WINDOW_SECS),
                now,
            ),
            daily: self.window(
                &Self::daily_key(user_id),
                self.limits.max_per_day,
                next_utc_midnight(now),
                now,
            ),
        }
    }

    /// Decide whether `user_id` may send a notification to `recipients` people now.
    ///
    /// The hourly window is checked first, then the daily window, then the recipient cap.
    pub fn check(
        &self,
        user_id: Uuid,
        recipients: usize,
        now: DateTime<Utc>,
    ) -> Result<RateLimitStatus, RateLimitRejection> {
        let status = self.status(user_id, now);
        if status.hourly.used >= status.hourly.limit {
            warn!(user_id = %user_id, limit = status.hourly.limit, "Hourly notification limit reached");
            return Err(RateLimitRejection::HourlyExceeded {
                limit: status.hourly.limit,
                reset_in_seconds: status.hourly.reset_in_seconds,
            });
        }
        if status.daily.used >= status.daily.limit {
            warn!(user_id = %user_id, limit = status.daily.limit, "Daily notification limit reached");
            return Err(RateLimitRejection::DailyExceeded {
                limit: status.daily.limit,
                reset_in_seconds: status.daily.reset_in_seconds,
            });
        }
        if recipients > self.limits.max_recipients {
            warn!(user_id = %user_id, recipients, max = self.limits.max_recipients, "Too many notification recipients");
            return Err(RateLimitRejection::TooManyRecipients {
                max: self.limits.max_recipients,
                requested: recipients,
            });
        }
        Ok(status)
    }

    /// Count one successful notification against both windows.
    pub fn record_success(&self, user_id: Uuid, now: DateTime<Utc>) -> RateLimitStatus {
        self.store.increment(
            &Self::hourly_key(user_id),
            now + Duration::seconds(HOURLY_WINDOW_SECS),
            now,
        );
        self.store
            .increment(&Self::daily_key(user_id), next_utc_midnight(now), now);
        self.status(user_id, now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn fifty_first_notification_in_an_hour_is_blocked() {
        let limiter = NotificationRateLimiter::in_memory(NotificationLimits::default());
        let user = Uuid::new_v4();
        let start = at(9, 0, 0);

        for i in 0..50 {
            let now = start + Duration::seconds(i);
            limiter.check(user, 1, now).unwrap();
            limiter.record_success(user, now);
        }

        let err = limiter.check(user, 1, start + Duration::seconds(60)).unwrap_err();
        assert_eq!(
            err,
            RateLimitRejection::HourlyExceeded {
                limit: 50,
                reset_in_seconds: 3540
            }
        );

        // the hourly window opened at the first increment
        let status = limiter.check(user, 1, start + Duration::seconds(3600)).unwrap();
        assert_eq!(status.hourly.used, 0);
        assert_eq!(status.daily.used, 50);
    }

    #[test]
    fn daily_window_ends_at_utc_midnight() {
        let limits = NotificationLimits {
            max_per_hour: 100,
            max_per_day: 2,
            ..NotificationLimits::default()
        };
        let limiter = NotificationRateLimiter::in_memory(limits);
        let user = Uuid::new_v4();

        limiter.record_success(user, at(22, 0, 0));
        limiter.record_success(user, at(23, 0, 0));
        let err = limiter.check(user, 1, at(23, 30, 0)).unwrap_err();
        assert_eq!(
            err,
            RateLimitRejection::DailyExceeded {
                limit: 2,
                reset_in_seconds: 1800
            }
        );

        let tomorrow = at(23, 59, 59) + Duration::seconds(1);
        assert!(limiter.check(user, 1, tomorrow).is_ok());
    }

    #[test]
    fn recipient_cap_applies_below_the_windows() {
        let limiter = NotificationRateLimiter::in_memory(NotificationLimits::default());
        let err = limiter.check(Uuid::new_v4(), 101, at(8, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            RateLimitRejection::TooManyRecipients {
                max: 100,
                requested: 101
            }
        ));
        assert!(limiter.check(Uuid::new_v4(), 100, at(8, 0, 0)).is_ok());
    }

    #[test]
    fn exhausted_window_wins_over_recipient_cap() {
        let limiter = NotificationRateLimiter::in_memory(NotificationLimits::default());
        let user = Uuid::new_v4();
        let now = at(9, 15, 0);
        for _ in 0..50 {
            limiter.record_success(user, now);
        }
        assert!(matches!(
            limiter.check(user, 101, now).unwrap_err(),
            RateLimitRejection::HourlyExceeded { limit: 50, .. }
        ));
    }

    #[test]
    fn users_are_counted_separately() {
        let limiter = NotificationRateLimiter::in_memory(NotificationLimits::default());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = at(10, 0, 0);
        limiter.record_success(a, now);
        let status = limiter.record_success(a, now);
        assert_eq!(status.hourly.remaining(), 48);
        assert_eq!(limiter.status(b, now).hourly.used, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let now = at(12, 0, 0);
        let expires = now + Duration::seconds(60);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.increment("k", expires, now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("k", now).map(|c| c.count), Some(800));
        store.purge_expired(expires);
        assert_eq!(store.get("k", now), None);
    }
}
