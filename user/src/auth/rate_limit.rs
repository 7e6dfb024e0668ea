//! Login attempt rate limiting, fixed window per `(email, origin)`.
//!
//! For a key the limiter:
//! 1. creates `{attempt_count: 1, window_start: now}` when no record exists
//! 2. resets to `{1, now}` once `now - window_start > window`
//! 3. blocks, leaving the record untouched, when `attempt_count >= max_attempts`
//! 4. otherwise increments `attempt_count` and stamps `last_attempt`
//!
//! Each store performs all four steps as one atomic operation so concurrent
//! attempts for the same key can never admit more than `max_attempts`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::normalize_email;
use crate::error::Result;

/// Limits applied to login attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window_seconds: i64,
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_seconds: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitDecision {
    Allowed,
    Blocked,
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        self == RateLimitDecision::Allowed
    }
}

/// Counter key. The email is normalized so case variants share one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub email: String,
    pub origin: String,
}

impl RateLimitKey {
    pub fn new(email: &str, origin: &str) -> Self {
        Self {
            email: normalize_email(email),
            origin: origin.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub attempt_count: u32,
    pub window_start: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
}

/// Shared counter storage.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Apply the algorithm for one attempt, atomically.
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision>;

    /// Read a record without counting an attempt.
    async fn peek(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>>;
}

/// In-process store. The whole algorithm runs under one lock.
#[derive(Debug, Default, Clone)]
pub struct MemoryRateLimitStore {
    records: Arc<Mutex<HashMap<RateLimitKey, RateLimitRecord>>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision> {
        let mut records = self.records.lock().await;

        let Some(record) = records.get_mut(key) else {
            records.insert(
                key.clone(),
                RateLimitRecord {
                    attempt_count: 1,
                    window_start: now,
                    last_attempt: now,
                },
            );
            return Ok(RateLimitDecision::Allowed);
        };

        if now - record.window_start > policy.window() {
            *record = RateLimitRecord {
                attempt_count: 1,
                window_start: now,
                last_attempt: now,
            };
            return Ok(RateLimitDecision::Allowed);
        }

        if record.attempt_count >= policy.max_attempts {
            return Ok(RateLimitDecision::Blocked);
        }

        record.attempt_count += 1;
        record.last_attempt = now;
        Ok(RateLimitDecision::Allowed)
    }

    async fn peek(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }
}

/// SQLite-backed store sharing the credential store's pool.
///
/// The four steps are a single `INSERT .. ON CONFLICT DO UPDATE .. WHERE ..
/// RETURNING` statement. When the conflict branch's `WHERE` rejects the update
/// no row comes back and the attempt is blocked.
#[derive(Debug, Clone)]
pub struct SqliteRateLimitStore {
    pool: SqlitePool,
}

impl SqliteRateLimitStore {
    /// Expects the `login_attempts` table created by the user database migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision> {
        let now_ms = now.timestamp_millis();
        let window_ms = policy.window().num_milliseconds();

        let query = r#"
            INSERT INTO login_attempts (email, origin, attempt_count, window_start, last_attempt)
            VALUES (?1, ?2, 1, ?3, ?3)
            ON CONFLICT(email, origin) DO UPDATE SET
                attempt_count = CASE
                    WHEN ?3 - login_attempts.window_start > ?4 THEN 1
                    ELSE login_attempts.attempt_count + 1
                END,
                window_start = CASE
                    WHEN ?3 - login_attempts.window_start > ?4 THEN ?3
                    ELSE login_attempts.window_start
                END,
                last_attempt = ?3
            WHERE ?3 - login_attempts.window_start > ?4
               OR login_attempts.attempt_count < ?5
            RETURNING attempt_count
        "#;

        let row: Option<i64> = sqlx::query_scalar(query)
            .bind(&key.email)
            .bind(&key.origin)
            .bind(now_ms)
            .bind(window_ms)
            .bind(i64::from(policy.max_attempts))
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(count) => {
                debug!("login attempt {} recorded for {}", count, key.email);
                RateLimitDecision::Allowed
            }
            None => RateLimitDecision::Blocked,
        })
    }

    async fn peek(&self, key: &RateLimitKey) -> Result<Option<RateLimitRecord>> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT attempt_count, window_start, last_attempt FROM login_attempts WHERE email = ? AND origin = ?",
        )
        .bind(&key.email)
        .bind(&key.origin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(count, start, last)| {
            Some(RateLimitRecord {
                attempt_count: u32::try_from(count).ok()?,
                window_start: DateTime::from_timestamp_millis(start)?,
                last_attempt: DateTime::from_timestamp_millis(last)?,
            })
        }))
    }
}

/// The login gate: a store plus a policy.
#[derive(Clone)]
pub struct LoginRateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
}

impl LoginRateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Limiter backed by a fresh in-memory store.
    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()), policy)
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one login attempt for `(email, origin)`.
    pub async fn check_and_record(&self, email: &str, origin: &str) -> Result<RateLimitDecision> {
        self.check_and_record_at(email, origin, Utc::now()).await
    }

    pub async fn check_and_record_at(
        &self,
        email: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let key = RateLimitKey::new(email, origin);
        let decision = self.store.check_and_record(&key, now, &self.policy).await?;
        if decision == RateLimitDecision::Blocked {
            warn!(
                "login attempts for {} from {} exceeded {} per {}s",
                key.email, key.origin, self.policy.max_attempts, self.policy.window_seconds
            );
        }
        Ok(decision)
    }

    pub async fn peek(&self, email: &str, origin: &str) -> Result<Option<RateLimitRecord>> {
        self.store.peek(&RateLimitKey::new(email, origin)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap()
    }

    async fn sqlite_store() -> SqliteRateLimitStore {
        // A single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(crate::database::LOGIN_ATTEMPTS_TABLE)
            .execute(&pool)
            .await
            .unwrap();
        SqliteRateLimitStore::new(pool)
    }

    async fn assert_sequential_window(limiter: LoginRateLimiter) {
        for i in 0..5 {
            let decision = limiter
                .check_and_record_at("victim@demo.test", "10.0.0.1", t0() + Duration::seconds(i))
                .await
                .unwrap();
            assert_eq!(decision, RateLimitDecision::Allowed, "attempt {}", i + 1);
        }

        let sixth = limiter
            .check_and_record_at("victim@demo.test", "10.0.0.1", t0() + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(sixth, RateLimitDecision::Blocked);

        // Blocked attempts leave the record untouched
        let record = limiter.peek("victim@demo.test", "10.0.0.1").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 5);
        assert_eq!(record.last_attempt, t0() + Duration::seconds(4));

        // Exactly at the window edge the window is still open
        let at_edge = limiter
            .check_and_record_at("victim@demo.test", "10.0.0.1", t0() + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(at_edge, RateLimitDecision::Blocked);

        let after = t0() + Duration::minutes(15) + Duration::seconds(1);
        let decision = limiter
            .check_and_record_at("victim@demo.test", "10.0.0.1", after)
            .await
            .unwrap();
        assert_eq!(decision, RateLimitDecision::Allowed);

        let record = limiter.peek("victim@demo.test", "10.0.0.1").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.window_start, after);
    }

    #[tokio::test]
    async fn test_memory_store_window() {
        assert_sequential_window(LoginRateLimiter::in_memory(RateLimitPolicy::default())).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_window() {
        let store = sqlite_store().await;
        assert_sequential_window(LoginRateLimiter::new(
            Arc::new(store),
            RateLimitPolicy::default(),
        ))
        .await;
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = LoginRateLimiter::in_memory(RateLimitPolicy {
            max_attempts: 1,
            window_seconds: 60,
        });

        assert!(limiter
            .check_and_record_at("a@demo.test", "1.1.1.1", t0())
            .await
            .unwrap()
            .is_allowed());
        assert!(!limiter
            .check_and_record_at("a@demo.test", "1.1.1.1", t0())
            .await
            .unwrap()
            .is_allowed());
        // Same email, other origin
        assert!(limiter
            .check_and_record_at("a@demo.test", "2.2.2.2", t0())
            .await
            .unwrap()
            .is_allowed());
        // Case variants share a counter
        assert!(!limiter
            .check_and_record_at("A@Demo.Test", "1.1.1.1", t0())
            .await
            .unwrap()
            .is_allowed());
    }

    async fn assert_no_overshoot(limiter: LoginRateLimiter) {
        let max = limiter.policy().max_attempts as usize;
        let mut handles = Vec::new();
        for _ in 0..(max + 20) {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_and_record_at("target@demo.test", "203.0.113.9", t0())
                    .await
                    .unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, max);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_store_concurrency() {
        assert_no_overshoot(LoginRateLimiter::in_memory(RateLimitPolicy::default())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_store_concurrency() {
        let store = sqlite_store().await;
        assert_no_overshoot(LoginRateLimiter::new(
            Arc::new(store),
            RateLimitPolicy::default(),
        ))
        .await;
    }
}
