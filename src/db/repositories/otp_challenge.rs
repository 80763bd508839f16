//! OTP challenge repository
//!
//! Query shapes for the OTP engine: latest-unconsumed lookup, rolling-window
//! counts for rate limiting, and the two guarded mutations (attempt charge,
//! consume). The guards make concurrent verifies safe without in-process
//! locks: a verify that loses the race sees zero affected rows.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::OtpChallenge;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// OTP challenge repository trait
#[async_trait]
pub trait OtpChallengeRepository: Send + Sync {
    /// Persist a new challenge
    async fn create(&self, challenge: &OtpChallenge) -> Result<OtpChallenge>;

    /// Most recently created unconsumed challenge for a phone
    async fn find_latest_unconsumed(&self, phone: &str) -> Result<Option<OtpChallenge>>;

    /// Challenges created for a phone since the given instant
    async fn count_by_phone_since(&self, phone: &str, since: DateTime<Utc>) -> Result<i64>;

    /// Challenges created from an IP since the given instant, across all phones
    async fn count_by_ip_since(&self, request_ip: &str, since: DateTime<Utc>) -> Result<i64>;

    /// Charge one attempt, guarded by the attempt cap and unconsumed state.
    /// Returns false when the guard rejected the charge (cap already reached
    /// or challenge consumed concurrently).
    async fn increment_attempts(&self, id: Uuid, max_attempts: i32) -> Result<bool>;

    /// Set `consumed_at`, guarded by the row being unconsumed. Returns false
    /// when another verify consumed the challenge first.
    async fn mark_consumed(&self, id: Uuid, consumed_at: DateTime<Utc>) -> Result<bool>;

    /// Delete challenges past their expiry (periodic sweep)
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based OTP challenge repository implementation
pub struct SqlxOtpChallengeRepository {
    pool: DynDatabasePool,
}

impl SqlxOtpChallengeRepository {
    /// Create a new SQLx OTP challenge repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn OtpChallengeRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl OtpChallengeRepository for SqlxOtpChallengeRepository {
    async fn create(&self, challenge: &OtpChallenge) -> Result<OtpChallenge> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_challenge_sqlite(self.pool.as_sqlite().unwrap(), challenge).await
            }
            DatabaseDriver::Mysql => {
                create_challenge_mysql(self.pool.as_mysql().unwrap(), challenge).await
            }
        }
    }

    async fn find_latest_unconsumed(&self, phone: &str) -> Result<Option<OtpChallenge>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_latest_unconsumed_sqlite(self.pool.as_sqlite().unwrap(), phone).await
            }
            DatabaseDriver::Mysql => {
                find_latest_unconsumed_mysql(self.pool.as_mysql().unwrap(), phone).await
            }
        }
    }

    async fn count_by_phone_since(&self, phone: &str, since: DateTime<Utc>) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                count_by_phone_since_sqlite(self.pool.as_sqlite().unwrap(), phone, since).await
            }
            DatabaseDriver::Mysql => {
                count_by_phone_since_mysql(self.pool.as_mysql().unwrap(), phone, since).await
            }
        }
    }

    async fn count_by_ip_since(&self, request_ip: &str, since: DateTime<Utc>) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                count_by_ip_since_sqlite(self.pool.as_sqlite().unwrap(), request_ip, since).await
            }
            DatabaseDriver::Mysql => {
                count_by_ip_since_mysql(self.pool.as_mysql().unwrap(), request_ip, since).await
            }
        }
    }

    async fn increment_attempts(&self, id: Uuid, max_attempts: i32) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                increment_attempts_sqlite(self.pool.as_sqlite().unwrap(), id, max_attempts).await
            }
            DatabaseDriver::Mysql => {
                increment_attempts_mysql(self.pool.as_mysql().unwrap(), id, max_attempts).await
            }
        }
    }

    async fn mark_consumed(&self, id: Uuid, consumed_at: DateTime<Utc>) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                mark_consumed_sqlite(self.pool.as_sqlite().unwrap(), id, consumed_at).await
            }
            DatabaseDriver::Mysql => {
                mark_consumed_mysql(self.pool.as_mysql().unwrap(), id, consumed_at).await
            }
        }
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                delete_expired_sqlite(self.pool.as_sqlite().unwrap(), cutoff).await
            }
            DatabaseDriver::Mysql => {
                delete_expired_mysql(self.pool.as_mysql().unwrap(), cutoff).await
            }
        }
    }
}

const INSERT_CHALLENGE: &str = r#"
    INSERT INTO otp_challenges
        (id, phone, code_hash, expires_at, consumed_at, request_ip, attempt_count, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_LATEST_UNCONSUMED: &str = r#"
    SELECT id, phone, code_hash, expires_at, consumed_at, request_ip, attempt_count, created_at
    FROM otp_challenges
    WHERE phone = ? AND consumed_at IS NULL
    ORDER BY created_at DESC
    LIMIT 1
"#;

const COUNT_BY_PHONE_SINCE: &str = r#"
    SELECT COUNT(*) FROM otp_challenges WHERE phone = ? AND created_at >= ?
"#;

const COUNT_BY_IP_SINCE: &str = r#"
    SELECT COUNT(*) FROM otp_challenges WHERE request_ip = ? AND created_at >= ?
"#;

// Attempt charge and consume are guarded so concurrent verifies for the same
// challenge cannot double-spend the attempt budget or both succeed.
const INCREMENT_ATTEMPTS: &str = r#"
    UPDATE otp_challenges
    SET attempt_count = attempt_count + 1
    WHERE id = ? AND consumed_at IS NULL AND attempt_count < ?
"#;

const MARK_CONSUMED: &str = r#"
    UPDATE otp_challenges SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL
"#;

const DELETE_EXPIRED: &str = "DELETE FROM otp_challenges WHERE expires_at < ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_challenge_sqlite(
    pool: &SqlitePool,
    challenge: &OtpChallenge,
) -> Result<OtpChallenge> {
    sqlx::query(INSERT_CHALLENGE)
        .bind(challenge.id.to_string())
        .bind(&challenge.phone)
        .bind(&challenge.code_hash)
        .bind(challenge.expires_at)
        .bind(challenge.consumed_at)
        .bind(&challenge.request_ip)
        .bind(challenge.attempt_count)
        .bind(challenge.created_at)
        .execute(pool)
        .await
        .context("Failed to create OTP challenge")?;

    Ok(challenge.clone())
}

async fn find_latest_unconsumed_sqlite(
    pool: &SqlitePool,
    phone: &str,
) -> Result<Option<OtpChallenge>> {
    let row = sqlx::query(SELECT_LATEST_UNCONSUMED)
        .bind(phone)
        .fetch_optional(pool)
        .await
        .context("Failed to look up OTP challenge")?;

    row.as_ref().map(row_to_challenge_sqlite).transpose()
}

async fn count_by_phone_since_sqlite(
    pool: &SqlitePool,
    phone: &str,
    since: DateTime<Utc>,
) -> Result<i64> {
    let row = sqlx::query(COUNT_BY_PHONE_SINCE)
        .bind(phone)
        .bind(since)
        .fetch_one(pool)
        .await
        .context("Failed to count OTP challenges by phone")?;

    Ok(row.get::<i64, _>(0))
}

async fn count_by_ip_since_sqlite(
    pool: &SqlitePool,
    request_ip: &str,
    since: DateTime<Utc>,
) -> Result<i64> {
    let row = sqlx::query(COUNT_BY_IP_SINCE)
        .bind(request_ip)
        .bind(since)
        .fetch_one(pool)
        .await
        .context("Failed to count OTP challenges by IP")?;

    Ok(row.get::<i64, _>(0))
}

async fn increment_attempts_sqlite(
    pool: &SqlitePool,
    id: Uuid,
    max_attempts: i32,
) -> Result<bool> {
    let result = sqlx::query(INCREMENT_ATTEMPTS)
        .bind(id.to_string())
        .bind(max_attempts)
        .execute(pool)
        .await
        .context("Failed to charge OTP attempt")?;

    Ok(result.rows_affected() == 1)
}

async fn mark_consumed_sqlite(
    pool: &SqlitePool,
    id: Uuid,
    consumed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(MARK_CONSUMED)
        .bind(consumed_at)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to consume OTP challenge")?;

    Ok(result.rows_affected() == 1)
}

async fn delete_expired_sqlite(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_EXPIRED)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired OTP challenges")?;

    Ok(result.rows_affected())
}

fn row_to_challenge_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<OtpChallenge> {
    let id: String = row.get("id");

    Ok(OtpChallenge {
        id: Uuid::parse_str(&id).context("Invalid challenge id in database")?,
        phone: row.get("phone"),
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
        consumed_at: row.get("consumed_at"),
        request_ip: row.get("request_ip"),
        attempt_count: row.get("attempt_count"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_challenge_mysql(
    pool: &MySqlPool,
    challenge: &OtpChallenge,
) -> Result<OtpChallenge> {
    sqlx::query(INSERT_CHALLENGE)
        .bind(challenge.id.to_string())
        .bind(&challenge.phone)
        .bind(&challenge.code_hash)
        .bind(challenge.expires_at)
        .bind(challenge.consumed_at)
        .bind(&challenge.request_ip)
        .bind(challenge.attempt_count)
        .bind(challenge.created_at)
        .execute(pool)
        .await
        .context("Failed to create OTP challenge")?;

    Ok(challenge.clone())
}

async fn find_latest_unconsumed_mysql(
    pool: &MySqlPool,
    phone: &str,
) -> Result<Option<OtpChallenge>> {
    let row = sqlx::query(SELECT_LATEST_UNCONSUMED)
        .bind(phone)
        .fetch_optional(pool)
        .await
        .context("Failed to look up OTP challenge")?;

    row.as_ref().map(row_to_challenge_mysql).transpose()
}

async fn count_by_phone_since_mysql(
    pool: &MySqlPool,
    phone: &str,
    since: DateTime<Utc>,
) -> Result<i64> {
    let row = sqlx::query(COUNT_BY_PHONE_SINCE)
        .bind(phone)
        .bind(since)
        .fetch_one(pool)
        .await
        .context("Failed to count OTP challenges by phone")?;

    Ok(row.get::<i64, _>(0))
}

async fn count_by_ip_since_mysql(
    pool: &MySqlPool,
    request_ip: &str,
    since: DateTime<Utc>,
) -> Result<i64> {
    let row = sqlx::query(COUNT_BY_IP_SINCE)
        .bind(request_ip)
        .bind(since)
        .fetch_one(pool)
        .await
        .context("Failed to count OTP challenges by IP")?;

    Ok(row.get::<i64, _>(0))
}

async fn increment_attempts_mysql(pool: &MySqlPool, id: Uuid, max_attempts: i32) -> Result<bool> {
    let result = sqlx::query(INCREMENT_ATTEMPTS)
        .bind(id.to_string())
        .bind(max_attempts)
        .execute(pool)
        .await
        .context("Failed to charge OTP attempt")?;

    Ok(result.rows_affected() == 1)
}

async fn mark_consumed_mysql(
    pool: &MySqlPool,
    id: Uuid,
    consumed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(MARK_CONSUMED)
        .bind(consumed_at)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to consume OTP challenge")?;

    Ok(result.rows_affected() == 1)
}

async fn delete_expired_mysql(pool: &MySqlPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_EXPIRED)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired OTP challenges")?;

    Ok(result.rows_affected())
}

fn row_to_challenge_mysql(row: &sqlx::mysql::MySqlRow) -> Result<OtpChallenge> {
    let id: String = row.get("id");
    let consumed_at: Option<DateTime<Utc>> = row.get("consumed_at");

    Ok(OtpChallenge {
        id: Uuid::parse_str(&id).context("Invalid challenge id in database")?,
        phone: row.get("phone"),
        code_hash: row.get("code_hash"),
        expires_at: row.get("expires_at"),
        consumed_at,
        request_ip: row.get("request_ip"),
        attempt_count: row.get("attempt_count"),
        created_at: row.get("created_at"),
    })
}
