//! Session repository
//!
//! Query shapes for session lifecycle: token lookups, the per-user active
//! count and oldest-first eviction, guarded token rotation, deactivation,
//! and the expiry sweep.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Active session holding the given access token
    async fn find_active_by_access_token(&self, access_token: &str) -> Result<Option<Session>>;

    /// Session holding the given refresh token, active or not
    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>>;

    /// Number of active sessions for a user
    async fn count_active_by_user(&self, user_id: Uuid) -> Result<i64>;

    /// Deactivate the user's oldest active session. Returns false when the
    /// user has no active sessions.
    async fn deactivate_oldest_active(&self, user_id: Uuid) -> Result<bool>;

    /// Swap in a fresh token pair, guarded by the old refresh token still
    /// being attached to an active session. Returns false when the token was
    /// already rotated or the session deactivated.
    #[allow(clippy::too_many_arguments)]
    async fn rotate_tokens(
        &self,
        old_refresh_token: &str,
        new_access_token: &str,
        new_refresh_token: &str,
        expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
        used_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Deactivate the active session holding the given access token.
    /// Returns false when no active session matched.
    async fn deactivate_by_access_token(&self, access_token: &str) -> Result<bool>;

    /// Deactivate every active session of a user, returning how many
    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Active sessions of a user, newest first
    async fn list_active_by_user(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Stamp `last_used_at` on a session
    async fn touch_last_used(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<()>;

    /// Delete sessions whose refresh window has closed (periodic sweep)
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_session_sqlite(self.pool.as_sqlite().unwrap(), session).await
            }
            DatabaseDriver::Mysql => {
                create_session_mysql(self.pool.as_mysql().unwrap(), session).await
            }
        }
    }

    async fn find_active_by_access_token(&self, access_token: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_active_by_access_sqlite(self.pool.as_sqlite().unwrap(), access_token).await
            }
            DatabaseDriver::Mysql => {
                find_active_by_access_mysql(self.pool.as_mysql().unwrap(), access_token).await
            }
        }
    }

    async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_by_refresh_sqlite(self.pool.as_sqlite().unwrap(), refresh_token).await
            }
            DatabaseDriver::Mysql => {
                find_by_refresh_mysql(self.pool.as_mysql().unwrap(), refresh_token).await
            }
        }
    }

    async fn count_active_by_user(&self, user_id: Uuid) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                count_active_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                count_active_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn deactivate_oldest_active(&self, user_id: Uuid) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                deactivate_oldest_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                deactivate_oldest_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn rotate_tokens(
        &self,
        old_refresh_token: &str,
        new_access_token: &str,
        new_refresh_token: &str,
        expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                rotate_tokens_sqlite(
                    self.pool.as_sqlite().unwrap(),
                    old_refresh_token,
                    new_access_token,
                    new_refresh_token,
                    expires_at,
                    refresh_expires_at,
                    used_at,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                rotate_tokens_mysql(
                    self.pool.as_mysql().unwrap(),
                    old_refresh_token,
                    new_access_token,
                    new_refresh_token,
                    expires_at,
                    refresh_expires_at,
                    used_at,
                )
                .await
            }
        }
    }

    async fn deactivate_by_access_token(&self, access_token: &str) -> Result<bool> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                deactivate_by_access_sqlite(self.pool.as_sqlite().unwrap(), access_token).await
            }
            DatabaseDriver::Mysql => {
                deactivate_by_access_mysql(self.pool.as_mysql().unwrap(), access_token).await
            }
        }
    }

    async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                deactivate_all_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                deactivate_all_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn list_active_by_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_active_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                list_active_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn touch_last_used(&self, id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                touch_last_used_sqlite(self.pool.as_sqlite().unwrap(), id, used_at).await
            }
            DatabaseDriver::Mysql => {
                touch_last_used_mysql(self.pool.as_mysql().unwrap(), id, used_at).await
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

const INSERT_SESSION: &str = r#"
    INSERT INTO user_sessions
        (id, user_id, access_token, refresh_token, expires_at, refresh_expires_at,
         client_ip, user_agent, active, created_at, last_used_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_SESSION: &str = r#"
    SELECT id, user_id, access_token, refresh_token, expires_at, refresh_expires_at,
           client_ip, user_agent, active, created_at, last_used_at
    FROM user_sessions
"#;

const COUNT_ACTIVE: &str = r#"
    SELECT COUNT(*) FROM user_sessions WHERE user_id = ? AND active = 1
"#;

// MySQL rejects updating a table that the same statement selects from, so
// the oldest-session subquery goes through a derived table.
const DEACTIVATE_OLDEST_SQLITE: &str = r#"
    UPDATE user_sessions SET active = 0
    WHERE id = (
        SELECT id FROM user_sessions
        WHERE user_id = ? AND active = 1
        ORDER BY created_at ASC
        LIMIT 1
    )
"#;

const DEACTIVATE_OLDEST_MYSQL: &str = r#"
    UPDATE user_sessions SET active = 0
    WHERE id = (
        SELECT id FROM (
            SELECT id FROM user_sessions
            WHERE user_id = ? AND active = 1
            ORDER BY created_at ASC
            LIMIT 1
        ) AS oldest
    )
"#;

// Rotation is guarded by the old refresh token; a second refresh with the
// same token matches nothing.
const ROTATE_TOKENS: &str = r#"
    UPDATE user_sessions
    SET access_token = ?, refresh_token = ?, expires_at = ?, refresh_expires_at = ?,
        last_used_at = ?
    WHERE refresh_token = ? AND active = 1
"#;

const DEACTIVATE_BY_ACCESS: &str = r#"
    UPDATE user_sessions SET active = 0 WHERE access_token = ? AND active = 1
"#;

const DEACTIVATE_ALL: &str = r#"
    UPDATE user_sessions SET active = 0 WHERE user_id = ? AND active = 1
"#;

const TOUCH_LAST_USED: &str = "UPDATE user_sessions SET last_used_at = ? WHERE id = ?";

const DELETE_EXPIRED: &str = "DELETE FROM user_sessions WHERE refresh_expires_at < ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(pool: &SqlitePool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SESSION)
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .bind(session.active)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn find_active_by_access_sqlite(
    pool: &SqlitePool,
    access_token: &str,
) -> Result<Option<Session>> {
    let row = sqlx::query(&format!(
        "{} WHERE access_token = ? AND active = 1",
        SELECT_SESSION
    ))
    .bind(access_token)
    .fetch_optional(pool)
    .await
    .context("Failed to look up session by access token")?;

    row.as_ref().map(row_to_session_sqlite).transpose()
}

async fn find_by_refresh_sqlite(
    pool: &SqlitePool,
    refresh_token: &str,
) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("{} WHERE refresh_token = ?", SELECT_SESSION))
        .bind(refresh_token)
        .fetch_optional(pool)
        .await
        .context("Failed to look up session by refresh token")?;

    row.as_ref().map(row_to_session_sqlite).transpose()
}

async fn count_active_sqlite(pool: &SqlitePool, user_id: Uuid) -> Result<i64> {
    let row = sqlx::query(COUNT_ACTIVE)
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await
        .context("Failed to count active sessions")?;

    Ok(row.get::<i64, _>(0))
}

async fn deactivate_oldest_sqlite(pool: &SqlitePool, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query(DEACTIVATE_OLDEST_SQLITE)
        .bind(user_id.to_string())
        .execute(pool)
        .await
        .context("Failed to evict oldest session")?;

    Ok(result.rows_affected() == 1)
}

async fn rotate_tokens_sqlite(
    pool: &SqlitePool,
    old_refresh_token: &str,
    new_access_token: &str,
    new_refresh_token: &str,
    expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    used_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(ROTATE_TOKENS)
        .bind(new_access_token)
        .bind(new_refresh_token)
        .bind(expires_at)
        .bind(refresh_expires_at)
        .bind(used_at)
        .bind(old_refresh_token)
        .execute(pool)
        .await
        .context("Failed to rotate session tokens")?;

    Ok(result.rows_affected() == 1)
}

async fn deactivate_by_access_sqlite(pool: &SqlitePool, access_token: &str) -> Result<bool> {
    let result = sqlx::query(DEACTIVATE_BY_ACCESS)
        .bind(access_token)
        .execute(pool)
        .await
        .context("Failed to deactivate session")?;

    Ok(result.rows_affected() == 1)
}

async fn deactivate_all_sqlite(pool: &SqlitePool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query(DEACTIVATE_ALL)
        .bind(user_id.to_string())
        .execute(pool)
        .await
        .context("Failed to deactivate user sessions")?;

    Ok(result.rows_affected())
}

async fn list_active_sqlite(pool: &SqlitePool, user_id: Uuid) -> Result<Vec<Session>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? AND active = 1 ORDER BY created_at DESC",
        SELECT_SESSION
    ))
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
    .context("Failed to list active sessions")?;

    rows.iter().map(row_to_session_sqlite).collect()
}

async fn touch_last_used_sqlite(
    pool: &SqlitePool,
    id: Uuid,
    used_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(TOUCH_LAST_USED)
        .bind(used_at)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to stamp session usage")?;

    Ok(())
}

async fn delete_expired_sqlite(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_EXPIRED)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");

    Ok(Session {
        id: Uuid::parse_str(&id).context("Invalid session id in database")?,
        user_id: Uuid::parse_str(&user_id).context("Invalid user id in database")?,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        refresh_expires_at: row.get("refresh_expires_at"),
        client_ip: row.get("client_ip"),
        user_agent: row.get("user_agent"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(pool: &MySqlPool, session: &Session) -> Result<Session> {
    sqlx::query(INSERT_SESSION)
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .bind(session.active)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .execute(pool)
        .await
        .context("Failed to create session")?;

    Ok(session.clone())
}

async fn find_active_by_access_mysql(
    pool: &MySqlPool,
    access_token: &str,
) -> Result<Option<Session>> {
    let row = sqlx::query(&format!(
        "{} WHERE access_token = ? AND active = 1",
        SELECT_SESSION
    ))
    .bind(access_token)
    .fetch_optional(pool)
    .await
    .context("Failed to look up session by access token")?;

    row.as_ref().map(row_to_session_mysql).transpose()
}

async fn find_by_refresh_mysql(pool: &MySqlPool, refresh_token: &str) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("{} WHERE refresh_token = ?", SELECT_SESSION))
        .bind(refresh_token)
        .fetch_optional(pool)
        .await
        .context("Failed to look up session by refresh token")?;

    row.as_ref().map(row_to_session_mysql).transpose()
}

async fn count_active_mysql(pool: &MySqlPool, user_id: Uuid) -> Result<i64> {
    let row = sqlx::query(COUNT_ACTIVE)
        .bind(user_id.to_string())
        .fetch_one(pool)
        .await
        .context("Failed to count active sessions")?;

    Ok(row.get::<i64, _>(0))
}

async fn deactivate_oldest_mysql(pool: &MySqlPool, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query(DEACTIVATE_OLDEST_MYSQL)
        .bind(user_id.to_string())
        .execute(pool)
        .await
        .context("Failed to evict oldest session")?;

    Ok(result.rows_affected() == 1)
}

async fn rotate_tokens_mysql(
    pool: &MySqlPool,
    old_refresh_token: &str,
    new_access_token: &str,
    new_refresh_token: &str,
    expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    used_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(ROTATE_TOKENS)
        .bind(new_access_token)
        .bind(new_refresh_token)
        .bind(expires_at)
        .bind(refresh_expires_at)
        .bind(used_at)
        .bind(old_refresh_token)
        .execute(pool)
        .await
        .context("Failed to rotate session tokens")?;

    Ok(result.rows_affected() == 1)
}

async fn deactivate_by_access_mysql(pool: &MySqlPool, access_token: &str) -> Result<bool> {
    let result = sqlx::query(DEACTIVATE_BY_ACCESS)
        .bind(access_token)
        .execute(pool)
        .await
        .context("Failed to deactivate session")?;

    Ok(result.rows_affected() == 1)
}

async fn deactivate_all_mysql(pool: &MySqlPool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query(DEACTIVATE_ALL)
        .bind(user_id.to_string())
        .execute(pool)
        .await
        .context("Failed to deactivate user sessions")?;

    Ok(result.rows_affected())
}

async fn list_active_mysql(pool: &MySqlPool, user_id: Uuid) -> Result<Vec<Session>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? AND active = 1 ORDER BY created_at DESC",
        SELECT_SESSION
    ))
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await
    .context("Failed to list active sessions")?;

    rows.iter().map(row_to_session_mysql).collect()
}

async fn touch_last_used_mysql(pool: &MySqlPool, id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(TOUCH_LAST_USED)
        .bind(used_at)
        .bind(id.to_string())
        .execute(pool)
        .await
        .context("Failed to stamp session usage")?;

    Ok(())
}

async fn delete_expired_mysql(pool: &MySqlPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(DELETE_EXPIRED)
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete expired sessions")?;

    Ok(result.rows_affected())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let last_used_at: Option<DateTime<Utc>> = row.get("last_used_at");

    Ok(Session {
        id: Uuid::parse_str(&id).context("Invalid session id in database")?,
        user_id: Uuid::parse_str(&user_id).context("Invalid user id in database")?,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        refresh_expires_at: row.get("refresh_expires_at"),
        client_ip: row.get("client_ip"),
        user_agent: row.get("user_agent"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        last_used_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use chrono::Duration;

    async fn setup() -> (SqlxSessionRepository, Uuid) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let user = User::placeholder("+14155552671".to_string(), Utc::now());
        users.create(&user).await.expect("Failed to create user");

        (SqlxSessionRepository::new(pool), user.id)
    }

    fn test_session(user_id: Uuid, suffix: &str, created_at: DateTime<Utc>) -> Session {
        let mut s = Session::new(
            user_id,
            format!("access-{}", suffix),
            format!("refresh-{}", suffix),
            "203.0.113.9".to_string(),
            "test-agent".to_string(),
            created_at,
            1,
            7,
        );
        s.created_at = created_at;
        s
    }

    #[tokio::test]
    async fn test_create_and_find_by_tokens() {
        let (repo, user_id) = setup().await;
        let session = test_session(user_id, "a", Utc::now());
        repo.create(&session).await.expect("Failed to create");

        let by_access = repo
            .find_active_by_access_token("access-a")
            .await
            .unwrap()
            .expect("Session not found");
        assert_eq!(by_access.id, session.id);

        let by_refresh = repo
            .find_by_refresh_token("refresh-a")
            .await
            .unwrap()
            .expect("Session not found");
        assert_eq!(by_refresh.id, session.id);
        assert!(by_refresh.active);
    }

    #[tokio::test]
    async fn test_deactivated_session_invisible_to_access_lookup() {
        let (repo, user_id) = setup().await;
        let session = test_session(user_id, "a", Utc::now());
        repo.create(&session).await.unwrap();

        assert!(repo.deactivate_by_access_token("access-a").await.unwrap());
        assert!(repo
            .find_active_by_access_token("access-a")
            .await
            .unwrap()
            .is_none());

        // Refresh lookup still sees it, with active = false
        let by_refresh = repo
            .find_by_refresh_token("refresh-a")
            .await
            .unwrap()
            .unwrap();
        assert!(!by_refresh.active);

        // Second deactivation misses the guard
        assert!(!repo.deactivate_by_access_token("access-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_deactivate_oldest_active() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&test_session(user_id, "old", now - Duration::minutes(10)))
            .await
            .unwrap();
        repo.create(&test_session(user_id, "new", now)).await.unwrap();

        assert_eq!(repo.count_active_by_user(user_id).await.unwrap(), 2);
        assert!(repo.deactivate_oldest_active(user_id).await.unwrap());
        assert_eq!(repo.count_active_by_user(user_id).await.unwrap(), 1);

        let remaining = repo.list_active_by_user(user_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].access_token, "access-new");
    }

    #[tokio::test]
    async fn test_rotate_tokens_single_use() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&test_session(user_id, "a", now)).await.unwrap();

        let rotated = repo
            .rotate_tokens(
                "refresh-a",
                "access-b",
                "refresh-b",
                now + Duration::hours(1),
                now + Duration::days(7),
                now,
            )
            .await
            .unwrap();
        assert!(rotated);

        // The old refresh token no longer matches anything
        let replay = repo
            .rotate_tokens(
                "refresh-a",
                "access-c",
                "refresh-c",
                now + Duration::hours(1),
                now + Duration::days(7),
                now,
            )
            .await
            .unwrap();
        assert!(!replay);

        let session = repo
            .find_by_refresh_token("refresh-b")
            .await
            .unwrap()
            .expect("Rotated session not found");
        assert_eq!(session.access_token, "access-b");
        assert!(session.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_deactivate_all_for_user() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&test_session(user_id, "a", now - Duration::minutes(1)))
            .await
            .unwrap();
        repo.create(&test_session(user_id, "b", now)).await.unwrap();

        let count = repo.deactivate_all_for_user(user_id).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(repo.count_active_by_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_active_newest_first() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        repo.create(&test_session(user_id, "old", now - Duration::minutes(5)))
            .await
            .unwrap();
        repo.create(&test_session(user_id, "new", now)).await.unwrap();

        let sessions = repo.list_active_by_user(user_id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].access_token, "access-new");
        assert_eq!(sessions[1].access_token, "access-old");
    }

    #[tokio::test]
    async fn test_delete_expired_uses_refresh_horizon() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();

        // Access window closed but refresh window open: must survive the sweep
        let mut refreshable = test_session(user_id, "a", now - Duration::hours(2));
        refreshable.expires_at = now - Duration::hours(1);

        let mut dead = test_session(user_id, "b", now - Duration::days(8));
        dead.expires_at = now - Duration::days(8) + Duration::hours(1);
        dead.refresh_expires_at = now - Duration::days(1);

        repo.create(&refreshable).await.unwrap();
        repo.create(&dead).await.unwrap();

        let deleted = repo.delete_expired(now).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(repo
            .find_by_refresh_token("refresh-a")
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .find_by_refresh_token("refresh-b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_touch_last_used() {
        let (repo, user_id) = setup().await;
        let now = Utc::now();
        let session = test_session(user_id, "a", now);
        repo.create(&session).await.unwrap();

        repo.touch_last_used(session.id, now).await.unwrap();

        let found = repo
            .find_by_refresh_token("refresh-a")
            .await
            .unwrap()
            .unwrap();
        assert!(found.last_used_at.is_some());
    }
}
