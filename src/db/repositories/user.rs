//! User repository
//!
//! Database operations for the user directory: lookup by phone or id,
//! creation of placeholder profiles, and saving profile updates.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Role, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Get user by phone number (E.164)
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>>;

    /// Persist changes to an existing user
    async fn save(&self, user: &User) -> Result<User>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_user_sqlite(self.pool.as_sqlite().unwrap(), user).await
            }
            DatabaseDriver::Mysql => create_user_mysql(self.pool.as_mysql().unwrap(), user).await,
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_user_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await
            }
            DatabaseDriver::Mysql => {
                find_user_by_id_mysql(self.pool.as_mysql().unwrap(), id).await
            }
        }
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_user_by_phone_sqlite(self.pool.as_sqlite().unwrap(), phone).await
            }
            DatabaseDriver::Mysql => {
                find_user_by_phone_mysql(self.pool.as_mysql().unwrap(), phone).await
            }
        }
    }

    async fn save(&self, user: &User) -> Result<User> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => save_user_sqlite(self.pool.as_sqlite().unwrap(), user).await,
            DatabaseDriver::Mysql => save_user_mysql(self.pool.as_mysql().unwrap(), user).await,
        }
    }
}

const INSERT_USER: &str = r#"
    INSERT INTO users (id, name, phone, email, role, last_login_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_USER: &str = r#"
    SELECT id, name, phone, email, role, last_login_at, created_at, updated_at
    FROM users
"#;

const UPDATE_USER: &str = r#"
    UPDATE users
    SET name = ?, phone = ?, email = ?, role = ?, last_login_at = ?, updated_at = ?
    WHERE id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(INSERT_USER)
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(user.clone())
}

async fn find_user_by_id_sqlite(pool: &SqlitePool, id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_USER))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn find_user_by_phone_sqlite(pool: &SqlitePool, phone: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE phone = ?", SELECT_USER))
        .bind(phone)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by phone")?;

    row.as_ref().map(row_to_user_sqlite).transpose()
}

async fn save_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    sqlx::query(UPDATE_USER)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .bind(user.id.to_string())
        .execute(pool)
        .await
        .context("Failed to save user")?;

    Ok(user.clone())
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let role: String = row.get("role");

    Ok(User {
        id: Uuid::parse_str(&id).context("Invalid user id in database")?,
        name: row.get("name"),
        phone: row.get("phone"),
        email: row.get("email"),
        role: Role::from_str(&role)?,
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    sqlx::query(INSERT_USER)
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(user.clone())
}

async fn find_user_by_id_mysql(pool: &MySqlPool, id: Uuid) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_USER))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn find_user_by_phone_mysql(pool: &MySqlPool, phone: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("{} WHERE phone = ?", SELECT_USER))
        .bind(phone)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by phone")?;

    row.as_ref().map(row_to_user_mysql).transpose()
}

async fn save_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    sqlx::query(UPDATE_USER)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .bind(user.id.to_string())
        .execute(pool)
        .await
        .context("Failed to save user")?;

    Ok(user.clone())
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let id: String = row.get("id");
    let role: String = row.get("role");
    let last_login_at: Option<DateTime<Utc>> = row.get("last_login_at");

    Ok(User {
        id: Uuid::parse_str(&id).context("Invalid user id in database")?,
        name: row.get("name"),
        phone: row.get("phone"),
        email: row.get("email"),
        role: Role::from_str(&role)?,
        last_login_at,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
