//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User entity owning authenticated sessions.
///
/// Users are keyed by phone number; a minimal placeholder profile is created
/// on first successful OTP verification and can be filled in later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: Uuid,
    /// Display name (placeholder "User" until updated)
    pub name: String,
    /// Phone number (unique, E.164)
    pub phone: String,
    /// Email address (optional, unique when present)
    pub email: Option<String>,
    /// User role
    pub role: Role,
    /// Last successful login timestamp
    pub last_login_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a minimal placeholder user for a freshly verified phone number
    pub fn placeholder(phone: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "User".to_string(),
            phone,
            email: None,
            role: Role::User,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the user is an administrator
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Check if the user has an email on file
    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

/// User role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user (default)
    #[default]
    User,
    /// Administrator
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}
