use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use sizer_core::domain::user::{UserId, UserProfile};

use super::{column, format_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_profile(row: &SqliteRow) -> Result<UserProfile, RepositoryError> {
    let user_id: i64 = column(row, "user_id")?;
    Ok(UserProfile {
        user_id: UserId(user_id),
        display_name: column(row, "display_name")?,
        username: column(row, "username")?,
        language_code: column(row, "language_code")?,
        is_admin: column(row, "is_admin")?,
        is_banned: column(row, "is_banned")?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO users (user_id, display_name, username, language_code, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 username = excluded.username,
                 language_code = excluded.language_code,
                 updated_at = excluded.updated_at",
        )
        .bind(profile.user_id.0)
        .bind(&profile.display_name)
        .bind(&profile.username)
        .bind(&profile.language_code)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, user_id: UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, username, language_code, is_admin, is_banned
             FROM users WHERE user_id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn is_banned(&self, user_id: UserId) -> Result<bool, RepositoryError> {
        let banned: Option<bool> =
            sqlx::query_scalar("SELECT is_banned FROM users WHERE user_id = ?")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(banned.unwrap_or(false))
    }

    async fn ban(&self, user_id: UserId, reason: &str) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        // Users who never sent /start still get a row so the ban sticks.
        sqlx::query(
            "INSERT INTO users (user_id, is_banned, banned_reason, banned_at, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_banned = 1,
                 banned_reason = excluded.banned_reason,
                 banned_at = excluded.banned_at,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(reason)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<(), RepositoryError> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "INSERT INTO users (user_id, is_admin, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 is_admin = excluded.is_admin,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.0)
        .bind(is_admin)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM users WHERE is_admin = 1 AND is_banned = 0 ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(UserId).collect())
    }
}
