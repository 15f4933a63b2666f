use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, OneTimeToken, Session, TokenKind, User};
use crate::db::{DataClient, DbError};

/// Persistence used by the auth flows. Every call is an independent unit of
/// work; the multi-step consumes run in a single transaction.
#[async_trait]
pub trait AuthRepo: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError>;
    /// Inserts the user and their first email verification together, so a
    /// failed signup leaves neither row behind.
    async fn create_user_with_verification(
        &self,
        new: &NewUser,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(User, OneTimeToken), DbError>;
    async fn touch_last_login(&self, user_id: Uuid) -> Result<(), DbError>;

    async fn create_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<Session, DbError>;
    async fn find_session(&self, token: &str) -> Result<Option<Session>, DbError>;
    async fn delete_session(&self, token: &str) -> Result<bool, DbError>;

    async fn create_token(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<OneTimeToken, DbError>;
    async fn find_token(&self, kind: TokenKind, token: &str) -> Result<Option<OneTimeToken>, DbError>;
    /// Marks every unused token of `kind` for the user as used.
    async fn invalidate_tokens(&self, kind: TokenKind, user_id: Uuid) -> Result<u64, DbError>;

    /// Marks the verification used and the user verified. `false` when the
    /// token was consumed concurrently.
    async fn consume_email_verification(&self, token_id: Uuid, user_id: Uuid) -> Result<bool, DbError>;
    /// Marks the reset used, stores the new hash and drops every session of
    /// the user. `false` when the token was consumed concurrently.
    async fn consume_password_reset(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, DbError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, name, is_email_verified, email_verified_at, \
                            is_active, created_at, last_login_at";

#[derive(Clone)]
pub struct PgAuthRepo {
    db: DataClient,
}

impl PgAuthRepo {
    pub fn new(db: DataClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthRepo for PgAuthRepo {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, User>(sql)
                    .bind(email)
                    .fetch_optional(&pool)
                    .await
            })
            .await
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, User>(sql)
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            })
            .await
    }

    async fn create_user_with_verification(
        &self,
        new: &NewUser,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(User, OneTimeToken), DbError> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, name, is_email_verified, is_active) \
             VALUES ($1, $2, $3, false, true) \
             RETURNING {USER_COLUMNS}"
        );
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                let mut tx = pool.begin().await?;
                let user = sqlx::query_as::<_, User>(sql)
                    .bind(&new.email)
                    .bind(&new.password_hash)
                    .bind(&new.name)
                    .fetch_one(&mut *tx)
                    .await?;
                let verification = sqlx::query_as::<_, OneTimeToken>(
                    r#"
                    INSERT INTO email_verifications (token, user_id, expires_at)
                    VALUES ($1, $2, $3)
                    RETURNING id, token, user_id, expires_at, used_at, created_at
                    "#,
                )
                .bind(token)
                .bind(user.id)
                .bind(expires_at)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<_, sqlx::Error>((user, verification))
            })
            .await
    }



    async fn touch_last_login(&self, user_id: Uuid) -> Result<(), DbError> {
        self.db
            .with_connection(|pool| async move {
                sqlx::query("UPDATE users SET last_login_at = now(), updated_at = now() WHERE id = $1")
                    .bind(user_id)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            })
            .await
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<Session, DbError> {
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, Session>(
                    r#"
                    INSERT INTO sessions (token, user_id, expires_at)
                    VALUES ($1, $2, $3)
                    RETURNING id, token, user_id, expires_at, created_at
                    "#,
                )
                .bind(token)
                .bind(user_id)
                .bind(expires_at)
                .fetch_one(&pool)
                .await
            })
            .await
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, DbError> {
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, Session>(
                    "SELECT id, token, user_id, expires_at, created_at FROM sessions WHERE token = $1",
                )
                .bind(token)
                .fetch_optional(&pool)
                .await
            })
            .await
    }

    async fn delete_session(&self, token: &str) -> Result<bool, DbError> {
        self.db
            .with_connection(|pool| async move {
                sqlx::query("DELETE FROM sessions WHERE token = $1")
                    .bind(token)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected() > 0)
            })
            .await
    }

    async fn create_token(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<OneTimeToken, DbError> {
        let sql = format!(
            "INSERT INTO {} (token, user_id, expires_at) VALUES ($1, $2, $3) \
             RETURNING id, token, user_id, expires_at, used_at, created_at",
            kind.table()
        );
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, OneTimeToken>(sql)
                    .bind(token)
                    .bind(user_id)
                    .bind(expires_at)
                    .fetch_one(&pool)
                    .await
            })
            .await
    }

    async fn find_token(&self, kind: TokenKind, token: &str) -> Result<Option<OneTimeToken>, DbError> {
        let sql = format!(
            "SELECT id, token, user_id, expires_at, used_at, created_at FROM {} WHERE token = $1",
            kind.table()
        );
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, OneTimeToken>(sql)
                    .bind(token)
                    .fetch_optional(&pool)
                    .await
            })
            .await
    }

    async fn invalidate_tokens(&self, kind: TokenKind, user_id: Uuid) -> Result<u64, DbError> {
        let sql = format!(
            "UPDATE {} SET used_at = now() WHERE user_id = $1 AND used_at IS NULL",
            kind.table()
        );
        let sql = sql.as_str();
        self.db
            .with_connection(|pool| async move {
                sqlx::query(sql)
                    .bind(user_id)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .await
    }

    async fn consume_email_verification(&self, token_id: Uuid, user_id: Uuid) -> Result<bool, DbError> {
        self.db
            .with_connection(|pool| async move {
                let mut tx = pool.begin().await?;
                let marked = sqlx::query(
                    "UPDATE email_verifications SET used_at = now() WHERE id = $1 AND used_at IS NULL",
                )
                .bind(token_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if marked == 0 {
                    tx.rollback().await?;
                    return Ok(false);
                }
                sqlx::query(
                    r#"
                    UPDATE users
                       SET is_email_verified = true, email_verified_at = now(), updated_at = now()
                     WHERE id = $1
                    "#,
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<_, sqlx::Error>(true)
            })
            .await
    }

    async fn consume_password_reset(
        &self,
        token_id: Uuid,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, DbError> {
        self.db
            .with_connection(|pool| async move {
                let mut tx = pool.begin().await?;
                let marked = sqlx::query(
                    "UPDATE password_resets SET used_at = now() WHERE id = $1 AND used_at IS NULL",
                )
                .bind(token_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if marked == 0 {
                    tx.rollback().await?;
                    return Ok(false);
                }
                sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
                    .bind(password_hash)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok::<_, sqlx::Error>(true)
            })
            .await
    }
}
