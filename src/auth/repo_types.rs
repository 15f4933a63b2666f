use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the auth database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String, // Argon2 PHC string
    pub name: Option<String>,
    pub is_email_verified: bool,
    pub email_verified_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl Session {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }
}

/// Which single-use token table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    EmailVerification,
    PasswordReset,
}

impl TokenKind {
    pub fn table(self) -> &'static str {
        match self {
            TokenKind::EmailVerification => "email_verifications",
            TokenKind::PasswordReset => "password_resets",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Used,
    Expired,
}

/// Row of `email_verifications` or `password_resets`.
#[derive(Debug, Clone, FromRow)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl OneTimeToken {
    /// A used token stays used no matter what its expiry says.
    pub fn status(&self, now: OffsetDateTime) -> TokenStatus {
        if self.used_at.is_some() {
            TokenStatus::Used
        } else if self.expires_at < now {
            TokenStatus::Expired
        } else {
            TokenStatus::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn token(expires_in: Duration, used: bool) -> OneTimeToken {
        let now = OffsetDateTime::now_utc();
        OneTimeToken {
            id: Uuid::new_v4(),
            token: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4(),
            expires_at: now + expires_in,
            used_at: used.then_some(now),
            created_at: now,
        }
    }

    #[test]
    fn used_wins_over_expiry() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(token(Duration::hours(1), false).status(now), TokenStatus::Valid);
        assert_eq!(token(Duration::hours(-1), false).status(now), TokenStatus::Expired);
        assert_eq!(token(Duration::hours(1), true).status(now), TokenStatus::Used);
        assert_eq!(token(Duration::hours(-1), true).status(now), TokenStatus::Used);
    }
}
