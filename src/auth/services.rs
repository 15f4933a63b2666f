use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::password::{hash_password, is_long_enough, verify_password};
use crate::auth::repo::AuthRepo;
use crate::auth::repo_types::{NewUser, OneTimeToken, Session, TokenKind, TokenStatus, User};
use crate::config::AuthConfig;
use crate::db::DbError;
use crate::error::AppError;
use crate::mail::{password_reset_email, verification_email, Mailer};

pub const VERIFICATION_TTL: Duration = Duration::hours(24);
pub const RESET_TTL: Duration = Duration::hours(1);

pub const MSG_CREDENTIALS_REQUIRED: &str = "Email and password are required";
pub const MSG_PASSWORD_SHORT: &str = "Password must be at least 8 characters";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `ada@example.com` -> `a***@example.com`, for log lines.
pub(crate) fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".into(),
    }
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    AlreadyExists,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Please verify your email before logging in")]
    EmailNotVerified,
    #[error("No token provided")]
    MissingToken,
    #[error("Invalid or expired session")]
    InvalidSession,
    #[error("Invalid or expired token")]
    TokenInvalid,
    #[error("Token already used")]
    TokenUsed,
    #[error("Token has expired")]
    TokenExpired,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(m) => AppError::Validation(m),
            AuthError::AlreadyExists => AppError::Conflict(e.to_string()),
            AuthError::InvalidCredentials | AuthError::MissingToken | AuthError::InvalidSession => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::AccountDisabled | AuthError::EmailNotVerified => {
                AppError::Forbidden(e.to_string())
            }
            AuthError::TokenInvalid | AuthError::TokenUsed | AuthError::TokenExpired => {
                AppError::Validation(e.to_string())
            }
            AuthError::Db(db) => AppError::from(db),
            AuthError::Internal(m) => AppError::Internal(m),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
}

/// Account flows over an [`AuthRepo`]. Cheap to clone.
#[derive(Clone)]
pub struct AuthService {
    repo: Arc<dyn AuthRepo>,
    mailer: Arc<dyn Mailer>,
    cfg: AuthConfig,
}

impl AuthService {
    pub fn new(repo: Arc<dyn AuthRepo>, mailer: Arc<dyn Mailer>, cfg: AuthConfig) -> Self {
        Self { repo, mailer, cfg }
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}/{}?token={}", self.cfg.app_base_url.trim_end_matches('/'), path, token)
    }

    pub async fn signup(&self, input: SignupInput) -> Result<User, AuthError> {
        let email = normalize_email(&input.email);
        if email.is_empty() || input.password.is_empty() {
            return Err(AuthError::Validation(MSG_CREDENTIALS_REQUIRED.into()));
        }
        if !is_valid_email(&email) {
            warn!(email = %mask_email(&email), "invalid email");
            return Err(AuthError::Validation("Invalid email".into()));
        }
        if !is_long_enough(&input.password) {
            warn!("password too short");
            return Err(AuthError::Validation(MSG_PASSWORD_SHORT.into()));
        }

        if self.repo.find_user_by_email(&email).await?.is_some() {
            warn!(email = %mask_email(&email), "email already registered");
            return Err(AuthError::AlreadyExists);
        }

        let password_hash =
            hash_password(&input.password).map_err(|e| AuthError::Internal(e.to_string()))?;
        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        let token = new_token();
        let (user, verification) = self
            .repo
            .create_user_with_verification(
                &NewUser {
                    email: email.clone(),
                    password_hash,
                    name,
                },
                &token,
                OffsetDateTime::now_utc() + VERIFICATION_TTL,
            )
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AuthError::AlreadyExists
                } else {
                    AuthError::Db(e)
                }
            })?;
        debug!(verification_id = %verification.id, "verification token issued");

        let display_name = user.name.clone().unwrap_or_else(|| email.clone());
        let mail = verification_email(&email, &display_name, &self.link("verify-email", &token));
        if let Err(e) = self.mailer.send(mail).await {
            warn!(error = %e, user_id = %user.id, "verification email failed; continuing");
        }

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(MSG_CREDENTIALS_REQUIRED.into()));
        }

        let Some(user) = self.repo.find_user_by_email(&email).await? else {
            warn!(email = %mask_email(&email), "login unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = verify_password(password, &user.password_hash)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login on disabled account");
            return Err(AuthError::AccountDisabled);
        }
        if !user.is_email_verified {
            if self.cfg.require_email_verification {
                warn!(user_id = %user.id, "login blocked: email not verified");
                return Err(AuthError::EmailNotVerified);
            }
            warn!(user_id = %user.id, "login with unverified email");
        }

        self.repo.touch_last_login(user.id).await?;
        let session = self
            .repo
            .create_session(
                user.id,
                &new_token(),
                OffsetDateTime::now_utc() + Duration::days(self.cfg.session_ttl_days),
            )
            .await?;

        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome { user, session })
    }

    /// Resolves a bearer token to its user. Expired sessions are deleted on
    /// sight.
    pub async fn verify_session(&self, token: &str) -> Result<User, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let Some(session) = self.repo.find_session(token).await? else {
            return Err(AuthError::InvalidSession);
        };
        if session.is_expired(OffsetDateTime::now_utc()) {
            debug!(session_id = %session.id, "session expired; deleting");
            self.repo.delete_session(token).await?;
            return Err(AuthError::InvalidSession);
        }
        match self.repo.find_user_by_id(session.user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::InvalidSession),
        }
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let deleted = self.repo.delete_session(token.trim()).await?;
        debug!(deleted, "logout");
        Ok(())
    }

    /// Never reveals whether the account exists.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::Validation("Email is required".into()));
        }
        let Some(user) = self.repo.find_user_by_email(&email).await? else {
            debug!("password reset for unknown email");
            return Ok(());
        };

        let revoked = self
            .repo
            .invalidate_tokens(TokenKind::PasswordReset, user.id)
            .await?;
        let token = new_token();
        self.repo
            .create_token(
                TokenKind::PasswordReset,
                user.id,
                &token,
                OffsetDateTime::now_utc() + RESET_TTL,
            )
            .await?;

        let display_name = user.name.clone().unwrap_or_else(|| email.clone());
        let mail = password_reset_email(&email, &display_name, &self.link("reset-password", &token));
        if let Err(e) = self.mailer.send(mail).await {
            warn!(error = %e, user_id = %user.id, "reset email failed; continuing");
        }
        info!(user_id = %user.id, revoked, "password reset requested");
        Ok(())
    }

    async fn usable_token(&self, kind: TokenKind, token: &str) -> Result<OneTimeToken, AuthError> {
        let record = self
            .repo
            .find_token(kind, token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        match record.status(OffsetDateTime::now_utc()) {
            TokenStatus::Valid => Ok(record),
            TokenStatus::Used => Err(AuthError::TokenUsed),
            TokenStatus::Expired => Err(AuthError::TokenExpired),
        }
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() || password.is_empty() {
            return Err(AuthError::Validation("Token and password are required".into()));
        }
        if !is_long_enough(password) {
            return Err(AuthError::Validation(MSG_PASSWORD_SHORT.into()));
        }

        let record = self.usable_token(TokenKind::PasswordReset, token).await?;
        let hash = hash_password(password).map_err(|e| AuthError::Internal(e.to_string()))?;
        if !self
            .repo
            .consume_password_reset(record.id, record.user_id, &hash)
            .await?
        {
            return Err(AuthError::TokenUsed);
        }
        info!(user_id = %record.user_id, "password reset; sessions revoked");
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Validation("Token is required".into()));
        }
        let record = self.usable_token(TokenKind::EmailVerification, token).await?;
        if !self
            .repo
            .consume_email_verification(record.id, record.user_id)
            .await?
        {
            return Err(AuthError::TokenUsed);
        }
        info!(user_id = %record.user_id, "email verified");
        Ok(())
    }
}
