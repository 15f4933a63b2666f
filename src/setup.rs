//! Idempotent schema bootstrap for the auth and news tables.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::{
    db::DataClient,
    envelope::{ok_message, ApiResponse},
    error::AppResult,
    state::AppState,
};

pub const SCHEMA: &[&str] = &[
    r#"CREATE EXTENSION IF NOT EXISTS "pgcrypto""#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        email             TEXT NOT NULL UNIQUE,
        password_hash     TEXT NOT NULL,
        name              TEXT,
        is_email_verified BOOLEAN NOT NULL DEFAULT false,
        email_verified_at TIMESTAMPTZ,
        is_active         BOOLEAN NOT NULL DEFAULT true,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_login_at     TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        token      TEXT NOT NULL UNIQUE,
        user_id    UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_verifications (
        id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        token      TEXT NOT NULL UNIQUE,
        user_id    UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at    TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS password_resets (
        id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        token      TEXT NOT NULL UNIQUE,
        user_id    UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at    TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scraped_news (
        id             TEXT PRIMARY KEY,
        url            TEXT NOT NULL UNIQUE,
        title          TEXT NOT NULL,
        description    TEXT NOT NULL,
        source         TEXT NOT NULL,
        category       TEXT NOT NULL,
        image_url      TEXT,
        published_at   TEXT NOT NULL,
        read_time      TEXT,
        scraped_data   JSONB,
        summary        TEXT,
        insights       JSONB,
        related_videos JSONB,
        stored_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_email_verifications_user_id ON email_verifications(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_password_resets_user_id ON password_resets(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_scraped_news_stored_at ON scraped_news(stored_at DESC)",
];

/// Errors from concurrent bootstraps racing on the same object.
pub fn is_already_exists(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}

/// Runs every statement; "already exists" failures are skipped. Returns
/// the number of statements that failed for any other reason.
pub async fn run_schema(db: &DataClient, statements: &[&str]) -> usize {
    let mut failed = 0;
    for stmt in statements {
        let res = db
            .with_connection(|pool| async move { sqlx::query(stmt).execute(&pool).await })
            .await;
        match res {
            Ok(_) => {}
            Err(e) if is_already_exists(&e.to_string()) => {
                info!("schema object already exists; skipping");
            }
            Err(e) => {
                error!(error = %e, "schema statement failed");
                failed += 1;
            }
        }
    }
    failed
}

/// Applies the schema to the auth store and, when it is separate, the news
/// store.
pub async fn bootstrap(state: &AppState) -> anyhow::Result<()> {
    let mut failed = run_schema(&state.auth_db, SCHEMA).await;
    if state.config.db.news_url != state.config.db.auth_url {
        failed += run_schema(&state.news_db, SCHEMA).await;
    }
    if failed > 0 {
        anyhow::bail!("{} schema statements failed", failed);
    }
    info!("database schema ready");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SetupStatus {
    pub success: bool,
    pub setup: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/setup-database", post(setup_database).get(check_setup))
}

#[instrument(skip(state))]
pub async fn setup_database(State(state): State<AppState>) -> AppResult<Json<ApiResponse<()>>> {
    bootstrap(&state).await?;
    Ok(ok_message("Database setup completed"))
}

#[instrument(skip(state))]
pub async fn check_setup(State(state): State<AppState>) -> Json<SetupStatus> {
    let res = state
        .auth_db
        .with_connection(|pool| async move {
            sqlx::query("SELECT 1 FROM users LIMIT 1")
                .execute(&pool)
                .await
        })
        .await;
    if let Err(e) = &res {
        info!(error = %e, "users table not reachable");
    }
    Json(SetupStatus {
        success: true,
        setup: res.is_ok(),
    })
}
