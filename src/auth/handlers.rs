use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, PublicUser, ResetPasswordRequest,
            SessionResponse, SignupRequest, SignupResponse, TokenQuery,
        },
        extractors::{bearer_token, SessionUser},
        services::SignupInput,
    },
    envelope::{ok, ok_message, ApiResponse},
    error::{AppError, AppResult},
    state::AppState,
};

pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists with this email, you will receive a password reset link";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login).get(current_session))
        .route("/auth/verify", get(current_session))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-email", get(verify_email))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<Json<ApiResponse<SignupResponse>>> {
    let user = state
        .auth
        .signup(SignupInput {
            email: payload.email,
            password: payload.password,
            name: payload.name,
        })
        .await?;
    Ok(ok(SignupResponse {
        user: user.into(),
        message: "Please check your email to verify your account".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let out = state.auth.login(&payload.email, &payload.password).await?;
    Ok(ok(LoginResponse {
        user: out.user.into(),
        token: out.session.token,
        expires_at: out.session.expires_at,
    }))
}

#[instrument(skip_all)]
pub async fn current_session(SessionUser(user): SessionUser) -> Json<ApiResponse<SessionResponse>> {
    ok(SessionResponse { user: user.into() })
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<ApiResponse<()>>> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("No token provided".into()))?;
    state.auth.logout(&token).await?;
    Ok(ok_message("Logged out"))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.request_password_reset(&payload.email).await?;
    Ok(ok_message(RESET_REQUESTED_MESSAGE))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .auth
        .reset_password(&payload.token, &payload.password)
        .await?;
    Ok(ok_message("Password reset successfully"))
}

#[instrument(skip(state, query))]
pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .auth
        .verify_email(query.token.as_deref().unwrap_or_default())
        .await?;
    Ok(ok_message("Email verified successfully"))
}

#[instrument(skip_all)]
pub async fn get_me(SessionUser(user): SessionUser) -> Json<ApiResponse<PublicUser>> {
    ok(user.into())
}
