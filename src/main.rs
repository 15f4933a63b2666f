mod app;
mod auth;
mod config;
mod db;
mod envelope;
mod error;
mod mail;
mod news;
mod pipeline;
mod setup;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "newsdesk=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    if app_state.config.auto_setup_db {
        if let Err(e) = setup::bootstrap(&app_state).await {
            tracing::warn!(error = %e, "schema bootstrap failed; continuing");
        }
    }

    let app = app::build_app(app_state);
    app::serve(app).await
}
