use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub auth_url: String,
    pub news_url: String,
    pub max_connections: u32,
    pub max_retries: u32,
    pub retry_step_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_days: i64,
    pub require_email_verification: bool,
    /// Base URL used for links in outgoing mail.
    pub app_base_url: String,
    pub mail_from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub api_base: String,
    pub ws_url: Option<String>,
    /// Insight node serving the weekly feed, feedback and requeue.
    pub insight_base: String,
    /// HMAC-SHA256 key for signed requests; unsigned when absent.
    pub hmac_secret: Option<String>,
    /// Sent as `Authorization: Bearer` on signed requests.
    pub api_token: Option<String>,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub job_retention_secs: u64,
    pub max_finished_jobs: usize,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("PIPELINE_POLL_INTERVAL_MS must be greater than zero");
        }
        if self.max_polls == 0 {
            anyhow::bail!("PIPELINE_MAX_POLLS must be greater than zero");
        }
        Ok(())
    }

    /// Local settings for tests: no socket, no signing, fast polling.
    #[cfg(test)]
    pub fn local(api_base: &str) -> Self {
        Self {
            api_base: api_base.into(),
            ws_url: None,
            insight_base: api_base.into(),
            hmac_secret: None,
            api_token: None,
            poll_interval_ms: 5,
            max_polls: 60,
            job_retention_secs: 3600,
            max_finished_jobs: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsBackend {
    File,
    Db,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsConfig {
    pub backend: NewsBackend,
    pub file_path: PathBuf,
    pub max_articles: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db: DbConfig,
    pub auth: AuthConfig,
    pub pipeline: PipelineConfig,
    pub news: NewsConfig,
    pub auto_setup_db: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Unset, blank and placeholder values read as `None`.
fn env_secret(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.starts_with("your_"))
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let auth_url = std::env::var("AUTH_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .context("AUTH_DATABASE_URL or DATABASE_URL must be set")?;
        let news_url = match std::env::var("NEWS_DATABASE_URL") {
            Ok(url) if !url.is_empty() => url,
            _ => {
                tracing::warn!("NEWS_DATABASE_URL is not set; news store falls back to the auth database");
                auth_url.clone()
            }
        };

        let db = DbConfig {
            auth_url,
            news_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            max_retries: env_or("DB_MAX_RETRIES", 5),
            retry_step_ms: env_or("DB_RETRY_STEP_MS", 1000),
            retry_max_delay_ms: env_or("DB_RETRY_MAX_DELAY_MS", 5000),
        };

        let auth = AuthConfig {
            session_ttl_days: env_or("SESSION_TTL_DAYS", 7),
            require_email_verification: env_flag("REQUIRE_EMAIL_VERIFICATION"),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@newsdesk.local".into()),
        };

        let api_base =
            std::env::var("PIPELINE_API_BASE").unwrap_or_else(|_| "http://localhost:8000".into());
        let pipeline = PipelineConfig {
            insight_base: std::env::var("INSIGHT_API_BASE").unwrap_or_else(|_| api_base.clone()),
            api_base,
            ws_url: match std::env::var("PIPELINE_WS_URL") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => Some("ws://localhost:3002".into()),
            },
            hmac_secret: env_secret("PIPELINE_HMAC_SECRET"),
            api_token: env_secret("PIPELINE_API_TOKEN"),
            poll_interval_ms: env_or("PIPELINE_POLL_INTERVAL_MS", 2000),
            max_polls: env_or("PIPELINE_MAX_POLLS", 60),
            job_retention_secs: env_or("ANALYSIS_RETENTION_SECS", 3600),
            max_finished_jobs: env_or("ANALYSIS_MAX_FINISHED", 200),
        };
        pipeline.validate()?;

        let backend = match std::env::var("NEWS_STORE").as_deref() {
            Ok("db") | Ok("database") => NewsBackend::Db,
            _ => NewsBackend::File,
        };
        let news = NewsConfig {
            backend,
            file_path: std::env::var("NEWS_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/scraped-news.json")),
            max_articles: env_or("NEWS_MAX_ARTICLES", 100),
        };

        Ok(Self {
            db,
            auth,
            pipeline,
            news,
            auto_setup_db: env_flag("AUTO_SETUP_DB"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut cfg = PipelineConfig::local("http://x");
        assert!(cfg.validate().is_ok());

        cfg.poll_interval_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("PIPELINE_POLL_INTERVAL_MS"));

        cfg.poll_interval_ms = 10;
        cfg.max_polls = 0;
        assert!(cfg.validate().is_err());
    }
}
