use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder};
use serde_json::{json, Value};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::pipeline::insight::{FeedbackOutcome, FeedbackRequest, InsightFeed};
use crate::pipeline::push::{subscribe_ws, PushSubscription};
use crate::pipeline::signing::RequestSigner;
use crate::pipeline::types::StatusSnapshot;

const FEED_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_AUDIO_TYPE: &str = "audio/mpeg";

/// Synthesised speech as returned by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audio {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Backend is offline. Please start the backend server first.")]
    Offline,
    #[error("pipeline request failed: {0}")]
    Request(String),
    #[error("unexpected pipeline response: {0}")]
    InvalidResponse(String),
    #[error("Analysis timed out. Please try again.")]
    Timeout,
    #[error("Analysis finished but failed to retrieve final results.")]
    FinalFetch,
    #[error("Analysis cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Request(e.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Offline | PipelineError::Timeout => AppError::Unavailable(e.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

/// The remote processing backend.
#[async_trait]
pub trait PipelineBackend: Send + Sync {
    async fn health(&self) -> bool;
    /// Creates the news item to analyse and returns its id.
    async fn create_item(&self, url: &str) -> Result<String, PipelineError>;
    async fn trigger(&self, id: &str) -> Result<(), PipelineError>;
    async fn status(&self, id: &str) -> Result<StatusSnapshot, PipelineError>;
    /// The processed item (`data` of `GET /api/news/{id}`).
    async fn fetch_item(&self, id: &str) -> Result<Value, PipelineError>;
    /// Push updates for `id`, when the backend offers them.
    async fn subscribe(&self, id: &str) -> Option<PushSubscription>;

    async fn tts(&self, text: &str, language: &str) -> Result<Audio, PipelineError>;
    /// Records reader feedback; the insight node takes over when the
    /// pipeline rejects it.
    async fn submit_feedback(&self, req: &FeedbackRequest) -> Result<FeedbackOutcome, PipelineError>;
    async fn requeue(&self, id: &str) -> Result<Value, PipelineError>;
    /// Weekly report, else the sample export, else empty.
    async fn insight_feed(&self) -> InsightFeed;
}

#[derive(Clone)]
pub struct HttpPipelineClient {
    http: Client,
    base: String,
    insight: String,
    ws_url: Option<String>,
    signer: RequestSigner,
}

impl HttpPipelineClient {
    pub fn new(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base: cfg.api_base.trim_end_matches('/').to_string(),
            insight: cfg.insight_base.trim_end_matches('/').to_string(),
            ws_url: cfg.ws_url.clone(),
            signer: RequestSigner::new(cfg.hmac_secret.clone(), cfg.api_token.clone()),
        })
    }

    /// JSON request to the insight node carrying signature headers over the
    /// exact body sent.
    fn signed(&self, method: Method, url: &str, body: Option<&Value>) -> RequestBuilder {
        let text = body.map(Value::to_string).unwrap_or_default();
        let req = self
            .http
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");
        let req = if body.is_some() { req.body(text.clone()) } else { req };
        self.signer.apply(req, method.as_str(), url, &text)
    }

    async fn signed_json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, PipelineError> {
        let url = format!("{}{}", self.insight, path);
        let resp = self.signed(method.clone(), &url, body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Request(format!("{} {} -> {}", method, path, status)));
        }
        resp.json()
            .await
            .map_err(|e| PipelineError::InvalidResponse(e.to_string()))
    }

    async fn fetch_feed(&self, path: &str) -> Result<Value, reqwest::Error> {
        let url = format!("{}{}", self.insight, path);
        self.signed(Method::GET, &url, None)
            .timeout(FEED_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, PipelineError> {
        let resp = self.http.get(self.url(path)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Request(format!("GET {} -> {}", path, status)));
        }
        Ok(resp.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, PipelineError> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Request(format!("POST {} -> {}", path, status)));
        }
        // some endpoints answer with an empty body
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

/// Reads `newsId` or `id`, string or number.
pub(crate) fn created_id(body: &Value) -> Option<String> {
    ["newsId", "id"].iter().find_map(|key| match body.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl PipelineBackend for HttpPipelineClient {
    async fn health(&self) -> bool {
        match self.get_json("/health").await {
            Ok(body) => body.get("status").and_then(Value::as_str) == Some("healthy"),
            Err(e) => {
                warn!(error = %e, "pipeline health check failed");
                false
            }
        }
    }

    async fn create_item(&self, url: &str) -> Result<String, PipelineError> {
        let body = json!({
            "title": "Analyzing News...",
            "content": "Extracted from URL",
            "sourceUrl": url,
            "source": "web",
        });
        let resp = self.post_json("/api/news", &body).await?;
        created_id(&resp).ok_or_else(|| PipelineError::InvalidResponse("missing news id".into()))
    }

    async fn trigger(&self, id: &str) -> Result<(), PipelineError> {
        self.post_json("/api/bhiv/process", &json!({ "newsItemId": id }))
            .await?;
        debug!(%id, "pipeline triggered");
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<StatusSnapshot, PipelineError> {
        let body = self.get_json(&format!("/api/processed/{}", id)).await?;
        serde_json::from_value(body).map_err(|e| PipelineError::InvalidResponse(e.to_string()))
    }

    async fn fetch_item(&self, id: &str) -> Result<Value, PipelineError> {
        let mut body = self.get_json(&format!("/api/news/{}", id)).await?;
        match body.get_mut("data").map(Value::take) {
            Some(item) if !item.is_null() => Ok(item),
            _ => Err(PipelineError::InvalidResponse("missing data".into())),
        }
    }

    async fn subscribe(&self, id: &str) -> Option<PushSubscription> {
        let url = self.ws_url.clone()?;
        Some(subscribe_ws(url, id.to_string()))
    }

    async fn tts(&self, text: &str, language: &str) -> Result<Audio, PipelineError> {
        let resp = self
            .http
            .post(self.url("/api/tts"))
            .json(&json!({ "text": text, "language": language }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Request(if detail.trim().is_empty() {
                format!("TTS failed: {}", status.as_u16())
            } else {
                detail
            }));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_AUDIO_TYPE)
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        debug!(len = bytes.len(), %content_type, "tts audio received");
        Ok(Audio { content_type, bytes })
    }

    async fn submit_feedback(&self, req: &FeedbackRequest) -> Result<FeedbackOutcome, PipelineError> {
        let action = req.signals.action();
        let primary = json!({
            "newsId": req.id,
            "feedbackType": action,
            "metadata": {
                "signals": req.signals,
                "title": req.item.get("title"),
                "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            },
        });
        match self.post_json("/api/feedback", &primary).await {
            Ok(body) => {
                return Ok(FeedbackOutcome {
                    id: req.id.clone(),
                    reward: body.get("reward").and_then(Value::as_f64).unwrap_or(0.0),
                    action: action.to_string(),
                    requeued: false,
                })
            }
            Err(e) => warn!(id = %req.id, error = %e, "pipeline feedback failed; using insight node"),
        }

        let body = json!({ "id": req.id, "item": req.item, "signals": req.signals });
        let out = self.signed_json(Method::POST, "/feedback", Some(&body)).await?;
        serde_json::from_value(out).map_err(|e| PipelineError::InvalidResponse(e.to_string()))
    }

    async fn requeue(&self, id: &str) -> Result<Value, PipelineError> {
        self.signed_json(Method::POST, "/requeue", Some(&json!({ "id": id })))
            .await
    }

    async fn insight_feed(&self) -> InsightFeed {
        match self.fetch_feed("/exports/weekly_report.json").await {
            Ok(body) => return InsightFeed::from_body(&body, true),
            Err(e) if e.is_timeout() => {
                warn!("insight feed timed out");
                return InsightFeed::default();
            }
            Err(e) => debug!(error = %e, "weekly report unavailable; trying sample export"),
        }
        match self.fetch_feed("/exports/sample_integration.json").await {
            Ok(body) => InsightFeed::from_body(&body, false),
            Err(e) => {
                warn!(error = %e, "insight feed unavailable");
                InsightFeed::default()
            }
        }
    }
}
