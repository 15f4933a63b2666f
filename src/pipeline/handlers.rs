use axum::{
    extract::{Path, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    envelope::{ok, ok_message, ApiResponse},
    error::{AppError, AppResult},
    pipeline::{
        client::PipelineError,
        insight::{FeedbackOutcome, FeedbackRequest, InsightFeed},
        jobs::JobView,
        tracker::Tracker,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub online: bool,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".into()
}

#[derive(Debug, Deserialize)]
pub struct RequeueRequest {
    #[serde(default)]
    pub id: String,
}

pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(start_analysis))
        .route("/analyze/:id", get(get_analysis).delete(cancel_analysis))
        .route("/backend/health", get(backend_health))
        .route("/tts", post(text_to_speech))
        .route("/feedback", post(submit_feedback))
        .route("/requeue", post(requeue))
        .route("/insight-feed", get(insight_feed))
}

/// Creates the remote item, fires the pipeline trigger in the background and
/// starts tracking. The job id is the remote news item id.
#[instrument(skip(state, payload))]
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> AppResult<Json<ApiResponse<AnalyzeResponse>>> {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return Err(AppError::Validation("Please enter a valid news URL".into()));
    }
    if !state.pipeline.health().await {
        return Err(PipelineError::Offline.into());
    }

    let job_id = state.pipeline.create_item(&url).await?;
    info!(%job_id, %url, "analysis started");

    let backend = state.pipeline.clone();
    let trigger_id = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) = backend.trigger(&trigger_id).await {
            warn!(job_id = %trigger_id, error = %e, "pipeline trigger failed");
        }
    });

    let tracker = Tracker::from_config(state.pipeline.clone(), &state.config.pipeline);
    state.jobs.start(tracker, job_id.clone(), url);
    Ok(ok(AnalyzeResponse { job_id }))
}

#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<JobView>>> {
    let view = state
        .jobs
        .view(&id)
        .ok_or_else(|| AppError::NotFound("Analysis not found".into()))?;
    Ok(ok(view))
}

#[instrument(skip(state))]
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    if !state.jobs.cancel(&id) {
        return Err(AppError::NotFound("Analysis not found".into()));
    }
    Ok(ok_message("Analysis cancelled"))
}

#[instrument(skip(state))]
pub async fn backend_health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        online: state.pipeline.health().await,
    })
}

/// Streams the pipeline's audio back with its content type.
#[instrument(skip(state, payload), fields(len = payload.text.len()))]
pub async fn text_to_speech(
    State(state): State<AppState>,
    Json(payload): Json<TtsRequest>,
) -> AppResult<Response> {
    if payload.text.trim().is_empty() {
        return Err(AppError::Validation("Text is required".into()));
    }
    let audio = state.pipeline.tts(&payload.text, &payload.language).await?;
    Ok(([(CONTENT_TYPE, audio.content_type)], audio.bytes).into_response())
}

#[instrument(skip(state, payload), fields(id = %payload.id))]
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(payload): Json<FeedbackRequest>,
) -> AppResult<Json<ApiResponse<FeedbackOutcome>>> {
    if payload.id.trim().is_empty() {
        return Err(AppError::Validation("Feedback needs an item id".into()));
    }
    let outcome = state.pipeline.submit_feedback(&payload).await?;
    info!(action = %outcome.action, requeued = outcome.requeued, "feedback recorded");
    Ok(ok(outcome))
}

#[instrument(skip(state, payload), fields(id = %payload.id))]
pub async fn requeue(
    State(state): State<AppState>,
    Json(payload): Json<RequeueRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    if payload.id.trim().is_empty() {
        return Err(AppError::Validation("Requeue needs an item id".into()));
    }
    Ok(ok(state.pipeline.requeue(&payload.id).await?))
}

#[instrument(skip(state))]
pub async fn insight_feed(State(state): State<AppState>) -> Json<ApiResponse<InsightFeed>> {
    ok(state.pipeline.insight_feed().await)
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering, Arc};
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::pipeline::tracker::testing::FakeBackend;
    use crate::state::AppState;

    async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post_analyze(url: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "url": url }).to_string()))
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn analysis_runs_to_completion() {
        let backend = Arc::new(FakeBackend::new(2));
        let app = crate::app::build_app(AppState::fake_with_pipeline(backend.clone()));

        let (status, body) = call(&app, post_analyze("https://example.com/story")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["jobId"], "news-1");

        let mut last = Value::Null;
        for _ in 0..200 {
            let (_, body) = call(&app, request("GET", "/api/analyze/news-1")).await;
            last = body;
            if last["data"]["state"] != "running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(last["data"]["state"], "completed");
        assert_eq!(last["data"]["progress"]["step"], 5);
        assert_eq!(last["data"]["result"]["workflow_complete"], true);
        assert!(backend.triggered.load(Ordering::SeqCst));
        assert_eq!(backend.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn offline_backend_is_503() {
        let mut backend = FakeBackend::new(0);
        backend.healthy = false;
        let app = crate::app::build_app(AppState::fake_with_pipeline(Arc::new(backend)));

        let (status, body) = call(&app, post_analyze("https://example.com/story")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body["error"],
            "Backend is offline. Please start the backend server first."
        );

        let (status, body) = call(&app, request("GET", "/api/backend/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["online"], false);
    }

    #[tokio::test]
    async fn empty_url_and_unknown_jobs() {
        let app = crate::app::build_app(AppState::fake());
        let (status, _) = call(&app, post_analyze("  ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, request("GET", "/api/analyze/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, request("DELETE", "/api/analyze/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_running_job() {
        let backend = Arc::new(FakeBackend::new(0));
        let app = crate::app::build_app(AppState::fake_with_pipeline(backend));
        call(&app, post_analyze("https://example.com/story")).await;

        let (status, body) = call(&app, request("DELETE", "/api/analyze/news-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Analysis cancelled");

        let (status, _) = call(&app, request("GET", "/api/analyze/news-1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tts_returns_raw_audio() {
        let app = crate::app::build_app(AppState::fake_with_pipeline(Arc::new(FakeBackend::new(0))));

        let resp = app
            .clone()
            .oneshot(post_json("/api/tts", json!({ "text": "hello" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/mpeg");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let (status, _) = call(&app, post_json("/api/tts", json!({ "text": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn feedback_and_requeue_proxy_to_pipeline() {
        let app = crate::app::build_app(AppState::fake_with_pipeline(Arc::new(FakeBackend::new(0))));

        let (status, body) = call(
            &app,
            post_json(
                "/api/feedback",
                json!({ "id": "n1", "item": { "title": "T" }, "signals": { "user_skip": true } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["action"], "skip");
        assert_eq!(body["data"]["reward"], 0.5);

        let (status, _) = call(&app, post_json("/api/feedback", json!({ "signals": {} }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, post_json("/api/requeue", json!({ "id": "n1" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["requeued"], true);
    }

    #[tokio::test]
    async fn insight_feed_is_empty_when_offline() {
        let app = crate::app::build_app(AppState::fake_with_pipeline(Arc::new(FakeBackend::new(0))));
        let (_, body) = call(&app, request("GET", "/api/insight-feed")).await;
        assert_eq!(body["data"]["items"][0]["id"], "weekly-1");

        let mut backend = FakeBackend::new(0);
        backend.healthy = false;
        let app = crate::app::build_app(AppState::fake_with_pipeline(Arc::new(backend)));
        let (status, body) = call(&app, request("GET", "/api/insight-feed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["items"], json!([]));

        let (status, _) = call(&app, post_json("/api/requeue", json!({ "id": "n1" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
