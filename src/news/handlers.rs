use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    envelope::{ok, ok_message, ApiResponse},
    error::{AppError, AppResult},
    news::{
        dto::{DeleteQuery, ListQuery, ListResponse, NewArticle, Pagination},
        repo_types::{Article, PageRequest},
        services::{normalize, NewsError},
    },
    state::AppState,
};

pub fn news_routes() -> Router<AppState> {
    Router::new().route(
        "/scraped-news",
        get(list_articles).post(store_article).delete(delete_article),
    )
}

#[instrument(skip(state))]
pub async fn list_articles(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    let page = PageRequest::new(q.page, q.limit);
    let out = state.news.list(page).await?;
    Ok(Json(ListResponse {
        success: true,
        data: out.items,
        pagination: Pagination {
            page: page.page,
            limit: page.limit,
            total: out.total,
        },
    }))
}

#[instrument(skip(state, payload))]
pub async fn store_article(
    State(state): State<AppState>,
    Json(payload): Json<NewArticle>,
) -> AppResult<Json<ApiResponse<Article>>> {
    let article = normalize(payload, OffsetDateTime::now_utc())?;
    let stored = state.news.upsert(article).await?;
    info!(id = %stored.id, url = %stored.url, "article stored");
    Ok(ok(stored))
}

#[instrument(skip(state))]
pub async fn delete_article(
    State(state): State<AppState>,
    Query(q): Query<DeleteQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    let id = q
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Article id is required".into()))?;
    if !state.news.delete(&id).await? {
        return Err(NewsError::NotFound.into());
    }
    info!(%id, "article deleted");
    Ok(ok_message("Article deleted"))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::state::AppState;

    async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/scraped-news")
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
    async fn store_list_delete_cycle() {
        let app = crate::app::build_app(AppState::fake());

        let (status, body) = call(&app, post(json!({"url": "https://www.example.com/ai-boom"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["source"], "Example");
        assert_eq!(body["data"]["category"], "technology");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        call(&app, post(json!({"url": "https://example.com/second", "id": "second"}))).await;

        let (status, body) = call(&app, request("GET", "/api/scraped-news?limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"], json!({"page": 1, "limit": 1, "total": 2}));
        assert_eq!(body["data"][0]["id"], "second");

        let (status, body) =
            call(&app, request("DELETE", &format!("/api/scraped-news?id={}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn post_without_url_is_invalid_payload() {
        let app = crate::app::build_app(AppState::fake());
        let (status, body) = call(&app, post(json!({"title": "no url"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "Invalid payload"}));
    }

    #[tokio::test]
    async fn deleting_missing_article_is_not_found() {
        let app = crate::app::build_app(AppState::fake());
        let (status, body) = call(&app, request("DELETE", "/api/scraped-news?id=ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"success": false, "error": "Article not found"}));

        let (status, body) = call(&app, request("DELETE", "/api/scraped-news")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn limit_is_capped() {
        let app = crate::app::build_app(AppState::fake());
        let (status, body) = call(&app, request("GET", "/api/scraped-news?page=0&limit=1000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["page"], 1);
        assert_eq!(body["pagination"]["limit"], 100);
        assert_eq!(body["data"], json!([]));
    }
}
