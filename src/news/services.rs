use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use url::Url;

use crate::db::DbError;
use crate::error::AppError;
use crate::news::dto::NewArticle;
use crate::news::repo_types::Article;

pub const DESCRIPTION_LIMIT: usize = 200;
pub const ARTICLE_NOT_FOUND: &str = "Article not found";

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("{0}")]
    Invalid(String),
    #[error("Article not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("news file: {0}")]
    Io(#[from] std::io::Error),
    #[error("news file encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("news file has unexpected shape: {0}")]
    Corrupt(String),
}

impl From<NewsError> for AppError {
    fn from(e: NewsError) -> Self {
        match e {
            NewsError::Invalid(m) => AppError::Validation(m),
            NewsError::NotFound => AppError::NotFound(ARTICLE_NOT_FOUND.into()),
            NewsError::Db(db) => AppError::from(db),
            other => AppError::Internal(other.to_string()),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn capitalize_words(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn generate_id(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("scraped_{}_{}", millis, suffix)
}

/// `https://www.tech-crunch.com/x` -> `Tech-crunch`; unparseable -> `Unknown`.
pub fn source_from_url(raw: &str) -> String {
    let Some(host) = Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return "Unknown".into();
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let mut parts: Vec<&str> = host.split('.').collect();
    parts.pop();
    let name = capitalize_words(&parts.join(" "));
    if name.is_empty() {
        "Unknown".into()
    } else {
        name
    }
}

pub fn title_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let last = url
        .path_segments()
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string));
    match last {
        Some(seg) => {
            lazy_static! {
                static ref EXT_RE: Regex = Regex::new(r"\.(html|htm|php)$").unwrap();
            }
            let words = seg.replace(['-', '_'], " ");
            Some(capitalize_words(&EXT_RE.replace(&words, "")))
        }
        None => {
            let host = url.host_str()?;
            let host = host.strip_prefix("www.").unwrap_or(host);
            Some(format!("{} Homepage", capitalize_words(host)))
        }
    }
}

pub fn detect_category(title: &str, description: &str) -> &'static str {
    lazy_static! {
        static ref RULES: Vec<(&'static str, Regex)> = [
            ("technology", r"\b(tech|ai|software|computer|digital)\b"),
            ("business", r"\b(business|economy|market|stock|finance)\b"),
            ("science", r"\b(science|research|study|discovery)\b"),
            ("health", r"\b(health|medical|doctor|hospital)\b"),
            ("environment", r"\b(climate|environment|green|carbon)\b"),
            ("entertainment", r"\b(entertainment|movie|music|celebrity)\b"),
            ("education", r"\b(education|school|university|student)\b"),
        ]
        .into_iter()
        .map(|(name, re)| (name, Regex::new(re).unwrap()))
        .collect();
    }
    let text = format!("{} {}", title, description).to_lowercase();
    RULES
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(name, _)| *name)
        .unwrap_or("general")
}

pub fn truncate_description(text: &str) -> String {
    if text.chars().count() > DESCRIPTION_LIMIT {
        let head: String = text.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub fn read_time(content_len: usize) -> String {
    format!("{} min read", content_len.div_ceil(1000))
}

fn scraped<'a>(data: &'a Option<Value>, path: &[&str]) -> Option<&'a Value> {
    let mut cur = data.as_ref()?;
    for key in path {
        cur = cur.get(key)?;
    }
    Some(cur)
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn best_image(data: &Option<Value>) -> Option<String> {
    let candidates = [
        scraped(data, &["scraped_data", "images"]).and_then(|v| v.get(0)?.get("url")),
        scraped(data, &["scraped_data", "metadata", "image"]),
        scraped(data, &["scraped_data", "metadata", "ogImage"]),
        scraped(data, &["sidebar_videos", "videos"]).and_then(|v| v.get(0)?.get("thumbnail")),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|u| is_http_url(u))
        .map(str::to_string)
}

fn related_videos(data: &Option<Value>) -> Option<Value> {
    let videos = scraped(data, &["sidebar_videos", "videos"])
        .or_else(|| scraped(data, &["related_videos"]))?
        .as_array()?;
    let mapped: Vec<Value> = videos
        .iter()
        .filter(|v| v.get("url").and_then(Value::as_str).is_some())
        .map(|v| {
            serde_json::json!({
                "title": v.get("title").and_then(Value::as_str).unwrap_or("Related Video"),
                "url": v["url"],
                "thumbnail": v.get("thumbnail"),
                "duration": v.get("duration"),
                "source": v.get("source"),
            })
        })
        .collect();
    (!mapped.is_empty()).then(|| Value::Array(mapped))
}

/// Fills every derived field of an incoming article. Only `url` is required.
pub fn normalize(input: NewArticle, now: OffsetDateTime) -> Result<Article, NewsError> {
    let url = non_empty(input.url).ok_or_else(|| NewsError::Invalid("Invalid payload".into()))?;
    let data = input.scraped_data;

    let title = non_empty(input.title)
        .or_else(|| {
            scraped(&data, &["scraped_data", "title"])
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| title_from_url(&url))
        .unwrap_or_else(|| "No title found".into());

    let raw_description = non_empty(input.description)
        .or_else(|| non_empty(input.summary.clone()))
        .unwrap_or_else(|| "No description available".into());
    let description = truncate_description(&raw_description);

    let source = non_empty(input.source).unwrap_or_else(|| source_from_url(&url));
    let category =
        non_empty(input.category).unwrap_or_else(|| detect_category(&title, &description).to_string());

    let content_len = scraped(&data, &["scraped_data", "content_length"])
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or_else(|| raw_description.chars().count());

    let published_at = non_empty(input.published_at)
        .or_else(|| now.format(&Rfc3339).ok())
        .unwrap_or_default();

    Ok(Article {
        id: non_empty(input.id).unwrap_or_else(|| generate_id(now)),
        image_url: non_empty(input.image_url).or_else(|| best_image(&data)),
        read_time: Some(non_empty(input.read_time).unwrap_or_else(|| read_time(content_len))),
        insights: input
            .insights
            .or_else(|| scraped(&data, &["vetting_results"]).cloned()),
        related_videos: input.related_videos.or_else(|| related_videos(&data)),
        summary: non_empty(input.summary),
        scraped_data: data,
        title,
        description,
        url,
        source,
        category,
        published_at,
        stored_at: None,
    })
}
