use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::DataClient;
use crate::news::repo_types::{Article, Page, PageRequest};
use crate::news::services::NewsError;

#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Inserts or replaces the article with the same URL and returns the
    /// stored row.
    async fn upsert(&self, article: Article) -> Result<Article, NewsError>;
    /// Newest first.
    async fn list(&self, page: PageRequest) -> Result<Page, NewsError>;
    async fn delete(&self, id: &str) -> Result<bool, NewsError>;
}

/// JSON-file cache, bounded to `cap` entries, most recent first.
pub struct FileNewsStore {
    path: PathBuf,
    cap: usize,
    lock: Mutex<()>,
}

impl FileNewsStore {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap,
            lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Raw entries in file order. Accepts a bare array or
    /// `{ "items": [...] }`; a missing or blank file is empty. Entries are
    /// kept as JSON so rewrites preserve ones that no longer parse.
    async fn load(&self) -> Result<Vec<Value>, NewsError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "news file missing; starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&raw)? {
            Value::Array(items) => Ok(items),
            Value::Object(mut obj) => match obj.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(NewsError::Corrupt("object without an items array".into())),
            },
            other => Err(NewsError::Corrupt(format!("top-level {}", json_kind(&other)))),
        }
    }

    /// Read path: failures degrade to an empty feed.
    async fn read_articles(&self) -> Vec<Article> {
        let items = match self.load().await {
            Ok(items) => items,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "news file unreadable; serving empty");
                return Vec::new();
            }
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Article>(item) {
                Ok(a) => Some(a),
                Err(e) => {
                    debug!(error = %e, "skipping malformed news entry");
                    None
                }
            })
            .collect()
    }

    async fn write_all(&self, items: &[Value]) -> Result<(), NewsError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&serde_json::json!({ "items": items }))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str)
}

#[async_trait]
impl NewsStore for FileNewsStore {
    async fn upsert(&self, mut article: Article) -> Result<Article, NewsError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        items.retain(|item| field(item, "url") != Some(article.url.as_str()));
        article.stored_at = Some(OffsetDateTime::now_utc());
        items.insert(0, serde_json::to_value(&article)?);
        items.truncate(self.cap);
        self.write_all(&items).await?;
        Ok(article)
    }

    async fn list(&self, page: PageRequest) -> Result<Page, NewsError> {
        let _guard = self.lock.lock().await;
        let articles = self.read_articles().await;
        let total = articles.len() as u64;
        let items = articles
            .into_iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn delete(&self, id: &str) -> Result<bool, NewsError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|item| field(item, "id") != Some(id));
        if items.len() == before {
            return Ok(false);
        }
        self.write_all(&items).await?;
        Ok(true)
    }
}

const ARTICLE_COLUMNS: &str = "id, title, description, url, source, category, image_url, \
                               published_at, read_time, scraped_data, summary, insights, \
                               related_videos, stored_at";

#[derive(Clone)]
pub struct PgNewsStore {
    db: DataClient,
}

impl PgNewsStore {
    pub fn new(db: DataClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NewsStore for PgNewsStore {
    async fn upsert(&self, article: Article) -> Result<Article, NewsError> {
        let sql = format!(
            r#"
            INSERT INTO scraped_news
                (id, title, description, url, source, category, image_url, published_at,
                 read_time, scraped_data, summary, insights, related_videos, stored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
            ON CONFLICT (url) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                source = EXCLUDED.source,
                category = EXCLUDED.category,
                image_url = EXCLUDED.image_url,
                published_at = EXCLUDED.published_at,
                read_time = EXCLUDED.read_time,
                scraped_data = EXCLUDED.scraped_data,
                summary = EXCLUDED.summary,
                insights = EXCLUDED.insights,
                related_videos = EXCLUDED.related_videos,
                stored_at = now()
            RETURNING {ARTICLE_COLUMNS}
            "#
        );
        let sql = sql.as_str();
        let a = &article;
        let stored = self
            .db
            .with_connection(|pool| async move {
                sqlx::query_as::<_, Article>(sql)
                    .bind(&a.id)
                    .bind(&a.title)
                    .bind(&a.description)
                    .bind(&a.url)
                    .bind(&a.source)
                    .bind(&a.category)
                    .bind(&a.image_url)
                    .bind(&a.published_at)
                    .bind(&a.read_time)
                    .bind(&a.scraped_data)
                    .bind(&a.summary)
                    .bind(&a.insights)
                    .bind(&a.related_videos)
                    .fetch_one(&pool)
                    .await
            })
            .await?;
        Ok(stored)
    }

    async fn list(&self, page: PageRequest) -> Result<Page, NewsError> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM scraped_news ORDER BY stored_at DESC LIMIT $1 OFFSET $2"
        );
        let sql = sql.as_str();
        let (items, total) = self
            .db
            .with_connection(|pool| async move {
                let items = sqlx::query_as::<_, Article>(sql)
                    .bind(page.limit as i64)
                    .bind(page.offset() as i64)
                    .fetch_all(&pool)
                    .await?;
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scraped_news")
                    .fetch_one(&pool)
                    .await?;
                Ok::<_, sqlx::Error>((items, total))
            })
            .await?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, NewsError> {
        let deleted = self
            .db
            .with_connection(|pool| async move {
                sqlx::query("DELETE FROM scraped_news WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected() > 0)
            })
            .await?;
        Ok(deleted)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn article(id: &str, url: &str) -> Article {
        serde_json::from_value(json!({ "id": id, "url": url, "title": id })).unwrap()
    }

    fn store_in(dir: &tempfile::TempDir, cap: usize) -> FileNewsStore {
        FileNewsStore::new(dir.path().join("data").join("news.json"), cap)
    }

    #[tokio::test]
    async fn missing_file_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn upsert_dedupes_by_url_and_prepends() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        store.upsert(article("a", "https://x/1")).await.unwrap();
        store.upsert(article("b", "https://x/2")).await.unwrap();
        let again = store.upsert(article("c", "https://x/1")).await.unwrap();
        assert!(again.stored_at.is_some());

        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["items"].as_array().unwrap().len(), 2);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn upsert_truncates_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 3);
        for i in 0..5 {
            store
                .upsert(article(&format!("id{i}"), &format!("https://x/{i}")))
                .await
                .unwrap();
        }
        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].id, "id4");
        assert_eq!(page.items[2].id, "id2");
    }

    #[tokio::test]
    async fn reads_legacy_bare_array_and_skips_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            json!([{ "id": "a", "url": "https://x/1" }, { "id": "no-url" }]).to_string(),
        )
        .unwrap();
        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "a");
    }

    #[tokio::test]
    async fn garbage_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();
        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn upsert_refuses_to_overwrite_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let original = vec![b'[', 0xE9, b']'];
        std::fs::write(store.path(), &original).unwrap();

        let err = store.upsert(article("n", "https://x/new")).await.unwrap_err();
        assert!(matches!(err, NewsError::Io(_)), "{err:?}");
        assert_eq!(
            crate::error::AppError::from(err).status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(store.delete("n").await.is_err());
        assert_eq!(std::fs::read(store.path()).unwrap(), original);
    }

    #[tokio::test]
    async fn upsert_refuses_to_overwrite_non_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.upsert(article("n", "https://x/new")).await.is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn rewrite_keeps_entries_that_do_not_parse() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            json!([
                { "id": "old1", "url": "https://x/1", "readTime": 3 },
                { "id": "old2", "url": "https://x/2" }
            ])
            .to_string(),
        )
        .unwrap();

        store.upsert(article("m", "https://x/3")).await.unwrap();

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        let ids: Vec<_> = on_disk["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["m", "old1", "old2"]);
        assert_eq!(on_disk["items"][1]["readTime"], 3);

        // the unparseable entry is still hidden from readers
        let page = store.list(PageRequest::new(None, None)).await.unwrap();
        let listed: Vec<_> = page.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(listed, vec!["m", "old2"]);

        assert!(store.delete("old1").await.unwrap());
    }

    #[tokio::test]
    async fn paginates_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        for i in 0..5 {
            store
                .upsert(article(&format!("id{i}"), &format!("https://x/{i}")))
                .await
                .unwrap();
        }
        let page = store.list(PageRequest::new(Some(2), Some(2))).await.unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<_> = page.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["id2", "id1"]);
    }

    #[tokio::test]
    async fn delete_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir, 100);
        store.upsert(article("a", "https://x/1")).await.unwrap();
        assert!(!store.delete("nope").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }
}
