pub mod dto;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

use std::sync::Arc;

use crate::config::{NewsBackend, NewsConfig};
use crate::db::DataClient;
use crate::state::AppState;
use axum::Router;

pub use repo::{FileNewsStore, NewsStore, PgNewsStore};

pub fn router() -> Router<AppState> {
    handlers::news_routes()
}

/// Picks the store configured by `NEWS_STORE`.
pub fn store_from_config(cfg: &NewsConfig, db: DataClient) -> Arc<dyn NewsStore> {
    match cfg.backend {
        NewsBackend::File => {
            tracing::info!(path = %cfg.file_path.display(), cap = cfg.max_articles, "news store: file");
            Arc::new(FileNewsStore::new(cfg.file_path.clone(), cfg.max_articles))
        }
        NewsBackend::Db => {
            tracing::info!("news store: database");
            Arc::new(PgNewsStore::new(db))
        }
    }
}
