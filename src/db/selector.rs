//! Storage selection.
//!
//! The backend is decided once, at first access, and memoized for the
//! lifetime of the process. A failed connection either aborts (strict mode
//! without fallback) or degrades to the in-memory store for good; the
//! document store is never retried after a fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::document::{
    DocumentCommentRepository, DocumentDaoRepository, DocumentNotificationRepository,
    DocumentStore, DocumentUserRepository,
};
use super::memory::{
    InMemoryCommentRepository, InMemoryDaoRepository, InMemoryNotificationRepository,
    InMemoryUserRepository,
};
use super::traits::{CommentRepository, DaoRepository, NotificationRepository, UserRepository};
use crate::config::Config;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Document,
}

/// One repository per entity, all on the same backend.
pub struct Repositories {
    pub backend: StorageBackend,
    pub daos: Arc<dyn DaoRepository>,
    pub users: Arc<dyn UserRepository>,
    pub comments: Arc<dyn CommentRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            daos: Arc::new(InMemoryDaoRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
            comments: Arc::new(InMemoryCommentRepository::new()),
            notifications: Arc::new(InMemoryNotificationRepository::new()),
        }
    }

    pub fn document(pool: sqlx::SqlitePool) -> Self {
        let store = DocumentStore::new(pool);
        Self {
            backend: StorageBackend::Document,
            daos: Arc::new(DocumentDaoRepository::new(store.clone())),
            users: Arc::new(DocumentUserRepository::new(store.clone())),
            comments: Arc::new(DocumentCommentRepository::new(store.clone())),
            notifications: Arc::new(DocumentNotificationRepository::new(store)),
        }
    }
}

/// Lazily resolves the active `Repositories`.
pub struct StorageSelector {
    config: Arc<Config>,
    resolved: OnceCell<Arc<Repositories>>,
    connect_attempts: AtomicUsize,
}

impl StorageSelector {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            resolved: OnceCell::new(),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    /// Resolve (first call) or return the memoized repositories.
    pub async fn get(&self) -> AppResult<Arc<Repositories>> {
        self.resolved
            .get_or_try_init(|| self.resolve())
            .await
            .cloned()
    }

    /// Backend in use, if resolution already happened.
    pub fn backend(&self) -> Option<StorageBackend> {
        self.resolved.get().map(|repos| repos.backend)
    }

    /// Number of times a document store connection was attempted.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    async fn resolve(&self) -> AppResult<Arc<Repositories>> {
        if !self.config.use_external_store {
            tracing::info!("Using in-memory repositories");
            return Ok(Arc::new(Repositories::in_memory()));
        }

        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match super::init_database(&self.config.db_path).await {
            Ok(pool) => {
                tracing::info!("Connected to document store at {:?}", self.config.db_path);
                Ok(Arc::new(Repositories::document(pool)))
            }
            Err(e) if self.config.strict_store && !self.config.fallback_on_failure => {
                tracing::error!("Document store unavailable in strict mode: {}", e);
                Err(AppError::StoreUnavailable(format!(
                    "Cannot connect to document store at {}: {}",
                    self.config.db_path.display(),
                    e
                )))
            }
            Err(e) => {
                tracing::warn!(
                    "Document store unavailable ({}); falling back to in-memory repositories for this process",
                    e
                );
                Ok(Arc::new(Repositories::in_memory()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(external: bool, strict: bool, fallback: bool, db_path: std::path::PathBuf) -> Arc<Config> {
        Arc::new(Config {
            use_external_store: external,
            strict_store: strict,
            fallback_on_failure: fallback,
            db_path,
            ..Config::default()
        })
    }

    /// A path whose parent is a regular file cannot be opened.
    fn unreachable_path(dir: &TempDir) -> std::path::PathBuf {
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        blocker.join("dao.sqlite")
    }

    #[tokio::test]
    async fn test_memory_selector_is_a_singleton() {
        let selector = Arc::new(StorageSelector::new(config(
            false,
            false,
            true,
            "./unused.sqlite".into(),
        )));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let selector = selector.clone();
            handles.push(tokio::spawn(async move { selector.get().await.unwrap() }));
        }

        let first = selector.get().await.unwrap();
        for handle in handles {
            let repos = handle.await.unwrap();
            assert!(Arc::ptr_eq(&first, &repos));
        }
        assert_eq!(first.backend, StorageBackend::Memory);
        assert_eq!(selector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_document_store_selected_when_reachable() {
        let dir = TempDir::new().unwrap();
        let selector = StorageSelector::new(config(true, true, false, dir.path().join("dao.sqlite")));

        let repos = selector.get().await.unwrap();
        assert_eq!(repos.backend, StorageBackend::Document);
        assert_eq!(selector.backend(), Some(StorageBackend::Document));
        selector.get().await.unwrap();
        assert_eq!(selector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_fallback_on_connection_failure_is_permanent() {
        let dir = TempDir::new().unwrap();
        let selector = StorageSelector::new(config(true, false, true, unreachable_path(&dir)));

        let repos = selector.get().await.unwrap();
        assert_eq!(repos.backend, StorageBackend::Memory);

        selector.get().await.unwrap();
        assert_eq!(selector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_strict_with_fallback_still_degrades() {
        let dir = TempDir::new().unwrap();
        let selector = StorageSelector::new(config(true, true, true, unreachable_path(&dir)));

        assert_eq!(selector.get().await.unwrap().backend, StorageBackend::Memory);
    }

    #[tokio::test]
    async fn test_strict_without_fallback_raises() {
        let dir = TempDir::new().unwrap();
        let selector = StorageSelector::new(config(true, true, false, unreachable_path(&dir)));

        let err = selector.get().await.err().unwrap();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert_eq!(selector.backend(), None);
    }
}
