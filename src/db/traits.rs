//! Storage-agnostic repository interfaces.
//!
//! Every entity has one trait with an in-memory and a document-store implementation.

use async_trait::async_trait;

use super::memory::IntegrityReport;
use crate::errors::AppResult;
use crate::models::{
    Comment, Dao, DaoFilter, DaoSort, DaoUpdate, Page, ServerNotification, TaskUpdate, User,
    UserUpdate,
};

#[async_trait]
pub trait DaoRepository: Send + Sync {
    async fn find_all(&self) -> AppResult<Vec<Dao>>;

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Dao>>;

    /// Filter, sort and slice. `page` is 1-indexed; `total` is the filtered count.
    /// The page size cap is the caller's responsibility.
    async fn find_and_paginate(
        &self,
        filter: &DaoFilter,
        sort: DaoSort,
        page: usize,
        page_size: usize,
    ) -> AppResult<Page<Dao>>;

    /// All DAOs whose list number belongs to `year`.
    async fn find_by_numero_year(&self, year: i32) -> AppResult<Vec<Dao>>;

    async fn get_last_created(&self) -> AppResult<Option<Dao>>;

    async fn count(&self) -> AppResult<usize>;

    /// Fails with `AppError::DuplicateKey` when the id or list number exists.
    async fn insert(&self, dao: Dao) -> AppResult<Dao>;

    async fn insert_many(&self, daos: Vec<Dao>) -> AppResult<usize>;

    /// Fails with `AppError::NotFound` for an unknown id.
    async fn update(&self, id: &str, update: &DaoUpdate) -> AppResult<Dao>;

    /// Apply `update` to one task against the stored DAO, atomically with
    /// respect to other writes on the same DAO. `NotFound` covers both a
    /// missing DAO and a missing task.
    async fn update_task(
        &self,
        id: &str,
        task_id: u32,
        update: &TaskUpdate,
        actor_id: &str,
    ) -> AppResult<Dao>;

    /// Returns the removed DAO, if any.
    async fn delete_by_id(&self, id: &str) -> AppResult<Option<Dao>>;

    async fn delete_all(&self) -> AppResult<usize>;

    /// Check and self-heal internal indexes. Stores that rely on database
    /// constraints have nothing to repair.
    async fn verify_integrity(&self) -> AppResult<IntegrityReport> {
        Ok(IntegrityReport::default())
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_all(&self) -> AppResult<Vec<User>>;

    async fn find_by_id(&self, id: &str) -> AppResult<Option<User>>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn insert(&self, user: User) -> AppResult<User>;

    async fn update(&self, id: &str, update: &UserUpdate) -> AppResult<User>;

    async fn delete_by_id(&self, id: &str) -> AppResult<bool>;

    async fn count(&self) -> AppResult<usize>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Oldest first.
    async fn find_by_dao(&self, dao_id: &str) -> AppResult<Vec<Comment>>;

    async fn find_by_task(&self, dao_id: &str, task_id: u32) -> AppResult<Vec<Comment>>;

    async fn insert(&self, comment: Comment) -> AppResult<Comment>;

    async fn delete_by_id(&self, id: &str) -> AppResult<bool>;

    async fn delete_by_dao(&self, dao_id: &str) -> AppResult<usize>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &ServerNotification) -> AppResult<()>;

    async fn mark_read(&self, id: &str, user_id: &str) -> AppResult<()>;

    /// Newest first.
    async fn find_recent(&self, limit: usize) -> AppResult<Vec<ServerNotification>>;

    async fn count(&self) -> AppResult<usize>;
}
