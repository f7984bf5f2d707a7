//! In-memory repository implementations.
//!
//! Each entity lives in an `IndexedList`: the items in insertion order plus an
//! id -> position map. Every structural mutation (insert, delete) reindexes so
//! lookups never need a linear scan.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::traits::{CommentRepository, DaoRepository, NotificationRepository, UserRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Comment, Dao, DaoFilter, DaoSort, DaoUpdate, Page, ServerNotification, SortDirection,
    TaskUpdate, User, UserUpdate,
};

/// Anything stored in an `IndexedList`.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Dao {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for User {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Comment {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for ServerNotification {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Outcome of `IndexedList::verify_and_repair`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub duplicate_ids: Vec<String>,
    pub index_mismatches: usize,
    pub repaired: bool,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_ids.is_empty() && self.index_mismatches == 0
    }
}

#[derive(Debug)]
pub struct IndexedList<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Keyed + Clone> Default for IndexedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Clone> IndexedList<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Rebuild the id map from the items. The first occurrence of an id wins.
    fn reindex(&mut self) {
        self.index.clear();
        for (pos, item) in self.items.iter().enumerate() {
            self.index.entry(item.key().to_string()).or_insert(pos);
        }
    }

    pub fn find_index_by_id(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.find_index_by_id(id).and_then(|pos| self.items.get(pos))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let pos = self.find_index_by_id(id)?;
        self.items.get_mut(pos)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Append an item. Returns `false` (and leaves the list untouched) if the id exists.
    pub fn push(&mut self, item: T) -> bool {
        if self.contains(item.key()) {
            return false;
        }
        self.items.push(item);
        self.reindex();
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let pos = self.find_index_by_id(id)?;
        let removed = self.items.remove(pos);
        self.reindex();
        Some(removed)
    }

    /// Remove every item matching `pred`, returning how many went away.
    pub fn remove_where<F: Fn(&T) -> bool>(&mut self, pred: F) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !pred(item));
        let removed = before - self.items.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        self.index.clear();
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Detect duplicate ids and index/content mismatches; drop later
    /// duplicates and rebuild the index when anything is wrong.
    pub fn verify_and_repair(&mut self) -> IntegrityReport {
        let mut report = IntegrityReport::default();

        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.key().to_string()) {
                report.duplicate_ids.push(item.key().to_string());
            }
        }

        for (id, pos) in &self.index {
            match self.items.get(*pos) {
                Some(item) if item.key() == id => {}
                _ => report.index_mismatches += 1,
            }
        }
        report.index_mismatches += seen.iter().filter(|id| !self.index.contains_key(*id)).count();

        if report.is_clean() {
            return report;
        }

        tracing::warn!(
            "In-memory store integrity issue: {} duplicate id(s), {} index mismatch(es); rebuilding",
            report.duplicate_ids.len(),
            report.index_mismatches
        );

        let mut kept = HashSet::new();
        self.items.retain(|item| kept.insert(item.key().to_string()));
        self.reindex();
        report.repaired = true;
        report
    }
}

fn sort_daos(daos: &mut [Dao], sort: DaoSort) {
    daos.sort_by(|a, b| {
        let ord = sort.field.compare(a, b);
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

fn year_prefix(year: i32) -> String {
    format!("{}-{}-", crate::models::NUMERO_PREFIX, year)
}

// ==================== DAO ====================

#[derive(Debug, Default)]
pub struct InMemoryDaoRepository {
    daos: RwLock<IndexedList<Dao>>,
}

impl InMemoryDaoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the integrity check over the DAO list.
    pub async fn verify_and_repair(&self) -> IntegrityReport {
        self.daos.write().await.verify_and_repair()
    }
}

#[async_trait]
impl DaoRepository for InMemoryDaoRepository {
    async fn find_all(&self) -> AppResult<Vec<Dao>> {
        Ok(self.daos.read().await.iter().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Dao>> {
        Ok(self.daos.read().await.get(id).cloned())
    }

    async fn find_and_paginate(
        &self,
        filter: &DaoFilter,
        sort: DaoSort,
        page: usize,
        page_size: usize,
    ) -> AppResult<Page<Dao>> {
        let mut matching: Vec<Dao> = self
            .daos
            .read()
            .await
            .iter()
            .filter(|dao| filter.matches(dao))
            .cloned()
            .collect();
        sort_daos(&mut matching, sort);

        let total = matching.len();
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let items = matching.into_iter().skip(skip).take(page_size).collect();

        Ok(Page { items, total })
    }

    async fn find_by_numero_year(&self, year: i32) -> AppResult<Vec<Dao>> {
        let prefix = year_prefix(year);
        Ok(self
            .daos
            .read()
            .await
            .iter()
            .filter(|dao| dao.numero_liste.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn get_last_created(&self) -> AppResult<Option<Dao>> {
        Ok(self
            .daos
            .read()
            .await
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    async fn count(&self) -> AppResult<usize> {
        Ok(self.daos.read().await.len())
    }

    async fn insert(&self, dao: Dao) -> AppResult<Dao> {
        let mut daos = self.daos.write().await;
        if daos.iter().any(|d| d.numero_liste == dao.numero_liste) {
            return Err(AppError::DuplicateKey(format!(
                "numeroListe {} already exists",
                dao.numero_liste
            )));
        }
        if !daos.push(dao.clone()) {
            return Err(AppError::DuplicateKey(format!("DAO id {} already exists", dao.id)));
        }
        Ok(dao)
    }

    async fn insert_many(&self, daos: Vec<Dao>) -> AppResult<usize> {
        let mut inserted = 0;
        for dao in daos {
            self.insert(dao).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, id: &str, update: &DaoUpdate) -> AppResult<Dao> {
        let mut daos = self.daos.write().await;
        let dao = daos
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("DAO {} not found", id)))?;
        update.apply_to(dao, Utc::now());
        Ok(dao.clone())
    }

    async fn update_task(
        &self,
        id: &str,
        task_id: u32,
        update: &TaskUpdate,
        actor_id: &str,
    ) -> AppResult<Dao> {
        let mut daos = self.daos.write().await;
        let dao = daos
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("DAO {} not found", id)))?;
        update.apply_to_dao(dao, task_id, actor_id, Utc::now())?;
        Ok(dao.clone())
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<Option<Dao>> {
        Ok(self.daos.write().await.remove(id))
    }

    async fn delete_all(&self) -> AppResult<usize> {
        Ok(self.daos.write().await.clear())
    }

    async fn verify_integrity(&self) -> AppResult<IntegrityReport> {
        Ok(self.verify_and_repair().await)
    }
}

// ==================== USERS ====================

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<IndexedList<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_email(a: Option<&str>, b: &str) -> bool {
    a.is_some_and(|a| a.eq_ignore_ascii_case(b))
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_all(&self) -> AppResult<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.iter().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| same_email(u.email.as_deref(), email))
            .cloned())
    }

    async fn insert(&self, user: User) -> AppResult<User> {
        let mut users = self.users.write().await;
        if let Some(email) = user.email.as_deref() {
            if users.iter().any(|u| same_email(u.email.as_deref(), email)) {
                return Err(AppError::DuplicateKey(format!("Email {} already exists", email)));
            }
        }
        if !users.push(user.clone()) {
            return Err(AppError::DuplicateKey(format!("User id {} already exists", user.id)));
        }
        Ok(user)
    }

    async fn update(&self, id: &str, update: &UserUpdate) -> AppResult<User> {
        let mut users = self.users.write().await;
        if let Some(email) = update.email.as_deref() {
            if users
                .iter()
                .any(|u| u.id != id && same_email(u.email.as_deref(), email))
            {
                return Err(AppError::DuplicateKey(format!("Email {} already exists", email)));
            }
        }
        let user = users
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
        update.apply_to(user);
        Ok(user.clone())
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<bool> {
        Ok(self.users.write().await.remove(id).is_some())
    }

    async fn count(&self) -> AppResult<usize> {
        Ok(self.users.read().await.len())
    }
}

// ==================== COMMENTS ====================

#[derive(Debug, Default)]
pub struct InMemoryCommentRepository {
    comments: RwLock<IndexedList<Comment>>,
}

impl InMemoryCommentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommentRepository for InMemoryCommentRepository {
    async fn find_by_dao(&self, dao_id: &str) -> AppResult<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .comments
            .read()
            .await
            .iter()
            .filter(|c| c.dao_id == dao_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn find_by_task(&self, dao_id: &str, task_id: u32) -> AppResult<Vec<Comment>> {
        Ok(self
            .find_by_dao(dao_id)
            .await?
            .into_iter()
            .filter(|c| c.task_id == Some(task_id))
            .collect())
    }

    async fn insert(&self, comment: Comment) -> AppResult<Comment> {
        if !self.comments.write().await.push(comment.clone()) {
            return Err(AppError::DuplicateKey(format!(
                "Comment id {} already exists",
                comment.id
            )));
        }
        Ok(comment)
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<bool> {
        Ok(self.comments.write().await.remove(id).is_some())
    }

    async fn delete_by_dao(&self, dao_id: &str) -> AppResult<usize> {
        Ok(self
            .comments
            .write()
            .await
            .remove_where(|c| c.dao_id == dao_id))
    }
}

// ==================== NOTIFICATIONS ====================

#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<IndexedList<ServerNotification>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, notification: &ServerNotification) -> AppResult<()> {
        if !self.notifications.write().await.push(notification.clone()) {
            return Err(AppError::DuplicateKey(format!(
                "Notification id {} already exists",
                notification.id
            )));
        }
        Ok(())
    }

    async fn mark_read(&self, id: &str, user_id: &str) -> AppResult<()> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
        notification.read_by.insert(user_id.to_string());
        Ok(())
    }

    async fn find_recent(&self, limit: usize) -> AppResult<Vec<ServerNotification>> {
        let mut all: Vec<ServerNotification> =
            self.notifications.read().await.iter().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }

    async fn count(&self) -> AppResult<usize> {
        Ok(self.notifications.read().await.len())
    }
}
