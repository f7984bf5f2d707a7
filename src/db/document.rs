//! Document-store repositories backed by SQLite.
//!
//! Rows carry the serialized document plus the indexed columns; reads always
//! decode the document so both storage flavours return identical shapes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};

use super::traits::{CommentRepository, DaoRepository, NotificationRepository, UserRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{
    Comment, Dao, DaoFilter, DaoSort, DaoUpdate, Page, ServerNotification, SortDirection,
    TaskUpdate, User, UserUpdate, NUMERO_PREFIX,
};

/// Pool shared by the document repositories.
///
/// SQLite has a single writer per database. Writes from this process queue
/// on `writer` so a transaction that reads before writing never has to
/// upgrade its lock while another connection holds it.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode<T: DeserializeOwned>(row: &SqliteRow) -> AppResult<T> {
    let doc: String = row.get("doc");
    Ok(serde_json::from_str(&doc)?)
}

fn decode_all<T: DeserializeOwned>(rows: &[SqliteRow]) -> AppResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

fn count_from(row: &SqliteRow) -> usize {
    let n: i64 = row.get("n");
    n.max(0) as usize
}

// ==================== DAO ====================

#[derive(Clone)]
pub struct DocumentDaoRepository {
    store: DocumentStore,
}

impl DocumentDaoRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    async fn write_row<'e, E>(executor: E, dao: &Dao, insert: bool) -> AppResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let doc = serde_json::to_string(dao)?;
        let sql = if insert {
            r#"INSERT INTO daos (
                numero_liste, objet_dossier, reference, autorite_contractante,
                date_depot, created_at, updated_at, doc, id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        } else {
            r#"UPDATE daos SET
                numero_liste = ?, objet_dossier = ?, reference = ?, autorite_contractante = ?,
                date_depot = ?, created_at = ?, updated_at = ?, doc = ?
            WHERE id = ?"#
        };

        sqlx::query(sql)
            .bind(&dao.numero_liste)
            .bind(&dao.objet_dossier)
            .bind(&dao.reference)
            .bind(&dao.autorite_contractante)
            .bind(dao.date_depot.to_string())
            .bind(timestamp(&dao.created_at))
            .bind(timestamp(&dao.updated_at))
            .bind(&doc)
            .bind(&dao.id)
            .execute(executor)
            .await?;
        Ok(())
    }

    async fn read_for_update(tx: &mut sqlx::Transaction<'_, Sqlite>, id: &str) -> AppResult<Dao> {
        let row = sqlx::query("SELECT doc FROM daos WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref()
            .map(decode)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("DAO {} not found", id)))
    }
}

#[async_trait]
impl DaoRepository for DocumentDaoRepository {
    async fn find_all(&self) -> AppResult<Vec<Dao>> {
        let rows = sqlx::query("SELECT doc FROM daos ORDER BY created_at, rowid")
            .fetch_all(self.store.pool())
            .await?;
        decode_all(&rows)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Dao>> {
        let row = sqlx::query("SELECT doc FROM daos WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_and_paginate(
        &self,
        filter: &DaoFilter,
        sort: DaoSort,
        page: usize,
        page_size: usize,
    ) -> AppResult<Page<Dao>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT doc FROM daos WHERE 1 = 1");
        if let Some(autorite) = &filter.autorite {
            query.push(" AND autorite_contractante = ").push_bind(autorite.clone());
        }
        if let Some(from) = filter.date_from {
            query.push(" AND date_depot >= ").push_bind(from.to_string());
        }
        if let Some(to) = filter.date_to {
            query.push(" AND date_depot <= ").push_bind(to.to_string());
        }
        let direction = match sort.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        query.push(format!(" ORDER BY {} {}, rowid", sort.field.column(), direction));

        let rows = query.build().fetch_all(self.store.pool()).await?;

        // SQLite's LOWER() only folds ASCII; the text search runs on the
        // decoded documents so accented letters match case-insensitively.
        let matching: Vec<Dao> = decode_all::<Dao>(&rows)?
            .into_iter()
            .filter(|dao| filter.matches(dao))
            .collect();

        let total = matching.len();
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let items = matching.into_iter().skip(skip).take(page_size).collect();

        Ok(Page { items, total })
    }

    async fn find_by_numero_year(&self, year: i32) -> AppResult<Vec<Dao>> {
        let rows = sqlx::query("SELECT doc FROM daos WHERE numero_liste LIKE ? ORDER BY numero_liste")
            .bind(format!("{}-{}-%", NUMERO_PREFIX, year))
            .fetch_all(self.store.pool())
            .await?;
        decode_all(&rows)
    }

    async fn get_last_created(&self) -> AppResult<Option<Dao>> {
        let row = sqlx::query("SELECT doc FROM daos ORDER BY created_at DESC, rowid DESC LIMIT 1")
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn count(&self) -> AppResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM daos")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count_from(&row))
    }

    async fn insert(&self, dao: Dao) -> AppResult<Dao> {
        let _writer = self.store.write_lock().await;
        Self::write_row(self.store.pool(), &dao, true).await?;
        Ok(dao)
    }

    async fn insert_many(&self, daos: Vec<Dao>) -> AppResult<usize> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;
        for dao in &daos {
            Self::write_row(&mut *tx, dao, true).await?;
        }
        tx.commit().await?;
        Ok(daos.len())
    }

    async fn update(&self, id: &str, update: &DaoUpdate) -> AppResult<Dao> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;

        let mut dao = Self::read_for_update(&mut tx, id).await?;
        update.apply_to(&mut dao, Utc::now());
        Self::write_row(&mut *tx, &dao, false).await?;
        tx.commit().await?;

        Ok(dao)
    }

    async fn update_task(
        &self,
        id: &str,
        task_id: u32,
        update: &TaskUpdate,
        actor_id: &str,
    ) -> AppResult<Dao> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;

        let mut dao = Self::read_for_update(&mut tx, id).await?;
        update.apply_to_dao(&mut dao, task_id, actor_id, Utc::now())?;
        Self::write_row(&mut *tx, &dao, false).await?;
        tx.commit().await?;

        Ok(dao)
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<Option<Dao>> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;
        let row = sqlx::query("SELECT doc FROM daos WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(dao) = row.as_ref().map(decode::<Dao>).transpose()? else {
            return Ok(None);
        };
        sqlx::query("DELETE FROM daos WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(dao))
    }

    async fn delete_all(&self) -> AppResult<usize> {
        let _writer = self.store.write_lock().await;
        let result = sqlx::query("DELETE FROM daos").execute(self.store.pool()).await?;
        Ok(result.rows_affected() as usize)
    }
}

// ==================== USERS ====================

#[derive(Clone)]
pub struct DocumentUserRepository {
    store: DocumentStore,
}

impl DocumentUserRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UserRepository for DocumentUserRepository {
    async fn find_all(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query("SELECT doc FROM users ORDER BY name")
            .fetch_all(self.store.pool())
            .await?;
        decode_all(&rows)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT doc FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT doc FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn insert(&self, user: User) -> AppResult<User> {
        let _writer = self.store.write_lock().await;
        sqlx::query("INSERT INTO users (id, name, email, created_at, doc) VALUES (?, ?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(timestamp(&user.created_at))
            .bind(serde_json::to_string(&user)?)
            .execute(self.store.pool())
            .await?;
        Ok(user)
    }

    async fn update(&self, id: &str, update: &UserUpdate) -> AppResult<User> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;
        let row = sqlx::query("SELECT doc FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut user: User = row
            .as_ref()
            .map(decode)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        update.apply_to(&mut user);

        sqlx::query("UPDATE users SET name = ?, email = ?, doc = ? WHERE id = ?")
            .bind(&user.name)
            .bind(&user.email)
            .bind(serde_json::to_string(&user)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<bool> {
        let _writer = self.store.write_lock().await;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> AppResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count_from(&row))
    }
}

// ==================== COMMENTS ====================

#[derive(Clone)]
pub struct DocumentCommentRepository {
    store: DocumentStore,
}

impl DocumentCommentRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommentRepository for DocumentCommentRepository {
    async fn find_by_dao(&self, dao_id: &str) -> AppResult<Vec<Comment>> {
        let rows = sqlx::query("SELECT doc FROM comments WHERE dao_id = ? ORDER BY created_at, rowid")
            .bind(dao_id)
            .fetch_all(self.store.pool())
            .await?;
        decode_all(&rows)
    }

    async fn find_by_task(&self, dao_id: &str, task_id: u32) -> AppResult<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT doc FROM comments WHERE dao_id = ? AND task_id = ? ORDER BY created_at, rowid",
        )
        .bind(dao_id)
        .bind(task_id as i64)
        .fetch_all(self.store.pool())
        .await?;
        decode_all(&rows)
    }

    async fn insert(&self, comment: Comment) -> AppResult<Comment> {
        let _writer = self.store.write_lock().await;
        sqlx::query("INSERT INTO comments (id, dao_id, task_id, created_at, doc) VALUES (?, ?, ?, ?, ?)")
            .bind(&comment.id)
            .bind(&comment.dao_id)
            .bind(comment.task_id.map(|t| t as i64))
            .bind(timestamp(&comment.created_at))
            .bind(serde_json::to_string(&comment)?)
            .execute(self.store.pool())
            .await?;
        Ok(comment)
    }

    async fn delete_by_id(&self, id: &str) -> AppResult<bool> {
        let _writer = self.store.write_lock().await;
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_dao(&self, dao_id: &str) -> AppResult<usize> {
        let _writer = self.store.write_lock().await;
        let result = sqlx::query("DELETE FROM comments WHERE dao_id = ?")
            .bind(dao_id)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

// ==================== NOTIFICATIONS ====================

#[derive(Clone)]
pub struct DocumentNotificationRepository {
    store: DocumentStore,
}

impl DocumentNotificationRepository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationRepository for DocumentNotificationRepository {
    async fn insert(&self, notification: &ServerNotification) -> AppResult<()> {
        let _writer = self.store.write_lock().await;
        sqlx::query("INSERT INTO notifications (id, created_at, doc) VALUES (?, ?, ?)")
            .bind(&notification.id)
            .bind(timestamp(&notification.created_at))
            .bind(serde_json::to_string(notification)?)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    async fn mark_read(&self, id: &str, user_id: &str) -> AppResult<()> {
        let _writer = self.store.write_lock().await;
        let mut tx = self.store.pool().begin().await?;
        let row = sqlx::query("SELECT doc FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut notification: ServerNotification = row
            .as_ref()
            .map(decode)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;

        if notification.read_by.insert(user_id.to_string()) {
            sqlx::query("UPDATE notifications SET doc = ? WHERE id = ?")
                .bind(serde_json::to_string(&notification)?)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_recent(&self, limit: usize) -> AppResult<Vec<ServerNotification>> {
        let rows = sqlx::query("SELECT doc FROM notifications ORDER BY created_at DESC, rowid DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(self.store.pool())
            .await?;
        decode_all(&rows)
    }

    async fn count(&self) -> AppResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM notifications")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count_from(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{format_numero, DaoSortField, Role};
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    async fn store() -> (DocumentStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (DocumentStore::new(pool), temp_dir)
    }

    fn dao(id: &str, seq: u32, autorite: &str, day: u32) -> Dao {
        let now = Utc::now();
        Dao {
            id: id.to_string(),
            numero_liste: format_numero(2025, seq),
            objet_dossier: format!("Objet {}", seq),
            reference: format!("REF-{}", seq),
            autorite_contractante: autorite.to_string(),
            date_depot: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            equipe: Vec::new(),
            tasks: vec![crate::models::DaoTask::new(1, "Caution")],
            created_at: now + Duration::milliseconds(seq as i64),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_dao_round_trip_and_duplicate_key() {
        let (store, _dir) = store().await;
        let repo = DocumentDaoRepository::new(store);

        let stored = repo.insert(dao("a", 1, "Mairie", 1)).await.unwrap();
        assert_eq!(repo.find_by_id("a").await.unwrap(), Some(stored));

        let err = repo.insert(dao("b", 1, "Mairie", 1)).await.unwrap_err();
        assert!(err.is_duplicate_key(), "got {err:?}");
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dao_query_operations() {
        let (store, _dir) = store().await;
        let repo = DocumentDaoRepository::new(store);
        repo.insert_many(vec![
            dao("a", 1, "Mairie", 1),
            dao("b", 2, "Ministère", 5),
            dao("c", 3, "Mairie", 9),
        ])
        .await
        .unwrap();

        let filter = DaoFilter {
            autorite: Some("Mairie".to_string()),
            ..Default::default()
        };
        let sort = DaoSort {
            field: DaoSortField::DateDepot,
            direction: SortDirection::Desc,
        };
        let page = repo.find_and_paginate(&filter, sort, 1, 1).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, "c");

        let search = DaoFilter {
            search: Some("ref-2".to_string()),
            ..Default::default()
        };
        let page = repo.find_and_paginate(&search, sort, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, "b");

        assert_eq!(repo.find_by_numero_year(2025).await.unwrap().len(), 3);
        assert!(repo.find_by_numero_year(2024).await.unwrap().is_empty());
        assert_eq!(repo.get_last_created().await.unwrap().unwrap().id, "c");

        let updated = repo
            .update(
                "a",
                &DaoUpdate {
                    objet_dossier: Some("Nouvel objet".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.objet_dossier, "Nouvel objet");
        assert_eq!(
            repo.find_by_id("a").await.unwrap().unwrap().objet_dossier,
            "Nouvel objet"
        );

        assert_eq!(repo.delete_by_id("a").await.unwrap().unwrap().id, "a");
        assert!(repo.delete_by_id("a").await.unwrap().is_none());
        assert_eq!(repo.delete_all().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_task_edits_do_not_lock_out_writers() {
        let (store, _dir) = store().await;
        let repo = DocumentDaoRepository::new(store);
        for seq in 1..=8 {
            let mut seeded = dao(&format!("d{}", seq), seq, "Mairie", 1);
            seeded.tasks = (1..=4)
                .map(|i| crate::models::DaoTask::new(i, format!("Step {}", i)))
                .collect();
            repo.insert(seeded).await.unwrap();
        }

        let mut handles = Vec::new();
        for seq in 1..=8u32 {
            for task_id in 1..=4u32 {
                let repo = repo.clone();
                handles.push(tokio::spawn(async move {
                    let update = TaskUpdate {
                        progress: Some((seq * 10 + task_id) as u8),
                        ..Default::default()
                    };
                    repo.update_task(&format!("d{}", seq), task_id, &update, "lead")
                        .await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for seq in 1..=8u32 {
            let stored = repo.find_by_id(&format!("d{}", seq)).await.unwrap().unwrap();
            for task in &stored.tasks {
                assert_eq!(task.progress, Some((seq * 10 + task.id) as u8));
            }
        }
    }

    #[tokio::test]
    async fn test_user_email_unique() {
        let (store, _dir) = store().await;
        let repo = DocumentUserRepository::new(store);
        let user = |id: &str, email: &str| User {
            id: id.to_string(),
            name: id.to_string(),
            email: Some(email.to_string()),
            role: Role::User,
            created_at: Utc::now(),
        };

        repo.insert(user("u1", "chef@example.org")).await.unwrap();
        let err = repo.insert(user("u2", "CHEF@example.org")).await.unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(
            repo.find_by_email("Chef@Example.org").await.unwrap().unwrap().id,
            "u1"
        );
    }

    #[tokio::test]
    async fn test_notification_mark_read() {
        let (store, _dir) = store().await;
        let repo = DocumentNotificationRepository::new(store);
        let notification = ServerNotification {
            id: "n1".to_string(),
            kind: crate::models::NotificationType::System,
            title: "t".to_string(),
            message: "m".to_string(),
            data: None,
            recipients: crate::models::Recipients::All,
            read_by: Default::default(),
            created_at: Utc::now(),
        };
        repo.insert(&notification).await.unwrap();
        repo.mark_read("n1", "u1").await.unwrap();

        let recent = repo.find_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].is_read_by("u1"));
        assert!(matches!(
            repo.mark_read("missing", "u1").await,
            Err(AppError::NotFound(_))
        ));
    }
}
