//! DAO orchestration: the operations a request handler calls.
//!
//! Task edits are batched in the change aggregator and only announced when a
//! lead validates them. Team lead changes are announced immediately.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::json;

use super::change_log::ChangeAggregator;
use super::notifications::NotificationCenter;
use super::sequence::SequenceGenerator;
use crate::auth::{authorize, Action};
use crate::db::Repositories;
use crate::errors::{AppError, AppResult};
use crate::models::{
    validate_tasks, validate_team, Comment, Dao, DaoFilter, DaoHistoryEntry, DaoSort, DaoTask,
    DaoUpdate, HistoryQuery, NewComment, NewDao, NotificationType, Page, TaskChange, TaskUpdate,
    User,
};

/// Attempts at inserting a new DAO before a duplicate list number is fatal.
pub const MAX_CREATE_ATTEMPTS: usize = 3;
pub const MAX_PAGE_SIZE: usize = 100;

pub struct DaoService {
    repos: Arc<Repositories>,
    sequence: Arc<SequenceGenerator>,
    aggregator: Arc<ChangeAggregator>,
    notifications: NotificationCenter,
    max_lines: usize,
}

fn require_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Non-applicable tasks carry no progress.
fn normalize_tasks(tasks: &mut [DaoTask]) {
    for task in tasks.iter_mut().filter(|t| !t.is_applicable) {
        task.progress = None;
    }
}

impl DaoService {
    pub fn new(
        repos: Arc<Repositories>,
        sequence: Arc<SequenceGenerator>,
        aggregator: Arc<ChangeAggregator>,
        notifications: NotificationCenter,
        max_lines: usize,
    ) -> Self {
        Self {
            repos,
            sequence,
            aggregator,
            notifications,
            max_lines,
        }
    }

    async fn load(&self, id: &str) -> AppResult<Dao> {
        self.repos
            .daos
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("DAO {} not found", id)))
    }

    pub async fn create_dao(&self, actor: &User, request: NewDao) -> AppResult<Dao> {
        authorize(actor, Action::ManageDaos, None)?;

        let objet_dossier = require_text("objetDossier", &request.objet_dossier)?;
        let reference = require_text("reference", &request.reference)?;
        let autorite_contractante =
            require_text("autoriteContractante", &request.autorite_contractante)?;
        validate_team(&request.equipe)?;
        validate_tasks(&request.tasks)?;
        let mut tasks = request.tasks;
        normalize_tasks(&mut tasks);

        let now = Utc::now();
        let year = now.year();
        let mut attempt = 0;
        let created = loop {
            attempt += 1;
            let numero_liste = self
                .sequence
                .generate_next(self.repos.daos.as_ref(), year)
                .await?;
            let dao = Dao {
                id: uuid::Uuid::new_v4().to_string(),
                numero_liste,
                objet_dossier: objet_dossier.clone(),
                reference: reference.clone(),
                autorite_contractante: autorite_contractante.clone(),
                date_depot: request.date_depot,
                equipe: request.equipe.clone(),
                tasks: tasks.clone(),
                created_at: now,
                updated_at: now,
            };
            match self.repos.daos.insert(dao).await {
                Ok(dao) => break dao,
                Err(e) if e.is_duplicate_key() && attempt < MAX_CREATE_ATTEMPTS => {
                    tracing::warn!("Duplicate list number on attempt {}: {}", attempt, e);
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!("Created DAO {} ({})", created.numero_liste, created.id);
        self.notifications.broadcast(
            NotificationType::DaoCreated,
            format!("New DAO {}", created.numero_liste),
            created.objet_dossier.clone(),
            Some(json!({ "daoId": created.id, "numeroListe": created.numero_liste })),
        );
        Ok(created)
    }

    pub async fn get_dao(&self, actor: &User, id: &str) -> AppResult<Dao> {
        authorize(actor, Action::View, None)?;
        self.load(id).await
    }

    /// `page` below 1 is read as 1; `page_size` is clamped to 1..=100.
    pub async fn list_daos(
        &self,
        actor: &User,
        filter: &DaoFilter,
        sort: DaoSort,
        page: usize,
        page_size: usize,
    ) -> AppResult<Page<Dao>> {
        authorize(actor, Action::View, None)?;
        self.repos
            .daos
            .find_and_paginate(
                filter,
                sort,
                page.max(1),
                page_size.clamp(1, MAX_PAGE_SIZE),
            )
            .await
    }

    pub async fn update_dao(&self, actor: &User, id: &str, mut update: DaoUpdate) -> AppResult<Dao> {
        authorize(actor, Action::ManageDaos, None)?;
        let existing = self.load(id).await?;

        if let Some(equipe) = &update.equipe {
            validate_team(equipe)?;
        }
        if let Some(tasks) = update.tasks.as_mut() {
            validate_tasks(tasks)?;
            normalize_tasks(tasks);
        }
        for (field, value) in [
            ("objetDossier", &mut update.objet_dossier),
            ("reference", &mut update.reference),
            ("autoriteContractante", &mut update.autorite_contractante),
        ] {
            if let Some(text) = value.as_mut() {
                *text = require_text(field, text)?;
            }
        }

        let previous_lead = existing.team_lead().map(|m| m.id.clone());
        let updated = self.repos.daos.update(id, &update).await?;
        let new_lead = updated.team_lead();

        if previous_lead.as_deref() != new_lead.map(|m| m.id.as_str()) {
            self.aggregator.record_leader_change(&updated).await;
            let message = match new_lead {
                Some(lead) => format!("{} is now team lead of {}", lead.name, updated.numero_liste),
                None => format!("{} has no team lead", updated.numero_liste),
            };
            self.notifications.broadcast(
                NotificationType::LeaderChanged,
                format!("Team lead changed on {}", updated.numero_liste),
                message,
                Some(json!({
                    "daoId": updated.id,
                    "previousLeadId": previous_lead,
                    "leadId": new_lead.map(|m| m.id.clone()),
                })),
            );
        } else {
            self.notifications.broadcast(
                NotificationType::DaoUpdated,
                format!("DAO {} updated", updated.numero_liste),
                updated.objet_dossier.clone(),
                Some(json!({ "daoId": updated.id })),
            );
        }

        Ok(updated)
    }

    /// Apply a task edit and queue it for the next validation. Nothing is
    /// broadcast here.
    pub async fn update_task(
        &self,
        actor: &User,
        dao_id: &str,
        task_id: u32,
        update: TaskUpdate,
    ) -> AppResult<Dao> {
        let dao = self.load(dao_id).await?;
        let action = if update.touches_status() {
            Action::EditTaskStatus
        } else {
            Action::Comment
        };
        authorize(actor, action, Some(&dao))?;

        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(AppError::Validation(format!(
                    "Progress must be between 0 and 100, got {}",
                    progress
                )));
            }
        }

        // The copy loaded above is only for authorization; the edit lands on
        // the stored DAO.
        let persisted = self
            .repos
            .daos
            .update_task(dao_id, task_id, &update, &actor.id)
            .await?;
        let task = persisted.task(task_id).ok_or_else(|| {
            AppError::Internal(format!("Task {} vanished from DAO {}", task_id, dao_id))
        })?;

        let change = TaskChange {
            task_id,
            task_name: task.name.clone(),
            is_applicable: update.is_applicable,
            progress: update.progress.and(task.progress),
            comment: update.normalized_comment(),
        };
        self.aggregator.record_task_change(&persisted, change).await;
        tracing::debug!("Task {} of {} updated by {}", task_id, persisted.numero_liste, actor.id);
        Ok(persisted)
    }

    /// Flush pending task changes into one history entry and one broadcast.
    /// Returns `None` when nothing was pending.
    pub async fn validate_changes(
        &self,
        actor: &User,
        dao_id: &str,
    ) -> AppResult<Option<DaoHistoryEntry>> {
        let dao = self.load(dao_id).await?;
        authorize(actor, Action::EditTaskStatus, Some(&dao))?;

        let Some(outcome) = self.aggregator.aggregate_and_clear(&dao, self.max_lines).await else {
            tracing::debug!("Nothing to validate on {}", dao.numero_liste);
            return Ok(None);
        };

        self.notifications.broadcast(
            NotificationType::TaskUpdated,
            outcome.summary.title.clone(),
            outcome.summary.to_message(),
            Some(json!({
                "daoId": dao.id,
                "historyId": outcome.entry.id,
                "taskCount": outcome.summary.task_count,
            })),
        );
        Ok(Some(outcome.entry))
    }

    pub async fn delete_dao(&self, actor: &User, id: &str) -> AppResult<Dao> {
        authorize(actor, Action::ManageDaos, None)?;
        let removed = self
            .repos
            .daos
            .delete_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("DAO {} not found", id)))?;

        self.sequence
            .on_deleted(self.repos.daos.as_ref(), &removed)
            .await?;
        self.aggregator.reset(&removed.id).await;
        let comments = self.repos.comments.delete_by_dao(&removed.id).await?;

        tracing::info!(
            "Deleted DAO {} with {} comments",
            removed.numero_liste,
            comments
        );
        self.notifications.broadcast(
            NotificationType::DaoDeleted,
            format!("DAO {} deleted", removed.numero_liste),
            removed.objet_dossier.clone(),
            Some(json!({ "daoId": removed.id, "numeroListe": removed.numero_liste })),
        );
        Ok(removed)
    }

    /// Post a comment; the rest of the team is notified.
    pub async fn add_comment(
        &self,
        actor: &User,
        dao_id: &str,
        request: NewComment,
    ) -> AppResult<Comment> {
        let dao = self.load(dao_id).await?;
        authorize(actor, Action::Comment, Some(&dao))?;

        let content = require_text("content", &request.content)?;
        if let Some(task_id) = request.task_id {
            if dao.task(task_id).is_none() {
                return Err(AppError::NotFound(format!(
                    "Task {} not found in DAO {}",
                    task_id, dao_id
                )));
            }
        }

        let comment = self
            .repos
            .comments
            .insert(Comment {
                id: uuid::Uuid::new_v4().to_string(),
                dao_id: dao.id.clone(),
                task_id: request.task_id,
                author_id: actor.id.clone(),
                content,
                created_at: Utc::now(),
            })
            .await?;

        let recipients: Vec<String> = dao
            .equipe
            .iter()
            .filter(|m| m.id != actor.id)
            .map(|m| m.id.clone())
            .collect();
        if !recipients.is_empty() {
            self.notifications.notify_users(
                recipients,
                NotificationType::Comment,
                format!("New comment on {}", dao.numero_liste),
                format!("{}: {}", actor.name, comment.content),
                Some(json!({
                    "daoId": dao.id,
                    "taskId": comment.task_id,
                    "commentId": comment.id,
                })),
            );
        }
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        actor: &User,
        dao_id: &str,
        task_id: Option<u32>,
    ) -> AppResult<Vec<Comment>> {
        authorize(actor, Action::View, None)?;
        let dao = self.load(dao_id).await?;
        match task_id {
            Some(task_id) => self.repos.comments.find_by_task(&dao.id, task_id).await,
            None => self.repos.comments.find_by_dao(&dao.id).await,
        }
    }

    pub async fn history(&self, query: HistoryQuery) -> Vec<DaoHistoryEntry> {
        self.aggregator.history().list(query).await
    }

    /// The list number the next created DAO would get this year.
    pub async fn peek_next_number(&self) -> AppResult<String> {
        self.sequence
            .peek_next(self.repos.daos.as_ref(), Utc::now().year())
            .await
    }
}
