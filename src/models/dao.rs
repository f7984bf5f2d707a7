//! DAO (tender dossier) model with its team and tasks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Prefix shared by every list number (`DAO-<year>-<seq>`).
pub const NUMERO_PREFIX: &str = "DAO";

/// Role of a member inside a DAO team.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TeamRole {
    TeamLead,
    Member,
}

/// A user assigned to a DAO team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: TeamRole,
}

/// A task tracked inside a DAO.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaoTask {
    pub id: u32,
    pub name: String,
    pub is_applicable: bool,
    /// Only meaningful while the task is applicable.
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl DaoTask {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_applicable: true,
            progress: None,
            comment: None,
            assigned_to: Vec::new(),
            last_updated_by: None,
            last_updated_at: None,
        }
    }
}

/// A tender dossier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dao {
    pub id: String,
    pub numero_liste: String,
    pub objet_dossier: String,
    pub reference: String,
    pub autorite_contractante: String,
    pub date_depot: NaiveDate,
    #[serde(default)]
    pub equipe: Vec<TeamMember>,
    #[serde(default)]
    pub tasks: Vec<DaoTask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dao {
    pub fn team_lead(&self) -> Option<&TeamMember> {
        self.equipe.iter().find(|m| m.role == TeamRole::TeamLead)
    }

    pub fn is_team_member(&self, user_id: &str) -> bool {
        self.equipe.iter().any(|m| m.id == user_id)
    }

    pub fn task(&self, task_id: u32) -> Option<&DaoTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: u32) -> Option<&mut DaoTask> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Year component of the list number.
    pub fn numero_year(&self) -> Option<i32> {
        parse_numero(&self.numero_liste).map(|(year, _)| year)
    }

    /// Sequence component of the list number.
    pub fn numero_sequence(&self) -> Option<u32> {
        parse_numero(&self.numero_liste).map(|(_, seq)| seq)
    }

    /// Check structural invariants of the team and task lists.
    pub fn validate(&self) -> AppResult<()> {
        validate_team(&self.equipe)?;
        validate_tasks(&self.tasks)
    }
}

/// Format a list number, e.g. `DAO-2025-007`.
pub fn format_numero(year: i32, seq: u32) -> String {
    format!("{}-{}-{:03}", NUMERO_PREFIX, year, seq)
}

/// Parse `DAO-<year>-<seq>` into its parts.
pub fn parse_numero(numero: &str) -> Option<(i32, u32)> {
    let mut parts = numero.splitn(3, '-');
    if parts.next()? != NUMERO_PREFIX {
        return None;
    }
    let year = parts.next()?.parse().ok()?;
    let seq = parts.next()?.parse().ok()?;
    Some((year, seq))
}

/// A team holds distinct members and at most one team lead.
pub fn validate_team(team: &[TeamMember]) -> AppResult<()> {
    let leads = team.iter().filter(|m| m.role == TeamRole::TeamLead).count();
    if leads > 1 {
        return Err(AppError::Validation(format!(
            "A DAO team can have at most one team lead, got {}",
            leads
        )));
    }
    for (i, member) in team.iter().enumerate() {
        if team[..i].iter().any(|m| m.id == member.id) {
            return Err(AppError::Validation(format!(
                "Member {} appears twice in the team",
                member.id
            )));
        }
    }
    Ok(())
}

pub fn validate_tasks(tasks: &[DaoTask]) -> AppResult<()> {
    for (i, task) in tasks.iter().enumerate() {
        if tasks[..i].iter().any(|t| t.id == task.id) {
            return Err(AppError::Validation(format!(
                "Task id {} is used twice",
                task.id
            )));
        }
        if let Some(progress) = task.progress {
            if progress > 100 {
                return Err(AppError::Validation(format!(
                    "Task {} progress must be between 0 and 100",
                    task.id
                )));
            }
        }
    }
    Ok(())
}

/// Request body for creating a new DAO. The list number is allocated by the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDao {
    pub objet_dossier: String,
    pub reference: String,
    pub autorite_contractante: String,
    pub date_depot: NaiveDate,
    #[serde(default)]
    pub equipe: Vec<TeamMember>,
    #[serde(default)]
    pub tasks: Vec<DaoTask>,
}

/// Partial update applied by `DaoRepository::update`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoUpdate {
    #[serde(default)]
    pub objet_dossier: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub autorite_contractante: Option<String>,
    #[serde(default)]
    pub date_depot: Option<NaiveDate>,
    #[serde(default)]
    pub equipe: Option<Vec<TeamMember>>,
    #[serde(default)]
    pub tasks: Option<Vec<DaoTask>>,
}

impl DaoUpdate {
    /// Apply the set fields onto `dao` and bump `updated_at`.
    pub fn apply_to(&self, dao: &mut Dao, now: DateTime<Utc>) {
        if let Some(v) = &self.objet_dossier {
            dao.objet_dossier = v.clone();
        }
        if let Some(v) = &self.reference {
            dao.reference = v.clone();
        }
        if let Some(v) = &self.autorite_contractante {
            dao.autorite_contractante = v.clone();
        }
        if let Some(v) = self.date_depot {
            dao.date_depot = v;
        }
        if let Some(v) = &self.equipe {
            dao.equipe = v.clone();
        }
        if let Some(v) = &self.tasks {
            dao.tasks = v.clone();
        }
        dao.updated_at = now;
    }
}

/// Field changes a user applies to a single task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(default)]
    pub is_applicable: Option<bool>,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<Vec<String>>,
}

impl TaskUpdate {
    /// Applicability, progress and assignment are reserved to the team lead.
    pub fn touches_status(&self) -> bool {
        self.is_applicable.is_some() || self.progress.is_some() || self.assigned_to.is_some()
    }

    /// The comment as it will be stored: trimmed, empty meaning cleared.
    pub fn normalized_comment(&self) -> Option<String> {
        self.comment.as_deref().map(|c| c.trim().to_string())
    }

    /// Apply onto `task`. A non-applicable task ends up without progress.
    pub fn apply_to(&self, task: &mut DaoTask, actor_id: &str, now: DateTime<Utc>) {
        if let Some(applicable) = self.is_applicable {
            task.is_applicable = applicable;
        }
        if task.is_applicable {
            if let Some(progress) = self.progress {
                task.progress = Some(progress);
            }
        } else {
            task.progress = None;
        }
        if let Some(comment) = self.normalized_comment() {
            task.comment = (!comment.is_empty()).then_some(comment);
        }
        if let Some(assigned) = &self.assigned_to {
            task.assigned_to = assigned.clone();
        }
        task.last_updated_by = Some(actor_id.to_string());
        task.last_updated_at = Some(now);
    }

    /// Apply onto task `task_id` of `dao` and bump `updated_at`.
    pub fn apply_to_dao(
        &self,
        dao: &mut Dao,
        task_id: u32,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        match dao.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => self.apply_to(task, actor_id, now),
            None => {
                return Err(AppError::NotFound(format!(
                    "Task {} not found in DAO {}",
                    task_id, dao.id
                )))
            }
        }
        dao.updated_at = now;
        Ok(())
    }
}

/// Search filters for `find_and_paginate`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoFilter {
    /// Case-insensitive substring over number, object, reference and authority.
    #[serde(default)]
    pub search: Option<String>,
    /// Exact match on the contracting authority.
    #[serde(default)]
    pub autorite: Option<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
}

impl DaoFilter {
    pub fn matches(&self, dao: &Dao) -> bool {
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let hit = [
                &dao.numero_liste,
                &dao.objet_dossier,
                &dao.reference,
                &dao.autorite_contractante,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(autorite) = &self.autorite {
            if &dao.autorite_contractante != autorite {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if dao.date_depot < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if dao.date_depot > to {
                return false;
            }
        }
        true
    }
}

/// Scalar fields a DAO listing can be sorted by.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DaoSortField {
    NumeroListe,
    ObjetDossier,
    Reference,
    AutoriteContractante,
    DateDepot,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl DaoSortField {
    /// Column name in the document store.
    pub fn column(&self) -> &'static str {
        match self {
            DaoSortField::NumeroListe => "numero_liste",
            DaoSortField::ObjetDossier => "objet_dossier",
            DaoSortField::Reference => "reference",
            DaoSortField::AutoriteContractante => "autorite_contractante",
            DaoSortField::DateDepot => "date_depot",
            DaoSortField::CreatedAt => "created_at",
            DaoSortField::UpdatedAt => "updated_at",
        }
    }

    pub fn compare(&self, a: &Dao, b: &Dao) -> std::cmp::Ordering {
        match self {
            DaoSortField::NumeroListe => a.numero_liste.cmp(&b.numero_liste),
            DaoSortField::ObjetDossier => a.objet_dossier.cmp(&b.objet_dossier),
            DaoSortField::Reference => a.reference.cmp(&b.reference),
            DaoSortField::AutoriteContractante => {
                a.autorite_contractante.cmp(&b.autorite_contractante)
            }
            DaoSortField::DateDepot => a.date_depot.cmp(&b.date_depot),
            DaoSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            DaoSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaoSort {
    #[serde(default)]
    pub field: DaoSortField,
    #[serde(default)]
    pub direction: SortDirection,
}

/// One page of results; `total` counts every filtered match.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, role: TeamRole) -> TeamMember {
        TeamMember {
            id: id.to_string(),
            name: id.to_uppercase(),
            role,
        }
    }

    #[test]
    fn test_numero_round_trip() {
        assert_eq!(format_numero(2025, 7), "DAO-2025-007");
        assert_eq!(format_numero(2025, 1234), "DAO-2025-1234");
        assert_eq!(parse_numero("DAO-2025-007"), Some((2025, 7)));
        assert_eq!(parse_numero("XYZ-2025-007"), None);
        assert_eq!(parse_numero("DAO-2025"), None);
    }

    #[test]
    fn test_team_with_two_leads_is_rejected() {
        let team = vec![
            member("a", TeamRole::TeamLead),
            member("b", TeamRole::TeamLead),
        ];
        assert!(matches!(validate_team(&team), Err(AppError::Validation(_))));

        let team = vec![member("a", TeamRole::TeamLead), member("b", TeamRole::Member)];
        assert!(validate_team(&team).is_ok());
    }

    #[test]
    fn test_duplicate_member_is_rejected() {
        let team = vec![member("a", TeamRole::Member), member("a", TeamRole::Member)];
        assert!(validate_team(&team).is_err());
    }

    #[test]
    fn test_task_progress_bounds() {
        let mut task = DaoTask::new(1, "Caution");
        task.progress = Some(101);
        assert!(validate_tasks(&[task]).is_err());
    }

    #[test]
    fn test_task_update_status_detection() {
        let comment_only = TaskUpdate {
            comment: Some("ok".to_string()),
            ..Default::default()
        };
        assert!(!comment_only.touches_status());

        let progress = TaskUpdate {
            progress: Some(20),
            ..Default::default()
        };
        assert!(progress.touches_status());
    }

    #[test]
    fn test_task_update_apply_clears_progress_when_not_applicable() {
        let now = Utc::now();
        let mut task = DaoTask::new(2, "Caution");
        task.progress = Some(40);

        TaskUpdate {
            is_applicable: Some(false),
            progress: Some(90),
            comment: Some("   ".to_string()),
            ..Default::default()
        }
        .apply_to(&mut task, "lead", now);
        assert!(!task.is_applicable);
        assert_eq!(task.progress, None);
        assert_eq!(task.comment, None);
        assert_eq!(task.last_updated_by.as_deref(), Some("lead"));

        TaskUpdate {
            is_applicable: Some(true),
            ..Default::default()
        }
        .apply_to(&mut task, "lead", now);
        assert!(task.is_applicable);
        assert_eq!(task.progress, None);
    }
}
