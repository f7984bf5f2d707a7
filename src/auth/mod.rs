//! Role-based authorization.
//!
//! Admins manage DAOs. Inside a DAO, only the team lead (or an admin) may
//! change a task's applicability, progress or assignment; any team member
//! may comment. Viewers are read-only everywhere.

use crate::errors::{AppError, AppResult};
use crate::models::{Dao, Role, User};

/// Something a user attempts to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ManageDaos,
    EditTaskStatus,
    Comment,
    View,
}

impl Action {
    fn describe(&self) -> &'static str {
        match self {
            Action::ManageDaos => "manage DAOs",
            Action::EditTaskStatus => "edit task status",
            Action::Comment => "comment",
            Action::View => "view",
        }
    }
}

pub fn can_manage_daos(user: &User) -> bool {
    user.is_admin()
}

pub fn can_edit_task_status(user: &User, dao: &Dao) -> bool {
    user.is_admin() || dao.team_lead().is_some_and(|lead| lead.id == user.id)
}

pub fn can_comment(user: &User, dao: &Dao) -> bool {
    user.is_admin() || (user.role != Role::Viewer && dao.is_team_member(&user.id))
}

pub fn can_view(_user: &User) -> bool {
    true
}

/// Check `action` for `user`. DAO-scoped actions without a DAO are denied.
pub fn authorize(user: &User, action: Action, dao: Option<&Dao>) -> AppResult<()> {
    let allowed = match (action, dao) {
        (Action::ManageDaos, _) => can_manage_daos(user),
        (Action::EditTaskStatus, Some(dao)) => can_edit_task_status(user, dao),
        (Action::Comment, Some(dao)) => can_comment(user, dao),
        (Action::View, _) => can_view(user),
        (_, None) => false,
    };

    if allowed {
        Ok(())
    } else {
        tracing::debug!("User {} denied: {}", user.id, action.describe());
        Err(AppError::Forbidden(format!(
            "User {} is not allowed to {}",
            user.id,
            action.describe()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TeamMember, TeamRole};
    use chrono::{NaiveDate, Utc};

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: None,
            role,
            created_at: Utc::now(),
        }
    }

    fn dao() -> Dao {
        let member = |id: &str, role| TeamMember {
            id: id.to_string(),
            name: id.to_string(),
            role,
        };
        Dao {
            id: "d1".to_string(),
            numero_liste: "DAO-2025-001".to_string(),
            objet_dossier: "Objet".to_string(),
            reference: "REF".to_string(),
            autorite_contractante: "Mairie".to_string(),
            date_depot: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            equipe: vec![
                member("lead", TeamRole::TeamLead),
                member("member", TeamRole::Member),
                member("viewer", TeamRole::Member),
            ],
            tasks: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_task_status_is_reserved_to_lead_and_admin() {
        let dao = dao();
        assert!(can_edit_task_status(&user("lead", Role::User), &dao));
        assert!(can_edit_task_status(&user("boss", Role::Admin), &dao));
        assert!(!can_edit_task_status(&user("member", Role::User), &dao));
        assert!(!can_edit_task_status(&user("stranger", Role::User), &dao));
    }

    #[test]
    fn test_comment_rules() {
        let dao = dao();
        assert!(can_comment(&user("member", Role::User), &dao));
        assert!(can_comment(&user("lead", Role::User), &dao));
        assert!(can_comment(&user("boss", Role::Admin), &dao));
        assert!(!can_comment(&user("viewer", Role::Viewer), &dao));
        assert!(!can_comment(&user("stranger", Role::User), &dao));
    }

    #[test]
    fn test_authorize_returns_forbidden() {
        let dao = dao();
        let member = user("member", Role::User);

        let err = authorize(&member, Action::ManageDaos, None).unwrap_err();
        assert_eq!(err.error_code(), crate::errors::codes::FORBIDDEN);
        assert!(authorize(&member, Action::Comment, Some(&dao)).is_ok());
        assert!(authorize(&member, Action::Comment, None).is_err());
        assert!(authorize(&user("v", Role::Viewer), Action::View, None).is_ok());
    }
}
