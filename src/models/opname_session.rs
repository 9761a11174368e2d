use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::location::Location;
use crate::errors::ServiceError;

/// Opname session status.
///
/// `Cancelled` is never stored: cancelling a session deletes it, so the value
/// only appears as the outcome of a transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[sea_orm(string_value = "active")]
    Active,

    #[sea_orm(string_value = "submitted")]
    Submitted,

    #[sea_orm(string_value = "escalated")]
    Escalated,

    #[sea_orm(string_value = "verified")]
    Verified,

    #[sea_orm(string_value = "rejected")]
    Rejected,

    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Verified | SessionStatus::Rejected | SessionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Escalated => "escalated",
            SessionStatus::Verified => "verified",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opname session entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "opname_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub site_id: Option<i64>,

    pub dept_id: Option<i64>,

    /// Initiator
    pub user_id: i64,

    pub status: SessionStatus,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    pub manager_reviewer_id: Option<i64>,

    pub manager_reviewed_at: Option<DateTime<Utc>>,

    pub l1_reviewer_id: Option<i64>,

    pub l1_reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn location(&self) -> Result<Location, ServiceError> {
        Location::from_ids(self.site_id, self.dept_id)
    }
}

/// Read-only snapshot of a session handed to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: i64,
    pub location: Location,
    pub user_id: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub manager_reviewer_id: Option<i64>,
    pub manager_reviewed_at: Option<DateTime<Utc>>,
    pub l1_reviewer_id: Option<i64>,
    pub l1_reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<Model> for SessionSnapshot {
    type Error = ServiceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let location = model.location().map_err(|_| {
            ServiceError::InternalError(format!(
                "opname session {} has an invalid location",
                model.id
            ))
        })?;
        Ok(Self {
            id: model.id,
            location,
            user_id: model.user_id,
            status: model.status,
            started_at: model.started_at,
            ended_at: model.ended_at,
            manager_reviewer_id: model.manager_reviewer_id,
            manager_reviewed_at: model.manager_reviewed_at,
            l1_reviewer_id: model.l1_reviewer_id,
            l1_reviewed_at: model.l1_reviewed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ActiveEnum;

    #[test]
    fn status_values_are_lowercase() {
        assert_eq!(SessionStatus::Escalated.to_value(), "escalated");
        assert_eq!(
            SessionStatus::try_from_value(&"verified".to_string()).unwrap(),
            SessionStatus::Verified
        );
        assert_eq!(SessionStatus::Rejected.to_string(), "rejected");
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Verified.is_terminal());
        assert!(SessionStatus::Rejected.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Submitted.is_terminal());
        assert!(!SessionStatus::Escalated.is_terminal());
    }
}
