use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::asset_diff::AssetDiff;
use crate::errors::ServiceError;

/// How far an operator got with a scanned asset.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "edited")]
    Edited,

    #[sea_orm(string_value = "all_good")]
    AllGood,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Edited => write!(f, "edited"),
            ProcessingStatus::AllGood => write!(f, "all_good"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "edited" => Ok(ProcessingStatus::Edited),
            "all_good" => Ok(ProcessingStatus::AllGood),
            other => Err(ServiceError::ValidationError(format!(
                "processing_status must be one of pending, edited, all_good (got {other:?})"
            ))),
        }
    }
}

/// Asset change entity model: one row per (session, asset tag)
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "asset_changes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub session_id: i64,

    pub asset_tag: String,

    /// Sparse diff, see [`AssetDiff`]
    pub changes: Json,

    pub change_reason: String,

    pub processing_status: ProcessingStatus,

    pub action_notes: Option<String>,

    pub action_notes_by: Option<i64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn diff(&self) -> Result<AssetDiff, ServiceError> {
        AssetDiff::from_json(&self.changes).map_err(|e| {
            ServiceError::SerializationError(format!(
                "asset change {} holds an unreadable diff: {}",
                self.id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn processing_status_parses_wire_values() {
        assert_eq!(
            "all_good".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::AllGood
        );
        assert_eq!(
            " Edited ".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Edited
        );
        assert_matches!(
            "done".parse::<ProcessingStatus>(),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(ProcessingStatus::default(), ProcessingStatus::Pending);
        assert_eq!(ProcessingStatus::AllGood.to_string(), "all_good");
    }
}
