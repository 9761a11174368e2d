use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{is_unique_violation, SessionLocks};
use crate::{
    db::DbPool,
    directory::{AssetDirectory, AssetSummary},
    errors::ServiceError,
    models::{
        asset_change, opname_session, AssetDiff, Location, ProcessingStatus, SessionStatus,
    },
    uploads::PhotoStore,
};

/// Lowest session id accepted by the ledger; 0 and -1 are template sessions
/// that have no session row.
pub const MIN_SESSION_ID: i64 = -1;

/// One recorded asset in a session's progress view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    pub id: i64,
    pub asset_tag: String,
    pub changes: AssetDiff,
    pub change_reason: String,
    pub processing_status: ProcessingStatus,
    pub action_notes: Option<String>,
    pub action_notes_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// The per-session change ledger.
#[derive(Clone)]
pub struct AssetChangeService {
    db_pool: Arc<DbPool>,
    assets: Arc<dyn AssetDirectory>,
    photos: Arc<dyn PhotoStore>,
    session_locks: SessionLocks,
}

impl AssetChangeService {
    pub fn new(
        db_pool: Arc<DbPool>,
        assets: Arc<dyn AssetDirectory>,
        photos: Arc<dyn PhotoStore>,
        session_locks: SessionLocks,
    ) -> Self {
        Self {
            db_pool,
            assets,
            photos,
            session_locks,
        }
    }

    fn connection(&self) -> &DatabaseConnection {
        self.db_pool.as_ref()
    }

    /// Records what a scan found for `asset_tag` and returns the fields that
    /// actually changed the asset's current state. The stored diff only keeps
    /// fields that differ from the register.
    #[instrument(skip(self, diff, change_reason))]
    pub async fn process_asset_changes(
        &self,
        session_id: i64,
        asset_tag: &str,
        diff: AssetDiff,
        change_reason: String,
        processing_status: ProcessingStatus,
    ) -> Result<AssetDiff, ServiceError> {
        if session_id < MIN_SESSION_ID {
            return Err(ServiceError::ValidationError(format!(
                "invalid session id {session_id}"
            )));
        }
        let asset_tag = normalize_tag(asset_tag)?;

        let _guard = self.session_locks.lock(session_id).await;
        if session_id > 0 {
            let session = self.find_session(session_id).await?;
            if session.status != SessionStatus::Active {
                return Err(ServiceError::InvalidStatus(format!(
                    "session {session_id} is {} and no longer accepts changes",
                    session.status
                )));
            }
        }

        let baseline = self
            .assets
            .get_asset(&asset_tag)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("asset {asset_tag} not found")))?;

        let existing = self.find_record(session_id, &asset_tag).await?;
        let stored = match &existing {
            Some(record) => record.diff()?,
            None => AssetDiff::default(),
        };

        let current = baseline.overlay(&stored);
        let applied = diff.changes_from(&current);
        let to_store = stored.merge(&diff).changes_from(&baseline);
        let changes = to_store.to_json()?;
        let now = Utc::now();

        match existing {
            Some(record) => {
                let mut active = record.into_active_model();
                active.changes = Set(changes);
                active.change_reason = Set(change_reason);
                active.processing_status = Set(processing_status);
                active.updated_at = Set(now);
                active
                    .update(self.connection())
                    .await
                    .map_err(ServiceError::db_error)?;
            }
            None => {
                asset_change::ActiveModel {
                    id: Default::default(),
                    session_id: Set(session_id),
                    asset_tag: Set(asset_tag.clone()),
                    changes: Set(changes),
                    change_reason: Set(change_reason),
                    processing_status: Set(processing_status),
                    action_notes: Set(None),
                    action_notes_by: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(self.connection())
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::Conflict(format!(
                            "asset {asset_tag} was recorded concurrently in session {session_id}"
                        ))
                    } else {
                        ServiceError::db_error(e)
                    }
                })?;
            }
        }

        debug!(
            session_id,
            asset_tag = %asset_tag,
            applied = ?applied.field_names(),
            stored = ?to_store.field_names(),
            "Asset change recorded"
        );
        Ok(applied)
    }

    /// Deletes the record for `asset_tag`. Its photo is removed on a best
    /// effort basis.
    #[instrument(skip(self))]
    pub async fn remove_asset_change(
        &self,
        session_id: i64,
        asset_tag: &str,
    ) -> Result<(), ServiceError> {
        let asset_tag = normalize_tag(asset_tag)?;
        let _guard = self.session_locks.lock(session_id).await;
        let record = self
            .find_record(session_id, &asset_tag)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no change recorded for asset {asset_tag} in session {session_id}"
                ))
            })?;

        match record.diff() {
            Ok(diff) => {
                if let Some(url) = diff.photo_url() {
                    if let Err(e) = self.photos.delete(url).await {
                        warn!(session_id, asset_tag = %asset_tag, error = %e, "Could not delete condition photo; removing record anyway");
                    }
                }
            }
            Err(e) => warn!(session_id, asset_tag = %asset_tag, error = %e, "Skipping photo cleanup"),
        }

        asset_change::Entity::delete_by_id(record.id)
            .exec(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        info!(session_id, asset_tag = %asset_tag, "Asset change removed");
        Ok(())
    }

    /// Recorded assets of a session in the order they were first scanned.
    #[instrument(skip(self))]
    pub async fn load_opname_progress(
        &self,
        session_id: i64,
    ) -> Result<Vec<ProgressEntry>, ServiceError> {
        if session_id > 0 {
            self.find_session(session_id).await?;
        }
        let records = asset_change::Entity::find()
            .filter(asset_change::Column::SessionId.eq(session_id))
            .order_by_asc(asset_change::Column::Id)
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;

        records
            .into_iter()
            .map(|record| {
                Ok(ProgressEntry {
                    changes: record.diff()?,
                    id: record.id,
                    asset_tag: record.asset_tag,
                    change_reason: record.change_reason,
                    processing_status: record.processing_status,
                    action_notes: record.action_notes,
                    action_notes_by: record.action_notes_by,
                    updated_at: record.updated_at,
                })
            })
            .collect()
    }

    /// Assets expected at the session's location that have no record yet.
    #[instrument(skip(self))]
    pub async fn get_unscanned_assets(
        &self,
        session_id: i64,
    ) -> Result<Vec<AssetSummary>, ServiceError> {
        let session = self.find_session(session_id).await?;
        let location: Location = session.location()?;

        let scanned: HashSet<String> = asset_change::Entity::find()
            .filter(asset_change::Column::SessionId.eq(session_id))
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|record| record.asset_tag)
            .collect();

        let expected = self.assets.assets_at_location(location).await?;
        Ok(expected
            .into_iter()
            .filter(|asset| !scanned.contains(&asset.asset_tag))
            .collect())
    }

    /// Attaches a reviewer's follow-up note to a record.
    #[instrument(skip(self, notes))]
    pub async fn set_action_notes(
        &self,
        session_id: i64,
        asset_tag: &str,
        user_id: i64,
        notes: &str,
    ) -> Result<(), ServiceError> {
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(ServiceError::ValidationError(
                "action notes must not be empty".to_string(),
            ));
        }
        self.write_action_notes(session_id, asset_tag, Some(notes.to_string()), Some(user_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_action_notes(
        &self,
        session_id: i64,
        asset_tag: &str,
        user_id: i64,
    ) -> Result<(), ServiceError> {
        self.write_action_notes(session_id, asset_tag, None, None)
            .await?;
        info!(session_id, asset_tag, user_id, "Action notes cleared");
        Ok(())
    }

    async fn write_action_notes(
        &self,
        session_id: i64,
        asset_tag: &str,
        notes: Option<String>,
        author: Option<i64>,
    ) -> Result<(), ServiceError> {
        let asset_tag = normalize_tag(asset_tag)?;
        let record = self
            .find_record(session_id, &asset_tag)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no change recorded for asset {asset_tag} in session {session_id}"
                ))
            })?;

        let mut active = record.into_active_model();
        active.action_notes = Set(notes);
        active.action_notes_by = Set(author);
        active.updated_at = Set(Utc::now());
        active
            .update(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(())
    }

    async fn find_session(&self, session_id: i64) -> Result<opname_session::Model, ServiceError> {
        opname_session::Entity::find_by_id(session_id)
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("opname session {session_id} not found")))
    }

    async fn find_record(
        &self,
        session_id: i64,
        asset_tag: &str,
    ) -> Result<Option<asset_change::Model>, ServiceError> {
        asset_change::Entity::find()
            .filter(asset_change::Column::SessionId.eq(session_id))
            .filter(asset_change::Column::AssetTag.eq(asset_tag))
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)
    }
}

fn normalize_tag(asset_tag: &str) -> Result<String, ServiceError> {
    let tag = asset_tag.trim();
    if tag.is_empty() {
        return Err(ServiceError::ValidationError(
            "asset_tag must not be empty".to_string(),
        ));
    }
    Ok(tag.to_string())
}
