use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{is_unique_violation, KeyedLocks, SessionLocks};
use crate::{
    auth::Role,
    db::DbPool,
    directory::{DirectoryError, IdentityDirectory, UserProfile},
    errors::ServiceError,
    events::{EventSender, OpnameEvent},
    models::{
        asset_change, opname_session, opname_session::SessionSnapshot, Location, SessionStatus,
    },
    reports::ReportZone,
    state_machine::{self, ReviewTier, SessionCommand, SessionFacts, Transition, TransitionPolicy},
    uploads::PhotoStore,
};

/// A finished (non-active) session as listed for a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    pub status: SessionStatus,
    pub user_id: i64,
    /// Submission date in the report zone
    pub completed_on: Option<NaiveDate>,
}

/// Opname session lifecycle: start, finish, review and cancel.
#[derive(Clone)]
pub struct OpnameSessionService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    identity: Arc<dyn IdentityDirectory>,
    photos: Arc<dyn PhotoStore>,
    policy: TransitionPolicy,
    zone: ReportZone,
    session_locks: SessionLocks,
    location_locks: Arc<KeyedLocks<Location>>,
}

impl OpnameSessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        identity: Arc<dyn IdentityDirectory>,
        photos: Arc<dyn PhotoStore>,
        policy: TransitionPolicy,
        zone: ReportZone,
        session_locks: SessionLocks,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            identity,
            photos,
            policy,
            zone,
            session_locks,
            location_locks: Arc::new(KeyedLocks::new()),
        }
    }

    fn connection(&self) -> &DatabaseConnection {
        self.db_pool.as_ref()
    }

    /// Opens a new session at `location`. Fails with `Conflict` while another
    /// session there is still active.
    #[instrument(skip(self))]
    pub async fn start_new_session(
        &self,
        user_id: i64,
        location: Location,
    ) -> Result<i64, ServiceError> {
        if user_id <= 0 {
            return Err(ServiceError::ValidationError(
                "user_id must be positive".to_string(),
            ));
        }
        let _guard = self.location_locks.lock(location).await;
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(ServiceError::db_error)?;

        let mut active = opname_session::Entity::find()
            .filter(opname_session::Column::Status.eq(SessionStatus::Active));
        active = match location {
            Location::Site(id) => active.filter(opname_session::Column::SiteId.eq(id)),
            Location::Department(id) => active.filter(opname_session::Column::DeptId.eq(id)),
        };
        if let Some(existing) = active.one(&txn).await.map_err(ServiceError::db_error)? {
            return Err(ServiceError::Conflict(format!(
                "session {} is still active at {}",
                existing.id, location
            )));
        }

        let session = opname_session::ActiveModel {
            id: Default::default(),
            site_id: Set(location.site_id()),
            dept_id: Set(location.dept_id()),
            user_id: Set(user_id),
            status: Set(SessionStatus::Active),
            started_at: Set(Utc::now()),
            ended_at: Set(None),
            manager_reviewer_id: Set(None),
            manager_reviewed_at: Set(None),
            l1_reviewer_id: Set(None),
            l1_reviewed_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict(format!("an active session already exists at {location}"))
            } else {
                ServiceError::db_error(e)
            }
        })?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(session_id = session.id, %location, user_id, "Opname session started");
        Ok(session.id)
    }

    /// Submits an active session for review.
    #[instrument(skip(self))]
    pub async fn finish_opname_session(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> Result<(), ServiceError> {
        self.transition(session_id, SessionCommand::Finish { by: user_id })
            .await?;
        Ok(())
    }

    /// Approves a session as the reviewer's role allows: an area manager
    /// escalates a submitted session, L1 Support verifies an escalated one.
    #[instrument(skip(self))]
    pub async fn approve_opname_session(
        &self,
        session_id: i64,
        reviewer_id: i64,
    ) -> Result<SessionStatus, ServiceError> {
        let role = self.reviewer_role(reviewer_id).await?;
        let transition = self
            .transition(
                session_id,
                SessionCommand::Approve {
                    reviewer: reviewer_id,
                    role,
                },
            )
            .await?;
        Ok(transition.to)
    }

    #[instrument(skip(self))]
    pub async fn reject_opname_session(
        &self,
        session_id: i64,
        reviewer_id: i64,
    ) -> Result<(), ServiceError> {
        let role = self.reviewer_role(reviewer_id).await?;
        self.transition(
            session_id,
            SessionCommand::Reject {
                reviewer: reviewer_id,
                role,
            },
        )
        .await?;
        Ok(())
    }

    /// Cancels a session: its condition photos are deleted first, then the
    /// session and its records. A photo that cannot be deleted aborts the
    /// cancellation with everything left in place.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: i64, user_id: i64) -> Result<(), ServiceError> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.find_model(session_id).await?;

        let role = if user_id == session.user_id {
            Role::Staff
        } else {
            self.role_or_staff(user_id).await?
        };
        let facts = SessionFacts {
            status: session.status,
            initiator_id: session.user_id,
        };
        let transition = state_machine::apply(
            &facts,
            &SessionCommand::Cancel { by: user_id, role },
            &self.policy,
        )?;
        let location = session.location()?;

        let records = asset_change::Entity::find()
            .filter(asset_change::Column::SessionId.eq(session_id))
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        for record in &records {
            let diff = record.diff()?;
            if let Some(url) = diff.photo_url() {
                self.photos.delete(url).await.map_err(|e| {
                    warn!(session_id, asset_tag = %record.asset_tag, error = %e, "Photo deletion failed; session kept");
                    ServiceError::from(e)
                })?;
            }
        }

        let txn = self
            .connection()
            .begin()
            .await
            .map_err(ServiceError::db_error)?;
        asset_change::Entity::delete_many()
            .filter(asset_change::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let deleted = opname_session::Entity::delete_many()
            .filter(opname_session::Column::Id.eq(session_id))
            .filter(opname_session::Column::Status.eq(transition.from))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "session {session_id} changed while it was being cancelled"
            )));
        }
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(session_id, cancelled_by = user_id, records = records.len(), "Opname session cancelled");
        self.event_sender.enqueue(OpnameEvent::SessionCancelled {
            session_id,
            initiator_id: session.user_id,
            cancelled_by: user_id,
            location,
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: i64) -> Result<SessionSnapshot, ServiceError> {
        load_session(self.connection(), session_id).await
    }

    /// Sessions at `location` that are no longer active, newest first.
    #[instrument(skip(self))]
    pub async fn sessions_on_location(
        &self,
        location: Location,
    ) -> Result<Vec<SessionSummary>, ServiceError> {
        let mut query = opname_session::Entity::find()
            .filter(opname_session::Column::Status.ne(SessionStatus::Active));
        query = match location {
            Location::Site(id) => query.filter(opname_session::Column::SiteId.eq(id)),
            Location::Department(id) => query.filter(opname_session::Column::DeptId.eq(id)),
        };
        let sessions = query
            .order_by_desc(opname_session::Column::EndedAt)
            .order_by_desc(opname_session::Column::Id)
            .all(self.connection())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(sessions
            .into_iter()
            .map(|s| SessionSummary {
                id: s.id,
                status: s.status,
                user_id: s.user_id,
                completed_on: s.ended_at.map(|at| self.zone.localize(&at).date_naive()),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn session_initiator(&self, session_id: i64) -> Result<UserProfile, ServiceError> {
        let session = self.find_model(session_id).await?;
        Ok(self.identity.get_user(session.user_id).await?)
    }

    async fn find_model(&self, session_id: i64) -> Result<opname_session::Model, ServiceError> {
        find_model(self.connection(), session_id).await
    }

    async fn reviewer_role(&self, reviewer_id: i64) -> Result<Role, ServiceError> {
        match self.identity.get_user(reviewer_id).await {
            Ok(profile) => Ok(profile.role),
            Err(DirectoryError::NotFound { .. }) => Err(ServiceError::Forbidden(format!(
                "user {reviewer_id} is not a known reviewer"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn role_or_staff(&self, user_id: i64) -> Result<Role, ServiceError> {
        match self.identity.get_user(user_id).await {
            Ok(profile) => Ok(profile.role),
            Err(DirectoryError::NotFound { .. }) => Ok(Role::Staff),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies `command` under the session lock with a conditional update,
    /// then queues the matching notification.
    async fn transition(
        &self,
        session_id: i64,
        command: SessionCommand,
    ) -> Result<Transition, ServiceError> {
        let _guard = self.session_locks.lock(session_id).await;
        let session = self.find_model(session_id).await?;
        let facts = SessionFacts {
            status: session.status,
            initiator_id: session.user_id,
        };
        let transition = state_machine::apply(&facts, &command, &self.policy)?;

        let now = Utc::now();
        let mut update = opname_session::Entity::update_many()
            .col_expr(opname_session::Column::Status, Expr::value(transition.to));
        if transition.stamps_end {
            update = update.col_expr(opname_session::Column::EndedAt, Expr::value(now));
        }
        if let Some(review) = transition.review {
            let (reviewer_col, reviewed_col) = match review.tier {
                ReviewTier::Manager => (
                    opname_session::Column::ManagerReviewerId,
                    opname_session::Column::ManagerReviewedAt,
                ),
                ReviewTier::L1 => (
                    opname_session::Column::L1ReviewerId,
                    opname_session::Column::L1ReviewedAt,
                ),
            };
            update = update
                .col_expr(reviewer_col, Expr::value(review.reviewer_id))
                .col_expr(reviewed_col, Expr::value(now));
        }

        let result = update
            .filter(opname_session::Column::Id.eq(session_id))
            .filter(opname_session::Column::Status.eq(transition.from))
            .exec(self.connection())
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "session {session_id} is no longer {}",
                transition.from
            )));
        }

        info!(
            session_id,
            command = command.name(),
            actor = command.actor(),
            from = %transition.from,
            to = %transition.to,
            "Opname session transitioned"
        );

        let actor = command.actor();
        let event = match transition.to {
            SessionStatus::Submitted => Some(OpnameEvent::SessionSubmitted {
                session_id,
                submitted_by: actor,
            }),
            SessionStatus::Escalated => Some(OpnameEvent::SessionEscalated {
                session_id,
                manager_id: actor,
            }),
            SessionStatus::Verified => Some(OpnameEvent::SessionVerified {
                session_id,
                reviewer_id: actor,
            }),
            SessionStatus::Rejected => Some(OpnameEvent::SessionRejected {
                session_id,
                reviewer_id: actor,
            }),
            SessionStatus::Active | SessionStatus::Cancelled => None,
        };
        if let Some(event) = event {
            self.event_sender.enqueue(event);
        }
        Ok(transition)
    }
}

/// Reads a session without going through the service, for callers that must
/// not hold the event sender.
pub async fn load_session(
    db: &DatabaseConnection,
    session_id: i64,
) -> Result<SessionSnapshot, ServiceError> {
    SessionSnapshot::try_from(find_model(db, session_id).await?)
}

async fn find_model(
    db: &DatabaseConnection,
    session_id: i64,
) -> Result<opname_session::Model, ServiceError> {
    opname_session::Entity::find_by_id(session_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("opname session {session_id} not found")))
}
