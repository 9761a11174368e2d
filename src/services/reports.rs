use chrono::Utc;
use sea_orm::{
    sea_query::{Alias, Expr},
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QuerySelect,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    db::DbPool,
    directory::{describe_location, IdentityDirectory, LocationDirectory, ReportDataSource},
    errors::ServiceError,
    models::{opname_session, Location, SessionStatus},
    reports::{
        assemble, build_signatures, render::DocumentRenderer, report_filename, BapDocument,
        BapInput, OpnameStats, ReportZone, Signer,
    },
};

/// A rendered BAP ready to be stored or mailed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReport {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
}

/// Session columns the report needs, with timestamps read back as text.
#[derive(Debug, FromQueryResult)]
struct SessionStamps {
    id: i64,
    site_id: Option<i64>,
    dept_id: Option<i64>,
    user_id: i64,
    status: SessionStatus,
    ended_at: Option<String>,
    manager_reviewer_id: Option<i64>,
    manager_reviewed_at: Option<String>,
    l1_reviewer_id: Option<i64>,
    l1_reviewed_at: Option<String>,
}

#[derive(Clone)]
pub struct ReportService {
    db_pool: Arc<DbPool>,
    locations: Arc<dyn LocationDirectory>,
    identity: Arc<dyn IdentityDirectory>,
    data: Arc<dyn ReportDataSource>,
    renderer: Arc<dyn DocumentRenderer>,
    zone: ReportZone,
}

impl ReportService {
    pub fn new(
        db_pool: Arc<DbPool>,
        locations: Arc<dyn LocationDirectory>,
        identity: Arc<dyn IdentityDirectory>,
        data: Arc<dyn ReportDataSource>,
        renderer: Arc<dyn DocumentRenderer>,
        zone: ReportZone,
    ) -> Self {
        Self {
            db_pool,
            locations,
            identity,
            data,
            renderer,
            zone,
        }
    }

    fn connection(&self) -> &DatabaseConnection {
        self.db_pool.as_ref()
    }

    /// Renders the BAP of a session as it stands now.
    #[instrument(skip(self))]
    pub async fn generate_report(&self, session_id: i64) -> Result<GeneratedReport, ServiceError> {
        let document = self.build_document(session_id).await?;
        let rendered = self.renderer.render(&document).await?;

        // Named after the day it is generated, not the day it was submitted.
        let date = self.zone.localize(&Utc::now()).date_naive();
        let filename = report_filename(&document.location_name, date, rendered.extension);
        info!(session_id, filename = %filename, bytes = rendered.bytes.len(), "BAP generated");

        Ok(GeneratedReport {
            bytes: rendered.bytes,
            filename,
            content_type: rendered.content_type,
        })
    }

    /// Assembles the BAP without rendering it.
    #[instrument(skip(self))]
    pub async fn build_document(&self, session_id: i64) -> Result<BapDocument, ServiceError> {
        let stamps = self.session_stamps(session_id).await?;
        let location = Location::from_ids(stamps.site_id, stamps.dept_id).map_err(|_| {
            ServiceError::InternalError(format!(
                "opname session {} has an invalid location",
                stamps.id
            ))
        })?;
        let (location_name, location_group) =
            describe_location(self.locations.as_ref(), location).await?;

        let ended_at = self.zone.parse_timestamp(stamps.ended_at.as_deref());
        let submitter = Signer::new(self.signer_name(stamps.user_id).await, ended_at);
        let manager = match stamps.manager_reviewer_id {
            Some(id) => Some(Signer::new(
                self.signer_name(id).await,
                self.zone
                    .parse_timestamp(stamps.manager_reviewed_at.as_deref()),
            )),
            None => None,
        };
        let l1 = match stamps.l1_reviewer_id {
            Some(id) => Some(Signer::new(
                self.signer_name(id).await,
                self.zone.parse_timestamp(stamps.l1_reviewed_at.as_deref()),
            )),
            None => None,
        };
        let signatures = build_signatures(
            stamps.status,
            Some(&submitter),
            manager.as_ref(),
            l1.as_ref(),
            &self.zone,
        );

        let recap = self.data.recap_rows(session_id).await?;
        let details = self.data.detail_rows(session_id).await?;

        Ok(assemble(
            BapInput {
                session_id,
                location_name,
                location_group,
                ended_at,
                recap,
                details,
                signatures,
            },
            self.zone.localize(&Utc::now()),
        ))
    }

    /// Asset counts per category for a session.
    #[instrument(skip(self))]
    pub async fn get_opname_stats(&self, session_id: i64) -> Result<OpnameStats, ServiceError> {
        self.session_stamps(session_id).await?;
        let rows = self.data.recap_rows(session_id).await?;
        Ok(OpnameStats::from_recap(&rows))
    }

    async fn signer_name(&self, user_id: i64) -> String {
        match self.identity.get_user(user_id).await {
            Ok(profile) => profile.name,
            Err(e) => {
                warn!(user_id, error = %e, "Signer not found in directory");
                format!("User #{}", user_id)
            }
        }
    }

    async fn session_stamps(&self, session_id: i64) -> Result<SessionStamps, ServiceError> {
        use opname_session::Column;

        let as_text = |column: Column| Expr::col(column).cast_as(Alias::new("TEXT"));
        opname_session::Entity::find()
            .select_only()
            .column(Column::Id)
            .column(Column::SiteId)
            .column(Column::DeptId)
            .column(Column::UserId)
            .column(Column::Status)
            .column_as(as_text(Column::EndedAt), "ended_at")
            .column(Column::ManagerReviewerId)
            .column_as(as_text(Column::ManagerReviewedAt), "manager_reviewed_at")
            .column(Column::L1ReviewerId)
            .column_as(as_text(Column::L1ReviewedAt), "l1_reviewed_at")
            .filter(Column::Id.eq(session_id))
            .into_model::<SessionStamps>()
            .one(self.connection())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("opname session {session_id} not found")))
    }
}
