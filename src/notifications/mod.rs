//! Out-of-band notifications for session transitions.
//!
//! Transitions enqueue a [`NotificationJob`]; [`NotificationDispatcher`]
//! drains the queue and runs each job in its own supervised task. The
//! [`OpnameNotifier`] re-reads the session, works out who hears about the
//! event with [`plan`], attaches a freshly generated BAP where the event
//! calls for one and hands each message to the transport.

pub mod templates;
pub mod transport;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::auth::Role;
use crate::db::DbPool;
use crate::directory::{
    describe_location, owning_site, IdentityDirectory, LocationDirectory, Recipient,
};
use crate::errors::ServiceError;
use crate::events::{NotificationJob, OpnameEvent};
use crate::models::Location;
use crate::reports::ReportZone;
use crate::services::opname_sessions::load_session;
use crate::services::reports::ReportService;
use crate::state_machine::ReviewTier;

pub use templates::{MessageTemplate, TemplateData};
pub use transport::{
    Attachment, LogTransport, NotificationTransport, OutgoingMessage, SendGridTransport,
    TransportError,
};

const COMPLETED_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// Builds the links placed in mails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Links {
    frontend_url: String,
}

impl Links {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        let frontend_url = frontend_url.into();
        Self {
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Report page of a session, e.g. `<base>/site/12/report?session_id=3`.
    pub fn page(&self, location: Location, session_id: i64) -> String {
        format!(
            "{}/{}/{}/report?session_id={}",
            self.frontend_url,
            location.kind(),
            location.id(),
            session_id
        )
    }

    pub fn review(&self, session_id: i64) -> String {
        format!("{}/opname/{}/review", self.frontend_url, session_id)
    }
}

/// Everything [`plan`] needs to address the messages of one event.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub event: OpnameEvent,
    pub location_name: String,
    /// Submission time, formatted for mail bodies
    pub completed_date: String,
    pub initiator: Recipient,
    pub actor_name: String,
    /// Tier that rejected the session, when the event is a rejection
    pub rejected_by: Option<ReviewTier>,
    pub area_manager: Option<Recipient>,
    pub l1_users: Vec<Recipient>,
    pub page_link: String,
    pub review_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMessage {
    pub to: Recipient,
    pub cc: Vec<String>,
    pub subject: String,
    pub template: MessageTemplate,
    pub data: TemplateData,
    pub attach_report: bool,
}

/// Decides who is told about an event, with what subject and template.
pub fn plan(ctx: &PlanContext) -> Vec<PlannedMessage> {
    let site = &ctx.location_name;
    let base = TemplateData {
        submitter: ctx.initiator.name.clone(),
        reviewer: ctx.actor_name.clone(),
        site_name: site.clone(),
        completed_date: ctx.completed_date.clone(),
        verification_link: String::new(),
        page_link: String::new(),
    };
    let to_initiator = |subject: String, template: MessageTemplate, data: TemplateData| {
        PlannedMessage {
            to: ctx.initiator.clone(),
            cc: Vec::new(),
            subject,
            template,
            data: TemplateData {
                page_link: ctx.page_link.clone(),
                ..data
            },
            attach_report: true,
        }
    };

    match &ctx.event {
        OpnameEvent::SessionSubmitted { .. } => {
            let manager_name = ctx
                .area_manager
                .as_ref()
                .map(|m| m.name.clone())
                .unwrap_or_else(|| "your area manager".to_string());
            let mut messages = vec![to_initiator(
                format!("Opname for {site} submitted"),
                MessageTemplate::OpnameSubmitted,
                TemplateData {
                    reviewer: manager_name,
                    ..base.clone()
                },
            )];
            if let Some(manager) = &ctx.area_manager {
                messages.push(PlannedMessage {
                    to: manager.clone(),
                    cc: Vec::new(),
                    subject: format!("Opname for {site} completed by {}", ctx.initiator.name),
                    template: MessageTemplate::OpnameReviewManager,
                    data: TemplateData {
                        reviewer: manager.name.clone(),
                        verification_link: ctx.review_link.clone(),
                        ..base
                    },
                    attach_report: true,
                });
            }
            messages
        }
        OpnameEvent::SessionEscalated { .. } => {
            let mut messages = vec![to_initiator(
                format!("Opname for {site} approved by {}", ctx.actor_name),
                MessageTemplate::OpnameEscalated,
                base.clone(),
            )];
            messages.extend(ctx.l1_users.iter().map(|l1| PlannedMessage {
                to: l1.clone(),
                cc: Vec::new(),
                subject: format!("Opname for {site} needs your verification!"),
                template: MessageTemplate::OpnameVerificationNeeded,
                data: TemplateData {
                    verification_link: ctx.review_link.clone(),
                    ..base.clone()
                },
                attach_report: true,
            }));
            messages
        }
        OpnameEvent::SessionVerified { .. } => vec![to_initiator(
            format!("Opname for {site} approved by L1 Support Team"),
            MessageTemplate::OpnameVerified,
            TemplateData {
                reviewer: "L1 Support Team".to_string(),
                ..base
            },
        )],
        OpnameEvent::SessionRejected { .. } => {
            let cc: Vec<String> = match ctx.rejected_by {
                Some(ReviewTier::L1) => ctx
                    .area_manager
                    .iter()
                    .map(|m| m.email.clone())
                    .collect(),
                Some(ReviewTier::Manager) => {
                    ctx.l1_users.iter().map(|u| u.email.clone()).collect()
                }
                None => Vec::new(),
            };
            let mut message = to_initiator(
                format!("Opname for {site} rejected by {}", ctx.actor_name),
                MessageTemplate::OpnameRejected,
                base,
            );
            message.cc = cc;
            vec![message]
        }
        OpnameEvent::SessionCancelled {
            initiator_id,
            cancelled_by,
            ..
        } => {
            if initiator_id == cancelled_by {
                return Vec::new();
            }
            let mut message = to_initiator(
                format!("Opname for {site} cancelled by {}", ctx.actor_name),
                MessageTemplate::OpnameCancelled,
                base,
            );
            message.data.page_link = String::new();
            message.attach_report = false;
            vec![message]
        }
    }
}

/// Work run for each dequeued job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: NotificationJob) -> Result<(), ServiceError>;
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    TimedOut,
    Panicked,
    Aborted,
}

/// Tally of finished jobs, returned when the queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub panicked: usize,
    pub aborted: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::TimedOut => self.timed_out += 1,
            JobOutcome::Panicked => self.panicked += 1,
            JobOutcome::Aborted => self.aborted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.timed_out + self.panicked + self.aborted
    }
}

/// Consumes the notification queue. Each job runs in its own task, at most
/// `workers` at a time, and is abandoned after `task_timeout`.
pub struct NotificationDispatcher {
    handler: Arc<dyn JobHandler>,
    workers: usize,
    task_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(handler: Arc<dyn JobHandler>, workers: usize, task_timeout: Duration) -> Self {
        Self {
            handler,
            workers: workers.max(1),
            task_timeout,
        }
    }

    /// Runs until every sender is dropped, then waits for in-flight jobs.
    pub async fn run(self, mut rx: mpsc::Receiver<NotificationJob>) -> DispatchSummary {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut supervisors: JoinSet<JobOutcome> = JoinSet::new();
        let mut summary = DispatchSummary::default();

        info!(workers = self.workers, "Notification dispatcher started");
        while let Some(job) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = self.handler.clone();
            let timeout = self.task_timeout;
            let label = format!("{} ({})", job.event, job.id);

            let task = tokio::spawn(async move {
                let _permit = permit;
                let job_id = job.id;
                let event = job.event.to_string();
                match tokio::time::timeout(timeout, handler.handle(job)).await {
                    Ok(Ok(())) => {
                        debug!(%job_id, event = %event, "Notification job completed");
                        JobOutcome::Completed
                    }
                    Ok(Err(e)) => {
                        error!(%job_id, event = %event, error = %e, "Notification job failed");
                        JobOutcome::Failed
                    }
                    Err(_) => {
                        error!(%job_id, event = %event, timeout_secs = timeout.as_secs(), "Notification job timed out");
                        JobOutcome::TimedOut
                    }
                }
            });
            supervisors.spawn(supervise(label, task));

            while let Some(finished) = supervisors.try_join_next() {
                summary.record(finished.unwrap_or(JobOutcome::Aborted));
            }
        }

        while let Some(finished) = supervisors.join_next().await {
            summary.record(finished.unwrap_or(JobOutcome::Aborted));
        }
        info!(
            completed = summary.completed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            panicked = summary.panicked,
            "Notification dispatcher stopped"
        );
        summary
    }
}

async fn supervise(label: String, task: JoinHandle<JobOutcome>) -> JobOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            error!(event = %label, "Notification job panicked");
            JobOutcome::Panicked
        }
        Err(e) => {
            warn!(event = %label, error = %e, "Notification job aborted");
            JobOutcome::Aborted
        }
    }
}

/// Sends the mails of one opname event.
pub struct OpnameNotifier {
    db_pool: Arc<DbPool>,
    reports: Arc<ReportService>,
    identity: Arc<dyn IdentityDirectory>,
    locations: Arc<dyn LocationDirectory>,
    transport: Arc<dyn NotificationTransport>,
    links: Links,
    zone: ReportZone,
}

impl OpnameNotifier {
    pub fn new(
        db_pool: Arc<DbPool>,
        reports: Arc<ReportService>,
        identity: Arc<dyn IdentityDirectory>,
        locations: Arc<dyn LocationDirectory>,
        transport: Arc<dyn NotificationTransport>,
        links: Links,
        zone: ReportZone,
    ) -> Self {
        Self {
            db_pool,
            reports,
            identity,
            locations,
            transport,
            links,
            zone,
        }
    }

    async fn user_name(&self, user_id: i64) -> String {
        match self.identity.get_user(user_id).await {
            Ok(profile) => profile.name,
            Err(e) => {
                warn!(user_id, error = %e, "Could not resolve user name");
                format!("User #{}", user_id)
            }
        }
    }

    async fn area_manager(&self, location: Location) -> Option<Recipient> {
        let site_id = match owning_site(self.locations.as_ref(), location).await {
            Ok(site_id) => site_id,
            Err(e) => {
                warn!(location = %location, error = %e, "Could not resolve owning site");
                return None;
            }
        };
        match self.identity.area_manager_for(site_id).await {
            Ok(manager) => manager,
            Err(e) => {
                warn!(site_id, error = %e, "Could not resolve area manager");
                None
            }
        }
    }

    async fn l1_users(&self) -> Vec<Recipient> {
        self.identity
            .list_users_by_role(Role::L1Support)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not list L1 support users");
                Vec::new()
            })
    }

    async fn context(&self, event: &OpnameEvent) -> Result<Option<PlanContext>, ServiceError> {
        let (location, initiator_id, ended_at, rejected_by) = match event {
            OpnameEvent::SessionCancelled {
                initiator_id,
                cancelled_by,
                location,
                ..
            } => {
                if initiator_id == cancelled_by {
                    debug!(event = %event, "Initiator cancelled their own session; nothing to send");
                    return Ok(None);
                }
                (*location, *initiator_id, None, None)
            }
            _ => {
                let session = match load_session(self.db_pool.as_ref(), event.session_id()).await {
                    Ok(session) => session,
                    Err(ServiceError::NotFound(_)) => {
                        warn!(event = %event, "Session no longer exists; skipping notification");
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };
                let rejected_by = match event {
                    OpnameEvent::SessionRejected { reviewer_id, .. } => {
                        if session.l1_reviewer_id == Some(*reviewer_id) {
                            Some(ReviewTier::L1)
                        } else {
                            Some(ReviewTier::Manager)
                        }
                    }
                    _ => None,
                };
                (session.location, session.user_id, session.ended_at, rejected_by)
            }
        };

        let (location_name, _) = describe_location(self.locations.as_ref(), location).await?;
        let initiator = self.identity.get_user(initiator_id).await?.recipient();
        let actor_name = self.user_name(event.actor_id()).await;

        let needs_manager = matches!(event, OpnameEvent::SessionSubmitted { .. })
            || rejected_by == Some(ReviewTier::L1);
        let needs_l1 = matches!(event, OpnameEvent::SessionEscalated { .. })
            || rejected_by == Some(ReviewTier::Manager);

        let area_manager = if needs_manager {
            self.area_manager(location).await
        } else {
            None
        };
        let l1_users = if needs_l1 { self.l1_users().await } else { Vec::new() };

        Ok(Some(PlanContext {
            event: event.clone(),
            location_name,
            completed_date: ended_at
                .map(|at| {
                    self.zone
                        .localize(&at)
                        .format(COMPLETED_DATE_FORMAT)
                        .to_string()
                })
                .unwrap_or_default(),
            initiator,
            actor_name,
            rejected_by,
            area_manager,
            l1_users,
            page_link: self.links.page(location, event.session_id()),
            review_link: self.links.review(event.session_id()),
        }))
    }

    async fn report_attachment(&self, session_id: i64) -> Option<Attachment> {
        match self.reports.generate_report(session_id).await {
            Ok(report) => Some(Attachment {
                filename: report.filename,
                content_type: report.content_type.to_string(),
                data: report.bytes,
            }),
            Err(e) => {
                warn!(session_id, error = %e, "Report generation failed; sending without attachment");
                None
            }
        }
    }
}

#[async_trait]
impl JobHandler for OpnameNotifier {
    #[instrument(skip(self, job), fields(event = %job.event))]
    async fn handle(&self, job: NotificationJob) -> Result<(), ServiceError> {
        let ctx = match self.context(&job.event).await? {
            Some(ctx) => ctx,
            None => return Ok(()),
        };
        let planned = plan(&ctx);
        if planned.is_empty() {
            debug!("No recipients for event");
            return Ok(());
        }

        let attachment = if planned.iter().any(|m| m.attach_report) {
            self.report_attachment(job.event.session_id()).await
        } else {
            None
        };

        let outgoing: Vec<OutgoingMessage> = planned
            .into_iter()
            .map(|message| OutgoingMessage {
                to: message.to,
                subject: message.subject,
                template: message.template,
                data: message.data,
                cc: message.cc,
                attachments: if message.attach_report {
                    attachment.iter().cloned().collect()
                } else {
                    Vec::new()
                },
            })
            .collect();

        // One recipient's failure never blocks the others.
        let results = join_all(outgoing.iter().map(|m| self.transport.send(m))).await;
        let mut delivered = 0usize;
        for (message, result) in outgoing.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(to = %message.to.email, template = %message.template, error = %e, "Mail delivery failed");
                }
            }
        }
        info!(job_id = %job.id, delivered, "Notifications sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn person(id: i64, name: &str) -> Recipient {
        Recipient {
            id,
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    fn ctx(event: OpnameEvent) -> PlanContext {
        let links = Links::new("https://app.example.com/");
        PlanContext {
            event,
            location_name: "Plant A".into(),
            completed_date: "Fri, 01 Mar 2024 09:00:00".into(),
            initiator: person(1, "Sari"),
            actor_name: "Budi".into(),
            rejected_by: None,
            area_manager: Some(person(2, "Budi")),
            l1_users: vec![person(3, "Lina"), person(4, "Joko")],
            page_link: links.page(Location::Site(12), 3),
            review_link: links.review(3),
        }
    }

    #[test]
    fn links_use_location_kind() {
        let links = Links::new("https://app.example.com/");
        assert_eq!(
            links.page(Location::Department(4), 9),
            "https://app.example.com/department/4/report?session_id=9"
        );
        assert_eq!(links.review(9), "https://app.example.com/opname/9/review");
    }

    #[test]
    fn submission_goes_to_initiator_and_area_manager() {
        let messages = plan(&ctx(OpnameEvent::SessionSubmitted {
            session_id: 3,
            submitted_by: 1,
        }));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].to.id, 1);
        assert_eq!(messages[0].subject, "Opname for Plant A submitted");
        assert_eq!(messages[0].template, MessageTemplate::OpnameSubmitted);
        assert_eq!(
            messages[0].data.page_link,
            "https://app.example.com/site/12/report?session_id=3"
        );
        assert_eq!(messages[1].to.id, 2);
        assert_eq!(messages[1].subject, "Opname for Plant A completed by Sari");
        assert_eq!(
            messages[1].data.verification_link,
            "https://app.example.com/opname/3/review"
        );
        assert!(messages.iter().all(|m| m.attach_report));
    }

    #[test]
    fn submission_without_area_manager_only_tells_initiator() {
        let mut context = ctx(OpnameEvent::SessionSubmitted {
            session_id: 3,
            submitted_by: 1,
        });
        context.area_manager = None;
        let messages = plan(&context);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data.reviewer, "your area manager");
    }

    #[test]
    fn escalation_fans_out_to_l1_users() {
        let messages = plan(&ctx(OpnameEvent::SessionEscalated {
            session_id: 3,
            manager_id: 2,
        }));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].subject, "Opname for Plant A approved by Budi");
        assert_eq!(
            messages[1].subject,
            "Opname for Plant A needs your verification!"
        );
        assert_eq!(messages[2].to.id, 4);
        assert_eq!(
            messages[2].template,
            MessageTemplate::OpnameVerificationNeeded
        );
    }

    #[test]
    fn verification_tells_initiator() {
        let messages = plan(&ctx(OpnameEvent::SessionVerified {
            session_id: 3,
            reviewer_id: 3,
        }));
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].subject,
            "Opname for Plant A approved by L1 Support Team"
        );
    }

    #[test]
    fn rejection_copies_the_other_tier() {
        let mut by_l1 = ctx(OpnameEvent::SessionRejected {
            session_id: 3,
            reviewer_id: 3,
        });
        by_l1.rejected_by = Some(ReviewTier::L1);
        by_l1.actor_name = "Lina".into();
        let messages = plan(&by_l1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "Opname for Plant A rejected by Lina");
        assert_eq!(messages[0].cc, vec!["budi@example.com".to_string()]);
        assert!(messages[0].attach_report);

        let mut by_manager = ctx(OpnameEvent::SessionRejected {
            session_id: 3,
            reviewer_id: 2,
        });
        by_manager.rejected_by = Some(ReviewTier::Manager);
        let messages = plan(&by_manager);
        assert_eq!(
            messages[0].cc,
            vec!["lina@example.com".to_string(), "joko@example.com".to_string()]
        );
    }

    #[test]
    fn cancellation_notifies_only_when_someone_else_cancelled() {
        let own = plan(&ctx(OpnameEvent::SessionCancelled {
            session_id: 3,
            initiator_id: 1,
            cancelled_by: 1,
            location: Location::Site(12),
        }));
        assert!(own.is_empty());

        let by_support = plan(&ctx(OpnameEvent::SessionCancelled {
            session_id: 3,
            initiator_id: 1,
            cancelled_by: 3,
            location: Location::Site(12),
        }));
        assert_eq!(by_support.len(), 1);
        assert_eq!(by_support[0].template, MessageTemplate::OpnameCancelled);
        assert!(!by_support[0].attach_report);
        assert!(by_support[0].data.page_link.is_empty());
    }

    struct ScriptedHandler {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(&self, job: NotificationJob) -> Result<(), ServiceError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            match job.event.session_id() {
                1 => panic!("renderer blew up"),
                2 => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
                3 => Err(ServiceError::DependencyError("smtp down".into())),
                _ => Ok(()),
            }
        }
    }

    fn verified(session_id: i64) -> OpnameEvent {
        OpnameEvent::SessionVerified {
            session_id,
            reviewer_id: 9,
        }
    }

    #[tokio::test]
    async fn dispatcher_isolates_panics_and_timeouts() {
        let handler = Arc::new(ScriptedHandler {
            handled: AtomicUsize::new(0),
        });
        let dispatcher =
            NotificationDispatcher::new(handler.clone(), 2, Duration::from_millis(100));
        let (sender, rx) = crate::events::channel(8);

        for id in [1, 2, 3, 4, 5] {
            assert!(sender.enqueue(verified(id)));
        }
        drop(sender);

        let summary = dispatcher.run(rx).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 5);
        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.total(), 5);
    }

    mod notifier {
        use super::*;
        use crate::config::AppConfig;
        use crate::directory::{
            MockIdentityDirectory, MockLocationDirectory, MockReportDataSource, SiteInfo,
            UserProfile,
        };
        use crate::models::{opname_session, SessionStatus};
        use crate::reports::render::{MockDocumentRenderer, RenderError, RenderedDocument};
        use chrono::Utc;
        use sea_orm::{ActiveModelTrait, Set};
        use std::sync::Mutex;
        use crate::notifications::transport::MockNotificationTransport;

        async fn submitted_session() -> Arc<DbPool> {
            let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
            cfg.db_max_connections = 1;
            cfg.db_min_connections = 1;
            let pool = crate::db::connect_from_app_config(&cfg).await.unwrap();
            crate::db::run_migrations(&pool).await.unwrap();
            opname_session::ActiveModel {
                id: Default::default(),
                site_id: Set(Some(12)),
                dept_id: Set(None),
                user_id: Set(1),
                status: Set(SessionStatus::Submitted),
                started_at: Set(Utc::now()),
                ended_at: Set(Some(Utc::now())),
                manager_reviewer_id: Set(None),
                manager_reviewed_at: Set(None),
                l1_reviewer_id: Set(None),
                l1_reviewed_at: Set(None),
            }
            .insert(&pool)
            .await
            .unwrap();
            Arc::new(pool)
        }

        fn locations() -> Arc<MockLocationDirectory> {
            let mut locations = MockLocationDirectory::new();
            locations.expect_resolve_site().returning(|id| {
                Ok(SiteInfo {
                    id,
                    name: "Plant A".into(),
                    group: "Jawa Barat".into(),
                })
            });
            Arc::new(locations)
        }

        fn identity() -> Arc<MockIdentityDirectory> {
            let mut identity = MockIdentityDirectory::new();
            identity.expect_get_user().returning(|id| {
                let (name, role) = if id == 2 {
                    ("Budi", Role::AreaManager)
                } else {
                    ("Sari", Role::Staff)
                };
                Ok(UserProfile {
                    id,
                    name: name.into(),
                    email: format!("{}@example.com", name.to_lowercase()),
                    position: "Staff".into(),
                    role,
                })
            });
            identity
                .expect_area_manager_for()
                .returning(|_| Ok(Some(person(2, "Budi"))));
            Arc::new(identity)
        }

        fn notifier(
            db: Arc<DbPool>,
            renderer: MockDocumentRenderer,
            transport: MockNotificationTransport,
        ) -> OpnameNotifier {
            let mut data = MockReportDataSource::new();
            data.expect_recap_rows().returning(|_| Ok(Vec::new()));
            data.expect_detail_rows().returning(|_| Ok(Vec::new()));
            let zone = ReportZone::jakarta();
            let reports = ReportService::new(
                db.clone(),
                locations(),
                identity(),
                Arc::new(data),
                Arc::new(renderer),
                zone,
            );
            OpnameNotifier::new(
                db,
                Arc::new(reports),
                identity(),
                locations(),
                Arc::new(transport),
                Links::new("https://app.example.com"),
                zone,
            )
        }

        fn submitted() -> NotificationJob {
            NotificationJob::new(OpnameEvent::SessionSubmitted {
                session_id: 1,
                submitted_by: 1,
            })
        }

        #[tokio::test]
        async fn render_failure_still_sends_without_attachment() {
            let db = submitted_session().await;
            let mut renderer = MockDocumentRenderer::new();
            renderer
                .expect_render()
                .times(1)
                .returning(|_| Err(RenderError::Unavailable("converter offline".into())));
            let mut transport = MockNotificationTransport::new();
            transport
                .expect_send()
                .withf(|message| message.attachments.is_empty())
                .times(2)
                .returning(|_| Ok(()));

            notifier(db, renderer, transport)
                .handle(submitted())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn one_failed_delivery_does_not_stop_the_rest() {
            let db = submitted_session().await;
            let mut renderer = MockDocumentRenderer::new();
            renderer.expect_render().times(1).returning(|_| {
                Ok(RenderedDocument {
                    bytes: b"<html></html>".to_vec(),
                    content_type: "text/html",
                    extension: "html",
                })
            });
            let delivered = Arc::new(Mutex::new(Vec::new()));
            let mut transport = MockNotificationTransport::new();
            {
                let delivered = delivered.clone();
                transport.expect_send().times(2).returning(move |message| {
                    assert_eq!(message.attachments.len(), 1);
                    if message.to.id == 1 {
                        return Err(TransportError::Http("connection reset".into()));
                    }
                    delivered.lock().unwrap().push(message.to.email.clone());
                    Ok(())
                });
            }

            notifier(db, renderer, transport)
                .handle(submitted())
                .await
                .unwrap();
            assert_eq!(*delivered.lock().unwrap(), vec!["budi@example.com".to_string()]);
        }
    }
}
