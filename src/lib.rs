//! Opname API library
//!
//! Physical asset stock-take sessions: the session state machine, the
//! per-session change ledger, BAP (sign-off report) assembly and the
//! notification pipeline that runs after every transition.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod models;
pub mod state_machine;

// Collaborators
pub mod directory;
pub mod uploads;

// Workflow
pub mod notifications;
pub mod reports;
pub mod services;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{AppConfig, MailConfig};
use crate::db::DbPool;
use crate::directory::{
    memory::InMemoryDirectory, AssetDirectory, IdentityDirectory, LocationDirectory,
    ReportDataSource,
};
use crate::events::NotificationJob;
use crate::notifications::{
    Links, LogTransport, NotificationDispatcher, NotificationTransport, OpnameNotifier,
    SendGridTransport, TransportError,
};
use crate::reports::render::{DocumentRenderer, HtmlReportRenderer};
use crate::reports::ReportZone;
use crate::services::{
    asset_changes::AssetChangeService, opname_sessions::OpnameSessionService,
    reports::ReportService, KeyedLocks,
};
use crate::uploads::{LocalPhotoStore, PhotoStore};

/// External systems the workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub locations: Arc<dyn LocationDirectory>,
    pub identity: Arc<dyn IdentityDirectory>,
    pub assets: Arc<dyn AssetDirectory>,
    pub report_data: Arc<dyn ReportDataSource>,
    pub photos: Arc<dyn PhotoStore>,
    pub transport: Arc<dyn NotificationTransport>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl Collaborators {
    /// Every lookup served by one in-memory directory, photos on local disk,
    /// mail per the configured provider and HTML reports.
    pub fn from_directory(
        directory: Arc<InMemoryDirectory>,
        config: &AppConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            locations: directory.clone(),
            identity: directory.clone(),
            assets: directory.clone(),
            report_data: directory,
            photos: Arc::new(LocalPhotoStore::new(&config.uploads_dir)),
            transport: transport_from_config(&config.mail)?,
            renderer: Arc::new(HtmlReportRenderer::new()),
        })
    }
}

/// Mail transport selected by `mail.provider`.
pub fn transport_from_config(
    mail: &MailConfig,
) -> Result<Arc<dyn NotificationTransport>, TransportError> {
    if mail.provider.eq_ignore_ascii_case("sendgrid") {
        let api_key = mail.sendgrid_api_key.clone().ok_or_else(|| {
            TransportError::InvalidMessage("mail.sendgrid_api_key is not set".to_string())
        })?;
        info!(sender = %mail.sender_email, "Mail delivery through SendGrid");
        Ok(Arc::new(SendGridTransport::new(
            api_key,
            mail.sender_email.clone(),
            mail.sender_name.clone(),
        )?))
    } else {
        info!("Mail delivery disabled; messages are logged");
        Ok(Arc::new(LogTransport))
    }
}

/// Services behind the produced operations.
#[derive(Clone)]
pub struct AppServices {
    pub sessions: Arc<OpnameSessionService>,
    pub asset_changes: Arc<AssetChangeService>,
    pub reports: Arc<ReportService>,
}

/// A wired application. The notification queue closes once `services` (the
/// only holder of the event sender) is dropped, which lets `dispatcher`
/// finish.
pub struct OpnameApp {
    pub services: AppServices,
    pub dispatcher: NotificationDispatcher,
    pub jobs: mpsc::Receiver<NotificationJob>,
}

impl OpnameApp {
    pub fn build(db: Arc<DbPool>, config: &AppConfig, collaborators: Collaborators) -> Self {
        let zone = ReportZone::from_hours(config.report.utc_offset_hours);
        let (event_sender, jobs) = events::channel(config.notifications.channel_capacity);
        let event_sender = Arc::new(event_sender);
        let session_locks = Arc::new(KeyedLocks::new());

        let reports = Arc::new(ReportService::new(
            db.clone(),
            collaborators.locations.clone(),
            collaborators.identity.clone(),
            collaborators.report_data.clone(),
            collaborators.renderer.clone(),
            zone,
        ));
        let sessions = Arc::new(OpnameSessionService::new(
            db.clone(),
            event_sender,
            collaborators.identity.clone(),
            collaborators.photos.clone(),
            config.workflow.policy(),
            zone,
            session_locks.clone(),
        ));
        let asset_changes = Arc::new(AssetChangeService::new(
            db.clone(),
            collaborators.assets.clone(),
            collaborators.photos.clone(),
            session_locks,
        ));

        let notifier = OpnameNotifier::new(
            db,
            reports.clone(),
            collaborators.identity,
            collaborators.locations,
            collaborators.transport,
            Links::new(config.frontend_url.clone()),
            zone,
        );
        let dispatcher = NotificationDispatcher::new(
            Arc::new(notifier),
            config.notifications.workers,
            config.notifications.task_timeout(),
        );

        Self {
            services: AppServices {
                sessions,
                asset_changes,
                reports,
            },
            dispatcher,
            jobs,
        }
    }
}
