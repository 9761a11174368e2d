#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opname_api::{
    config::AppConfig,
    db::{self, DbPool},
    directory::memory::InMemoryDirectory,
    notifications::{DispatchSummary, NotificationTransport, OutgoingMessage, TransportError},
    reports::render::HtmlReportRenderer,
    uploads::{PhotoStore, PhotoStoreError},
    AppServices, Collaborators, OpnameApp,
};
use tokio::task::JoinHandle;

pub const PLANT_A: i64 = 12;
pub const FINANCE_DEPT: i64 = 4;

pub const SARI: i64 = 1;
pub const BUDI_MANAGER: i64 = 2;
pub const LINA_L1: i64 = 3;
pub const RUDI: i64 = 6;

pub const PHOTO_URL: &str = "/uploads/asset_condition_photo/at-002.jpg";

/// Directory used by the integration tests. Report rows are seeded for
/// session 1, the first id a fresh database hands out.
pub const DIRECTORY: &str = r#"{
  "sites": [
    { "id": 12, "name": "Plant A", "group": "Jawa Barat" },
    { "id": 14, "name": "Head Office", "group": "DKI Jakarta" }
  ],
  "departments": [ { "id": 4, "name": "Finance", "site_id": 14 } ],
  "users": [
    { "id": 1, "name": "Sari", "email": "sari@example.com", "position": "Staff IT", "site_id": 12 },
    { "id": 2, "name": "Budi", "email": "budi@example.com", "position": "Area Manager", "site_id": 12 },
    { "id": 3, "name": "Lina", "email": "lina@example.com", "position": "L1 Support", "site_id": 14 },
    { "id": 6, "name": "Rudi", "email": "rudi@example.com", "position": "Staff GA", "site_id": 12 }
  ],
  "assets": [
    { "asset_tag": "AT-001", "name": "Laptop", "site_id": 12,
      "baseline": { "status": "working", "room": "R101", "condition": true } },
    { "asset_tag": "AT-002", "name": "Monitor", "site_id": 12,
      "baseline": { "status": "working", "room": "R101", "condition": true } },
    { "asset_tag": "AT-003", "name": "Printer", "site_id": 12,
      "baseline": { "status": "working", "room": "R102" } },
    { "asset_tag": "FN-010", "name": "Laptop", "dept_id": 4,
      "baseline": { "status": "working" } }
  ],
  "reports": {
    "1": {
      "recap": [
        { "category": "missing_assets", "product_variety": "Printer", "asset_count": 1 },
        { "category": "broken_assets", "product_variety": "Laptop", "asset_count": 1 },
        { "category": "working_assets", "product_variety": "Monitor", "asset_count": 1 }
      ],
      "details": [
        { "category": "broken_assets", "company": "PT Maju", "asset_tag": "AT-001",
          "asset_name": "Laptop", "asset_status": "broken" }
      ]
    }
  }
}"#;

/// Transport that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap().insert(email.to_string());
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(&message.to.email) {
            return Err(TransportError::Rejected {
                status: 550,
                body: "mailbox unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Photo store that records deletions and can be told to fail.
#[derive(Default)]
pub struct RecordingPhotoStore {
    deleted: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPhotoStore {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl PhotoStore for RecordingPhotoStore {
    async fn delete(&self, url: &str) -> Result<(), PhotoStoreError> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(PhotoStoreError::Io {
                url: url.to_string(),
                message: "permission denied".into(),
            });
        }
        self.deleted.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Application wired against in-memory SQLite, the test directory and
/// recording collaborators. The notification dispatcher runs in the
/// background until [`TestApp::drain`] is called.
pub struct TestApp {
    pub services: AppServices,
    pub db: Arc<DbPool>,
    pub transport: Arc<RecordingTransport>,
    pub photos: Arc<RecordingPhotoStore>,
    dispatcher: JoinHandle<DispatchSummary>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.frontend_url = "https://opname.example.com".to_string();
        adjust(&mut cfg);

        let pool = db::connect_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let directory = Arc::new(
            InMemoryDirectory::from_json(DIRECTORY, cfg.roles.role_map())
                .expect("test directory is valid"),
        );
        let transport = Arc::new(RecordingTransport::default());
        let photos = Arc::new(RecordingPhotoStore::default());
        let collaborators = Collaborators {
            locations: directory.clone(),
            identity: directory.clone(),
            assets: directory.clone(),
            report_data: directory,
            photos: photos.clone(),
            transport: transport.clone(),
            renderer: Arc::new(HtmlReportRenderer::new()),
        };

        let OpnameApp {
            services,
            dispatcher,
            jobs,
        } = OpnameApp::build(db.clone(), &cfg, collaborators);
        let dispatcher = tokio::spawn(dispatcher.run(jobs));

        Self {
            services,
            db,
            transport,
            photos,
            dispatcher,
        }
    }

    /// Closes the notification queue and waits for every queued job.
    pub async fn drain(self) -> (DispatchSummary, Vec<OutgoingMessage>) {
        let TestApp {
            services,
            transport,
            dispatcher,
            ..
        } = self;
        drop(services);
        let summary = dispatcher.await.expect("dispatcher task panicked");
        (summary, transport.sent())
    }
}
