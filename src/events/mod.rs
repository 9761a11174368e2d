use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::Location;

/// Side-effect work emitted by a successful session transition.
///
/// Events carry identifiers only; whoever handles them re-reads the current
/// state of the session, its users and its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpnameEvent {
    SessionSubmitted {
        session_id: i64,
        submitted_by: i64,
    },
    SessionEscalated {
        session_id: i64,
        manager_id: i64,
    },
    SessionVerified {
        session_id: i64,
        reviewer_id: i64,
    },
    SessionRejected {
        session_id: i64,
        reviewer_id: i64,
    },
    /// The session row is gone by the time this is handled, so the event
    /// carries what the notice needs.
    SessionCancelled {
        session_id: i64,
        initiator_id: i64,
        cancelled_by: i64,
        location: Location,
    },
}

impl OpnameEvent {
    pub fn session_id(&self) -> i64 {
        match self {
            OpnameEvent::SessionSubmitted { session_id, .. }
            | OpnameEvent::SessionEscalated { session_id, .. }
            | OpnameEvent::SessionVerified { session_id, .. }
            | OpnameEvent::SessionRejected { session_id, .. }
            | OpnameEvent::SessionCancelled { session_id, .. } => *session_id,
        }
    }

    pub fn actor_id(&self) -> i64 {
        match self {
            OpnameEvent::SessionSubmitted { submitted_by, .. } => *submitted_by,
            OpnameEvent::SessionEscalated { manager_id, .. } => *manager_id,
            OpnameEvent::SessionVerified { reviewer_id, .. }
            | OpnameEvent::SessionRejected { reviewer_id, .. } => *reviewer_id,
            OpnameEvent::SessionCancelled { cancelled_by, .. } => *cancelled_by,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OpnameEvent::SessionSubmitted { .. } => "submitted",
            OpnameEvent::SessionEscalated { .. } => "escalated",
            OpnameEvent::SessionVerified { .. } => "verified",
            OpnameEvent::SessionRejected { .. } => "rejected",
            OpnameEvent::SessionCancelled { .. } => "cancelled",
        }
    }
}

impl fmt::Display for OpnameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} {} by user {}",
            self.session_id(),
            self.kind(),
            self.actor_id()
        )
    }
}

/// One unit of work for the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    /// Correlates the dispatcher's log lines for one job.
    pub id: Uuid,
    pub event: OpnameEvent,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn new(event: OpnameEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            enqueued_at: Utc::now(),
        }
    }
}

/// Producer side of the notification queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<NotificationJob>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<NotificationJob>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting. A full or closed queue drops the job
    /// with an error log; the caller's transition has already committed.
    pub fn enqueue(&self, event: OpnameEvent) -> bool {
        match self.sender.try_send(NotificationJob::new(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                error!(job_id = %job.id, event = %job.event, "Notification queue full; dropping job");
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(event = %job.event, "Notification queue closed; dropping job");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Creates the bounded notification queue.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<NotificationJob>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    debug!(capacity, "Created notification queue");
    (EventSender::new(tx), rx)
}
