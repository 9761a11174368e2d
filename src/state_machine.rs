//! Opname session life cycle.
//!
//! ```text
//!             finish            approve (mgr)          approve (L1)
//!   Active ---------> Submitted -------------> Escalated ------------> Verified
//!     |                 |   |                      |
//!     |      cancel     |   |  reject (mgr / L1)   | reject (L1)
//!     +-----------------+   +----------+-----------+
//!             |                        v
//!         Cancelled                 Rejected
//! ```
//!
//! [`apply`] is pure: it decides the transition from the current facts and a
//! role-tagged command. Persisting the result is the caller's job.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;
use crate::errors::ServiceError;
use crate::models::SessionStatus;

/// Which review slot a transition stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewTier {
    Manager,
    L1,
}

/// What [`apply`] needs to know about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFacts {
    pub status: SessionStatus,
    pub initiator_id: i64,
}

/// A request to move a session, with the actor's role already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Finish { by: i64 },
    Approve { reviewer: i64, role: Role },
    Reject { reviewer: i64, role: Role },
    Cancel { by: i64, role: Role },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Finish { .. } => "finish",
            SessionCommand::Approve { .. } => "approve",
            SessionCommand::Reject { .. } => "reject",
            SessionCommand::Cancel { .. } => "cancel",
        }
    }

    pub fn actor(&self) -> i64 {
        match self {
            SessionCommand::Finish { by } | SessionCommand::Cancel { by, .. } => *by,
            SessionCommand::Approve { reviewer, .. } | SessionCommand::Reject { reviewer, .. } => {
                *reviewer
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// L1 Support may verify straight from Submitted.
    pub allow_l1_without_manager: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewStamp {
    pub tier: ReviewTier,
    pub reviewer_id: i64,
}

/// Outcome of a successful [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    /// Set for approve/reject; which reviewer slot to fill.
    pub review: Option<ReviewStamp>,
    /// Set for finish; the session's end time is stamped.
    pub stamps_end: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejected {
    #[error("{0}")]
    Forbidden(String),

    #[error("cannot {command} a session that is {from}")]
    InvalidStatus {
        command: &'static str,
        from: SessionStatus,
    },
}

impl From<TransitionRejected> for ServiceError {
    fn from(err: TransitionRejected) -> Self {
        match err {
            TransitionRejected::Forbidden(msg) => ServiceError::Forbidden(msg),
            other @ TransitionRejected::InvalidStatus { .. } => {
                ServiceError::InvalidStatus(other.to_string())
            }
        }
    }
}

/// Decides the transition `command` causes on a session described by `facts`.
pub fn apply(
    facts: &SessionFacts,
    command: &SessionCommand,
    policy: &TransitionPolicy,
) -> Result<Transition, TransitionRejected> {
    use SessionStatus::*;

    let from = facts.status;
    let invalid = || TransitionRejected::InvalidStatus {
        command: command.name(),
        from,
    };
    let moved = |to, review| Transition {
        from,
        to,
        review,
        stamps_end: false,
    };

    match *command {
        SessionCommand::Finish { .. } => match from {
            Active => Ok(Transition {
                stamps_end: true,
                ..moved(Submitted, None)
            }),
            _ => Err(invalid()),
        },

        SessionCommand::Approve { reviewer, role } => {
            let (to, tier) = match (role, from) {
                (Role::AreaManager, Submitted) => (Escalated, ReviewTier::Manager),
                (Role::L1Support, Escalated) => (Verified, ReviewTier::L1),
                (Role::L1Support, Submitted) if policy.allow_l1_without_manager => {
                    (Verified, ReviewTier::L1)
                }
                (Role::Staff, _) => return Err(not_a_reviewer("approve")),
                _ => return Err(invalid()),
            };
            Ok(moved(
                to,
                Some(ReviewStamp {
                    tier,
                    reviewer_id: reviewer,
                }),
            ))
        }

        SessionCommand::Reject { reviewer, role } => {
            let tier = match (role, from) {
                (Role::AreaManager, Submitted) => ReviewTier::Manager,
                (Role::L1Support, Submitted | Escalated) => ReviewTier::L1,
                (Role::Staff, _) => return Err(not_a_reviewer("reject")),
                _ => return Err(invalid()),
            };
            Ok(moved(
                Rejected,
                Some(ReviewStamp {
                    tier,
                    reviewer_id: reviewer,
                }),
            ))
        }

        SessionCommand::Cancel { by, role } => {
            if by != facts.initiator_id && role != Role::L1Support {
                return Err(TransitionRejected::Forbidden(
                    "only the initiator or L1 Support can cancel an opname session".to_string(),
                ));
            }
            match from {
                Active | Submitted => Ok(moved(Cancelled, None)),
                _ => Err(invalid()),
            }
        }
    }
}

fn not_a_reviewer(action: &str) -> TransitionRejected {
    TransitionRejected::Forbidden(format!(
        "only an Area Manager or L1 Support can {action} an opname session"
    ))
}
