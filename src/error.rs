//! Error types for the booking engine.

use thiserror::Error;

use crate::domain::account::UserId;
use crate::domain::request::events::EventKind;
use crate::domain::request::state::{RequestId, RequestStatus};

/// Result type alias using the karigar error type.
pub type Result<T> = std::result::Result<T, KarigarError>;

/// Main error type for the booking engine.
#[derive(Error, Debug)]
pub enum KarigarError {
    /// Request not found
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// The event is not legal from the request's current status
    #[error("Invalid transition: request {id} cannot {event} from status '{status}'")]
    InvalidTransition {
        id: RequestId,
        event: EventKind,
        status: RequestStatus,
    },

    /// The event is legal but this actor may not perform it
    #[error("Wrong actor: {actor} may not {event} request {id}")]
    WrongActor {
        id: RequestId,
        event: String,
        actor: String,
    },

    /// The stored status changed between read and commit
    #[error("Concurrent modification: request {0} changed underneath the transition")]
    ConcurrentModification(RequestId),

    /// Validation error (e.g., empty description, rating out of range)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The request is not in a reviewable state
    #[error("Review not available: request {id} is in status '{status}'")]
    ReviewNotAvailable { id: RequestId, status: RequestStatus },

    /// A review has already been filed for this request
    #[error("Review already filed for request {0}")]
    ReviewAlreadyFiled(RequestId),

    /// The user is banned from creating requests
    #[error("User {user} is banned until {until}")]
    UserBanned {
        user: UserId,
        until: chrono::DateTime<chrono::Utc>,
    },

    /// The user already holds the maximum number of active requests
    #[error("User {user} has {count} active requests (limit {limit})")]
    ActiveLimitExceeded { user: UserId, count: u32, limit: u32 },

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
