//! Booking lifecycle engine for a local-services marketplace.
//!
//! This crate models a service request as a typestate machine: each status is
//! its own type, transitions consume the old state and return the new one, and
//! every transition also returns the side effects it implies (counter moves,
//! bans, notifications) as plain data. A [`manager::BookingManager`] drives the
//! machine against pluggable storage with optimistic concurrency and applies
//! the side effects after the commit.
//!
//! Cancellation penalties are computed from pure calendar math in
//! [`domain::penalty`]: how close the cancellation is to the service date sets
//! the ban length, and lifetime cancellation counts layer warnings and
//! threshold bans on top.

pub mod domain;
pub mod error;
pub mod manager;

// Re-export commonly used types
pub use domain::account::{Actor, Party, UserAccount, UserId};
pub use domain::penalty::{CancellationType, PenaltyAssessment, ThresholdVerdict};
pub use domain::request::events::*;
pub use domain::request::state::*;
pub use error::{KarigarError, Result};
pub use manager::memory::{MemoryStore, RecordingNotifier};
pub use manager::{
    BookingConfig, BookingManager, NewRequest, Notifier, RequestStore, ReviewInput,
    TransitionReceipt, UserCounterStore,
};
