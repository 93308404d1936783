//! Request aggregate - domain model and state transitions.
//!
//! This module contains the core domain logic for service requests:
//! - Request types and states (typestate pattern)
//! - State transition methods and the event dispatcher
//! - Side-effect intents and notifications

pub mod events;
pub mod state;
pub mod transitions;

// Re-export commonly used types
pub use events::*;
pub use state::*;
