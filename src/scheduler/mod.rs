//! Interface to the external cluster scheduler.
//!
//! The scheduler itself is a collaborator: watchers talk to it only through
//! [`SchedulerClient`]. [`InMemoryScheduler`] implements the trait without a
//! cluster for dry runs and tests.

pub mod client;
pub mod memory;
pub mod status;

pub use client::SchedulerClient;
pub use memory::InMemoryScheduler;
pub use status::{
    ClusterId, HistoryRow, HoldReason, JobAction, JobEvent, JobState, StatusRow, STATUS_FIELDS,
};
