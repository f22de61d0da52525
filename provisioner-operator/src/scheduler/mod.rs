//! Scheduler layer for the operator
//!
//! The job driver claims jobs from the store and runs them through the
//! worker registry. The notifier lets the job controller wake idle claim
//! loops as soon as a job appears instead of waiting for the next poll.

pub mod driver;
pub mod notify;

pub use driver::JobDriver;
pub use notify::JobNotifier;
