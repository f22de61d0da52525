//! Core domain types
//!
//! The declarative resources the operator watches and mutates. Every resource
//! carries an [`ObjectMeta`] whose `resource_version` is the optimistic
//! concurrency token used by conditional updates.

pub mod connection;
pub mod history;
pub mod job;
pub mod meta;
pub mod patch;
pub mod repository;
pub mod resource;

pub use meta::{ObjectMeta, Resource};
