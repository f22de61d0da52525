//! Data Transfer Objects
//!
//! Request shapes used by external actors (the CLI, other services) when
//! talking to the resource API.

pub mod job;
