//! Provisioner Core
//!
//! Core types shared by the provisioning operator, the resource API client
//! and the CLI.
//!
//! This crate contains:
//! - Domain types: Job, HistoricJob, Repository, Connection and the lease
//!   embedded in job status
//! - Status patch operations used by controllers
//! - DTOs: request shapes used by external actors to create jobs

pub mod domain;
pub mod dto;
