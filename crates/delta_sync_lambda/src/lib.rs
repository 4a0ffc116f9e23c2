//! AWS-oriented adapters, configuration and handlers for delta-sync jobs.
//!
//! This crate owns runtime integration details (S3 listing and audit storage,
//! Lambda/SQS invocation, process logging) and wires them into the pure
//! primitives from `delta_sync_core`.

pub mod adapters;
pub mod clients;
pub mod config;
pub mod handlers;
pub mod logging;
