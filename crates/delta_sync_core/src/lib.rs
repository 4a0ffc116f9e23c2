//! Incremental delta-sync primitives.
//!
//! This crate owns the deterministic parts of object-store ingestion: listing,
//! canonical key matching, delta computation, batch dispatch, the convergence
//! loop and the paged HTTP fetcher. It intentionally excludes AWS SDK and
//! Lambda runtime concerns, which live in `delta_sync_lambda`.

pub mod contract;
pub mod convergence;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod job;
pub mod keys;
pub mod listing;
pub mod redact;
pub mod relocate;
pub mod sleep;
pub mod storage_keys;
