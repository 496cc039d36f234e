//! # Wikimirror Sync
//!
//! Incremental sync engine mirroring a MediaWiki site into a local
//! `wikimirror_store` mirror.
//!
//! This crate provides:
//! - Sync state machine (idle → pulling → verifying → synced)
//! - Resumable change-stream readers with per-stream checkpoints
//! - Structural reconciliation of moves, deletions, restorations and
//!   history merges
//! - Retry with exponential backoff
//! - A consistency verifier reporting drift against remote totals
//! - The `RemoteWiki` abstraction and its action API implementation
//!
//! ## Architecture
//!
//! A pass pulls five independent streams (changed pages, revisions, log
//! events, tag updates, protection changes), each from its own
//! checkpoint. Streams run concurrently; each applies its batches in
//! order and commits its checkpoint only after the batch's writes have
//! been committed.
//!
//! ## Key Invariants
//!
//! - The remote is authoritative
//! - Rows are keyed by stable remote ids, never by titles
//! - Every write is idempotent, so replaying a batch is harmless
//! - A checkpoint never moves past a record that was not applied
//! - Only storage failures abort a pass; everything else stops one stream

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod config;
mod content;
mod error;
mod http;
mod reader;
mod reconciler;
mod site;
mod state;
mod transport;
mod verifier;

pub use applier::{BatchOutcome, OutcomeCounts, StreamApplier};
pub use config::{ContentMode, RetryConfig, SyncConfig};
pub use content::{sync_content, ContentReport, CONTENT_BATCH};
pub use error::{SyncError, SyncResult};
pub use http::{ApiTransport, HttpClient, Params};
pub use reader::{Batch, StreamReader};
pub use reconciler::Reconciler;
pub use site::refresh_site_metadata;
pub use state::{PassReport, StreamReport, SyncEngine, SyncState, SyncStats};
pub use transport::{MockRemote, MockResponse, RemoteWiki};
pub use verifier::{Drift, DriftReport, Verifier};
