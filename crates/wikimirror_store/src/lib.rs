//! # Wikimirror Store
//!
//! The local relational mirror of a remote wiki.
//!
//! This crate provides:
//! - The mirror schema (pages, revisions, log events, tags, restrictions,
//!   protected titles, namespaces, revision text, checkpoints) in a single
//!   SQLite database
//! - Key-based upserts reporting `Inserted`, `Updated` or `Unchanged`
//! - Row-level structural transitions used by the reconciler
//! - `CheckpointStore`, the per-stream resume state
//! - A read-only query API and aggregates for downstream consumers
//!
//! ## Invariants
//!
//! - Rows are keyed by the remote's stable identifiers, never by titles.
//! - A title is held by at most one live page at a time. Writes that would
//!   break this fail with `StoreError::TitleOccupied`.
//! - Nothing is written when a record is already mirrored, so re-applying
//!   a batch leaves the database byte-for-byte identical.
//! - Page and revision rows are never removed; deletion sets flags and
//!   merges leave a forwarding pointer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod dir;
mod dump;
mod error;
mod logevents;
mod mirror;
mod pages;
mod restrictions;
mod revisions;
mod rows;
mod schema;
mod site;
mod stats;
mod tags;
mod titles;

pub use checkpoint::CheckpointStore;
pub use config::MirrorConfig;
pub use dir::MirrorDir;
pub use error::{StoreError, StoreResult};
pub use mirror::Mirror;
pub use pages::{MergeOutcome, Tombstone};
pub use revisions::ContentScope;
pub use rows::{ApplyOutcome, LogEventRow, PageRow, PageState};
pub use schema::SCHEMA_VERSION;
pub use stats::MirrorStats;
