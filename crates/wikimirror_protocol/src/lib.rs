//! # Wikimirror Protocol
//!
//! Change records, positions and checkpoints for wikimirror.
//!
//! This crate provides:
//! - `StreamKind`, `Position` and `Checkpoint` for resumable change streams
//! - `ListQuery` / `ListPage` for cursor-based pagination
//! - Raw wire records as delivered by the MediaWiki action API
//! - Typed records validated at the ingestion boundary
//! - `ChangeRecord`, the closed set of variants a change stream yields
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Ingestion
//!
//! Raw records are loosely typed: every field is optional and log-event
//! parameters are free-form JSON. Conversion into typed records happens
//! exactly once, through `TryFrom` or the `ChangeRecord` constructors.
//! A record that fails validation becomes `ChangeRecord::Unprocessable`
//! instead of being coerced into something plausible.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ingest;
mod log_action;
mod position;
mod raw;
mod record;
mod time;

pub use error::{ProtocolError, ProtocolResult};
pub use ingest::{ChangeRecord, Unprocessable};
pub use log_action::LogAction;
pub use position::{Checkpoint, ListPage, ListQuery, Position, StreamKind};
pub use raw::{
    RawLogEvent, RawNamespace, RawPage, RawProtection, RawRecentChange, RawRevision,
    RawRevisionContent, RawSiteTotals, RawSlot, RawTagDefinition,
};
pub use record::{
    LogEvent, Namespace, PageChange, PageInfo, RemotePage, Restriction, RestrictionChange,
    RestrictionScope, Revision, RevisionContent, SiteTotals, TagChange, TagDefinition, TagTarget,
    TitleProtection, Visibility,
};
pub use time::{format_timestamp, parse_expiry, parse_timestamp};
