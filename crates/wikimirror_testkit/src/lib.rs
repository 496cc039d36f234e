//! # Wikimirror Testkit
//!
//! Test utilities for the wiki mirror.
//!
//! This crate provides:
//! - `FakeWiki`, a simulated remote wiki with a deterministic clock
//! - Test fixtures and mirror helpers
//! - Snapshot comparison of mirror state
//! - Property-based history generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wikimirror_testkit::prelude::*;
//!
//! #[test]
//! fn rename_is_mirrored() {
//!     let wiki = Arc::new(FakeWiki::new());
//!     let page = wiki.create_page("Old", "text");
//!     let mirror = TestMirror::memory();
//!     mirror.sync(&wiki);
//!     wiki.move_page(page, "New", false);
//!     mirror.sync(&wiki);
//!     assert_eq!(mirror.page(page).unwrap().unwrap().title, "New");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;
pub mod wiki;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::wiki::*;
    pub use std::sync::Arc;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::HISTORY_LIMIT;
pub use wiki::*;
