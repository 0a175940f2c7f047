//! # docsession testkit
//!
//! Test utilities for docsession.
//!
//! This crate provides:
//! - sample entity types and session helpers
//! - a recording transaction coordinator
//! - property-based generators for documents and entities
//!
//! ## Usage
//!
//! ```rust
//! use docsession_testkit::prelude::*;
//!
//! let (backend, mut session) = memory_session();
//! let item = Tracked::new(Item::new("lamp", 3));
//! session.store(&item).unwrap();
//! session.save_changes().unwrap();
//! assert!(backend.contains("items/1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use docsession_core::Tracked;
}

pub use fixtures::*;
pub use generators::*;
