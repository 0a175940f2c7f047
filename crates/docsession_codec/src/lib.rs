//! # docsession codec
//!
//! Document model and entity codec for docsession.
//!
//! This crate provides:
//! - [`Value`] and [`Document`], the JSON-like representation the store
//!   understands
//! - [`diff`], an exact structural comparison between two documents
//! - the [`Entity`] trait that application types implement to be tracked
//! - serde helpers ([`to_document`], [`from_document`]) so most entity
//!   types implement the codec in two lines
//! - deterministic CBOR encoding of documents
//!
//! ## Usage
//!
//! ```
//! use docsession_codec::{diff, Document};
//!
//! let original = Document::new().with("name", "Alice").with("age", 30);
//! let current = Document::new().with("name", "Alice").with("age", 31);
//!
//! let changes = diff(&original, &current);
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].path, "age");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod diff;
mod entity;
mod error;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use diff::{diff, ChangeKind, DocumentChange};
pub use entity::{from_document, to_document, Entity};
pub use error::{CodecError, CodecResult};
pub use value::{Document, Value};
