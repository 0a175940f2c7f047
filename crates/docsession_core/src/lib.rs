//! # docsession core
//!
//! Client-side unit of work for a remote document store.
//!
//! This crate provides:
//! - [`DocumentSession`], an identity map with snapshot-based change
//!   detection that flushes all pending work as one atomic batch
//! - the [`DocumentBackend`] trait a store connection implements, plus
//!   [`InMemoryBackend`] for tests and embedding
//! - etag-based optimistic concurrency, opt-in through [`SessionConfig`]
//! - enlistment in distributed transactions through
//!   [`TransactionCoordinator`]
//!
//! ## Usage
//!
//! ```rust
//! use docsession_codec::{from_document, to_document, CodecResult, Document, Entity};
//! use docsession_core::{DocumentSession, InMemoryBackend, Tracked};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Note {
//!     id: Option<String>,
//!     text: String,
//! }
//!
//! impl Entity for Note {
//!     const TYPE_TAG: &'static str = "Note";
//!
//!     fn identity(&self) -> Option<String> {
//!         self.id.clone()
//!     }
//!
//!     fn set_identity(&mut self, key: &str) {
//!         self.id = Some(key.to_string());
//!     }
//!
//!     fn to_document(&self) -> CodecResult<Document> {
//!         to_document(self)
//!     }
//!
//!     fn from_document(document: Document) -> CodecResult<Self> {
//!         from_document(document)
//!     }
//! }
//!
//! let backend = Arc::new(InMemoryBackend::new());
//! let mut session = DocumentSession::new(Arc::clone(&backend));
//!
//! let note = Tracked::new(Note { id: None, text: "hello".into() });
//! session.store(&note).unwrap();
//! session.save_changes().unwrap();
//! assert_eq!(note.read().id.as_deref(), Some("notes/1"));
//!
//! let again = session.load::<Note>("notes/1").unwrap().unwrap();
//! assert!(again.ptr_eq(&note));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod session;
mod transaction;
mod types;

pub use backend::{
    BackendOperation, BackendStats, BatchCommand, BatchResult, CommandMethod, DocumentBackend,
    FetchedDocument, InMemoryBackend,
};
pub use config::SessionConfig;
pub use error::{BackendError, BackendResult, SessionError, SessionResult};
pub use session::{DocumentSession, EntityMetadata, SaveSummary, StoredEntity, StoredListener, Tracked};
pub use transaction::{
    EnlistmentState, SessionEnlistment, TransactionContext, TransactionCoordinator,
    TransactionParticipant,
};
pub use types::{Etag, TransactionId, ENTITY_TYPE_METADATA_FIELD, ETAG_METADATA_FIELD};
