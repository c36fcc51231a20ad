//! custody-pipeline: the evidence custody workflows
//!
//! - [`Custody::upload`]: policy check, envelope encryption, store, metadata, ledger
//! - [`Custody::retrieve`]: decrypt and verify against the ledger's fingerprint
//! - [`Custody::reconcile`]: verify every metadata row, classifying each outcome
//!
//! Collaborators are injected as trait objects ([`ContentStore`], [`Ledger`],
//! [`MetadataRepository`]) so tests can substitute fakes.
//!
//! [`ContentStore`]: custody_storage::ContentStore
//! [`Ledger`]: custody_ledger::Ledger

pub mod deadline;
pub mod filename;
pub mod reconcile;
pub mod repository;
pub mod retrieve;
pub mod service;
pub mod upload;

mod verify;

pub use deadline::Timeouts;
pub use filename::{content_disposition, fallback_filename, sanitize_filename, FilenameCache};
pub use reconcile::{ReconcileReport, ReconcileSummary, RecordDetail, RecordStatus};
pub use repository::{JsonRepository, MetadataRepository, RepositoryRow};
pub use retrieve::RetrievedEvidence;
pub use service::Custody;
pub use upload::{UploadReceipt, UploadRequest};
