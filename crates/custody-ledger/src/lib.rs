//! custody-ledger: the externally trusted integrity anchor
//!
//! `Ledger` is the narrow client interface the pipelines consume.
//! `ChainLedger` is the bundled implementation: an append-only event log in
//! which every event commits to its predecessor with SHA-256, persisted one
//! object per event through OpenDAL.

pub mod chain;
pub mod client;

pub use chain::{verify_stored, ChainLedger, ChainReport};
pub use client::{Confirmation, Ledger, Submission};
