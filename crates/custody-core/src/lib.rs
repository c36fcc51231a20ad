pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use error::{CustodyError, CustodyResult};
pub use policy::MediaPolicy;
pub use types::{EvidenceRecord, EvidenceType, LedgerEntry};
