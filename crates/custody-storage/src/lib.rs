//! custody-storage: content-addressed ciphertext store over OpenDAL
//!
//! - `operator`: OpenDAL operator factory (fs, S3-compatible, memory)
//! - `store`: `ContentStore` trait and the operator-backed client
//! - `health`: reachability check used by the daemon's readiness check

pub mod health;
pub mod operator;
pub mod store;

pub use health::check_health;
pub use operator::{build_operator, memory_operator, OperatorSpec};
pub use store::{content_id, map_opendal_error, ContentStore, OperatorStore};
