//! custody-crypto: envelope encryption for evidence files
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, SHA-256 of the operator secret)
//!   └── Data Key (per-file, 256-bit random, wrapped by the master key)
//!       └── File: AES-256-CBC + PKCS#7 (key=data_key, iv=random 128-bit)
//! ```
//!
//! The plaintext fingerprint (`sha256_hex`) is computed independently of the
//! encryption layer and is what the ledger anchors.

pub mod cipher;
pub mod digest;
pub mod vault;

pub use cipher::{decrypt, encrypt, generate_data_key, generate_iv, DataKey, Iv};
pub use digest::{digests_match, sha256_hex};
pub use vault::{derive_master_key, unwrap_key, wrap_key, MasterKey, Vault};

/// Size of master and data keys in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES block / CBC initialization vector
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;
