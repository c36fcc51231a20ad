//! Key vault: operator secret → master key, data key wrapping

use custody_core::config::VaultConfig;
use custody_core::{CustodyError, CustodyResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::cipher::{cbc_decrypt, cbc_encrypt, DataKey, Iv};
use crate::{BLOCK_SIZE, KEY_SIZE};

/// A 256-bit master key derived from the operator secret.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the master key as SHA-256 of the operator secret.
///
/// Deterministic: existing wrapped keys stay readable as long as the secret is unchanged.
pub fn derive_master_key(secret: &[u8]) -> MasterKey {
    let digest = Sha256::digest(secret);
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest);
    MasterKey::from_bytes(bytes)
}

/// Wrap (encrypt) a data key under the master key.
///
/// Output: 48 bytes (32-byte key + one PKCS#7 padding block).
pub fn wrap_key(data_key: &DataKey, master: &MasterKey, iv: &Iv) -> Vec<u8> {
    cbc_encrypt(master.as_bytes(), iv, data_key.as_bytes())
}

/// Unwrap (decrypt) a data key produced by `wrap_key`.
pub fn unwrap_key(wrapped: &[u8], master: &MasterKey, iv: &Iv) -> CustodyResult<DataKey> {
    if wrapped.is_empty() || wrapped.len() % BLOCK_SIZE != 0 {
        return Err(CustodyError::Crypto(format!(
            "wrapped key length {} is invalid for a {BLOCK_SIZE}-byte block cipher",
            wrapped.len()
        )));
    }

    let mut plaintext = cbc_decrypt(master.as_bytes(), iv, wrapped).map_err(|_| {
        CustodyError::Crypto(
            "key unwrapping failed: invalid master key, IV or corrupted data".into(),
        )
    })?;

    if plaintext.len() != KEY_SIZE {
        let len = plaintext.len();
        plaintext.zeroize();
        return Err(CustodyError::Crypto(format!(
            "unwrapped key has wrong size: {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(DataKey::from_bytes(key_bytes))
}

/// Holds the master key; wraps and unwraps hex-encoded data keys.
#[derive(Clone, Debug)]
pub struct Vault {
    master: MasterKey,
}

impl Vault {
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    pub fn from_secret(secret: &SecretString) -> Self {
        Self::new(derive_master_key(secret.expose_secret().as_bytes()))
    }

    /// Load the operator secret from `secret_file`, or else from `secret_env`.
    pub fn from_config(cfg: &VaultConfig) -> CustodyResult<Self> {
        let secret = load_secret(cfg)?;
        Ok(Self::from_secret(&secret))
    }

    pub fn wrap_hex(&self, data_key: &DataKey, iv: &Iv) -> String {
        hex::encode(wrap_key(data_key, &self.master, iv))
    }

    pub fn unwrap_hex(&self, wrapped_hex: &str, iv: &Iv) -> CustodyResult<DataKey> {
        let wrapped = hex::decode(wrapped_hex.trim())
            .map_err(|e| CustodyError::Crypto(format!("wrapped key is not valid hex: {e}")))?;
        unwrap_key(&wrapped, &self.master, iv)
    }
}

fn load_secret(cfg: &VaultConfig) -> CustodyResult<SecretString> {
    let raw = if let Some(path) = &cfg.secret_file {
        std::fs::read_to_string(path).map_err(|e| {
            CustodyError::Config(format!("reading vault secret {}: {e}", path.display()))
        })?
    } else {
        std::env::var(&cfg.secret_env).map_err(|_| {
            CustodyError::Config(format!(
                "vault secret not set: export {} or set vault.secret_file",
                cfg.secret_env
            ))
        })?
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CustodyError::Config("vault secret is empty".into()));
    }
    tracing::debug!("vault secret loaded");
    Ok(SecretString::from(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{generate_data_key, generate_iv};
    use proptest::prelude::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_derivation_deterministic() {
        let k1 = derive_master_key(b"operator-secret");
        let k2 = derive_master_key(b"operator-secret");
        let k3 = derive_master_key(b"other-secret");
        assert_eq!(k1.as_bytes(), k2.as_bytes(), "derivation must be deterministic");
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_derivation_is_sha256() {
        let key = derive_master_key(b"abc");
        assert_eq!(
            hex::encode(key.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_wrapped_key_size() {
        let wrapped = wrap_key(&generate_data_key(), &test_master_key(), &generate_iv());
        assert_eq!(wrapped.len(), KEY_SIZE + BLOCK_SIZE);
    }

    #[test]
    fn test_unwrap_wrong_master() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let data_key = generate_data_key();
        let iv = generate_iv();

        let wrapped = wrap_key(&data_key, &master1, &iv);
        match unwrap_key(&wrapped, &master2, &iv) {
            Err(CustodyError::Crypto(_)) => {}
            Ok(k) => assert_ne!(k.as_bytes(), data_key.as_bytes()),
            Err(e) => panic!("unexpected error kind: {e}"),
        }
    }

    #[test]
    fn test_unwrap_rejects_bad_length() {
        let iv = generate_iv();
        let err = unwrap_key(&[0u8; 47], &test_master_key(), &iv).unwrap_err();
        assert!(err.to_string().contains("invalid for a 16-byte block cipher"));
        assert!(unwrap_key(&[], &test_master_key(), &iv).is_err());
    }

    #[test]
    fn test_unwrap_rejects_short_plaintext() {
        // A valid single-block ciphertext decrypts to < 32 bytes
        let master = test_master_key();
        let iv = generate_iv();
        let short = cbc_encrypt(master.as_bytes(), &iv, b"tiny");
        let err = unwrap_key(&short, &master, &iv).unwrap_err();
        assert!(err.to_string().contains("wrong size"));
    }

    #[test]
    fn test_vault_hex_roundtrip() {
        let vault = Vault::from_secret(&SecretString::from("station secret"));
        let data_key = generate_data_key();
        let iv = generate_iv();

        let wrapped = vault.wrap_hex(&data_key, &iv);
        assert_eq!(wrapped.len(), 96);
        let back = vault.unwrap_hex(&wrapped, &iv).unwrap();
        assert_eq!(back.as_bytes(), data_key.as_bytes());
        assert!(matches!(vault.unwrap_hex("zz", &iv), Err(CustodyError::Crypto(_))));
    }

    #[test]
    fn test_load_secret_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "  file-secret\n").unwrap();

        let cfg = VaultConfig {
            secret_env: "CUSTODY_TEST_UNUSED_SECRET".into(),
            secret_file: Some(path),
        };
        let from_file = Vault::from_config(&cfg).unwrap();
        let direct = Vault::from_secret(&SecretString::from("file-secret"));

        let iv = generate_iv();
        let key = generate_data_key();
        let wrapped = from_file.wrap_hex(&key, &iv);
        assert_eq!(direct.unwrap_hex(&wrapped, &iv).unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_missing_env_secret() {
        let cfg = VaultConfig {
            secret_env: "CUSTODY_TEST_SECRET_THAT_IS_NEVER_SET".into(),
            secret_file: None,
        };
        assert!(matches!(Vault::from_config(&cfg), Err(CustodyError::Config(_))));
    }

    proptest! {
        #[test]
        fn wrap_unwrap_roundtrip(key_bytes in any::<[u8; 32]>(), iv_bytes in any::<[u8; 16]>()) {
            let master = test_master_key();
            let data_key = DataKey::from_bytes(key_bytes);
            let iv = Iv::from_bytes(iv_bytes);
            let wrapped = wrap_key(&data_key, &master, &iv);
            let back = unwrap_key(&wrapped, &master, &iv).unwrap();
            prop_assert_eq!(back.as_bytes(), data_key.as_bytes());
        }
    }
}
