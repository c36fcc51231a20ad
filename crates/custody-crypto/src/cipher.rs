//! Cipher engine: AES-256-CBC with PKCS#7 padding
//!
//! Ciphertext format: raw CBC output, a non-empty multiple of 16 bytes. The IV
//! is not prepended; it is stored (hex) in the evidence record.
//!
//! CBC is unauthenticated. Tampering is caught by the plaintext fingerprint
//! check at retrieval, not here: a padding failure only signals wrong key, IV,
//! or corrupted bytes.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use custody_core::{CustodyError, CustodyResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A per-file 256-bit data key. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 128-bit CBC initialization vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> CustodyResult<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|e| CustodyError::Crypto(format!("IV is not valid hex: {e}")))?;
        let bytes: [u8; IV_SIZE] = raw.try_into().map_err(|v: Vec<u8>| {
            CustodyError::Crypto(format!("IV is {} bytes (expected {IV_SIZE})", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

/// Generate a random 256-bit data key.
pub fn generate_data_key() -> DataKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    DataKey::from_bytes(bytes)
}

/// Generate a random 128-bit IV.
pub fn generate_iv() -> Iv {
    let mut bytes = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    Iv(bytes)
}

/// Encrypt file bytes under a data key.
pub fn encrypt(plaintext: &[u8], key: &DataKey, iv: &Iv) -> Vec<u8> {
    cbc_encrypt(key.as_bytes(), iv, plaintext)
}

/// Decrypt file bytes. Fails with `Crypto` on bad length or malformed padding.
pub fn decrypt(ciphertext: &[u8], key: &DataKey, iv: &Iv) -> CustodyResult<Vec<u8>> {
    cbc_decrypt(key.as_bytes(), iv, ciphertext)
}

pub(crate) fn cbc_encrypt(key: &[u8; KEY_SIZE], iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(&(*key).into(), &iv.0.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub(crate) fn cbc_decrypt(
    key: &[u8; KEY_SIZE],
    iv: &Iv,
    ciphertext: &[u8],
) -> CustodyResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CustodyError::Crypto(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }
    Aes256CbcDec::new(&(*key).into(), &iv.0.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| {
            CustodyError::Crypto(
                "decryption failed: malformed padding (wrong key, IV or corrupted data)".into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_data_key_generation() {
        let k1 = generate_data_key();
        let k2 = generate_data_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_iv_generation() {
        assert_ne!(generate_iv(), generate_iv());
    }

    #[test]
    fn test_ciphertext_is_padded() {
        let key = generate_data_key();
        let iv = generate_iv();

        assert_eq!(encrypt(b"", &key, &iv).len(), 16);
        assert_eq!(encrypt(b"0123456789", &key, &iv).len(), 16);
        // a full block gains a whole padding block
        assert_eq!(encrypt(&[7u8; 16], &key, &iv).len(), 32);
    }

    #[test]
    fn test_wrong_key_fails_or_differs() {
        let key = generate_data_key();
        let other = generate_data_key();
        let iv = generate_iv();
        let plaintext = b"chain of custody must be preserved";

        let ct = encrypt(plaintext, &key, &iv);
        match decrypt(&ct, &other, &iv) {
            Err(CustodyError::Crypto(_)) => {}
            Ok(pt) => assert_ne!(pt, plaintext),
            Err(e) => panic!("unexpected error kind: {e}"),
        }
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = generate_data_key();
        let iv = generate_iv();
        let ct = encrypt(b"some evidence bytes", &key, &iv);

        let err = decrypt(&ct[..ct.len() - 1], &key, &iv).unwrap_err();
        assert!(matches!(err, CustodyError::Crypto(_)));
        assert!(matches!(decrypt(&[], &key, &iv), Err(CustodyError::Crypto(_))));
    }

    #[test]
    fn test_iv_hex_roundtrip_and_length_check() {
        let iv = generate_iv();
        assert_eq!(Iv::from_hex(&iv.to_hex()).unwrap(), iv);
        assert!(Iv::from_hex("00ff").is_err());
        assert!(Iv::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = DataKey::from_bytes([9u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('9'));
    }

    proptest! {
        #[test]
        fn encrypt_decrypt_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let key = generate_data_key();
            let iv = generate_iv();
            let ct = encrypt(&data, &key, &iv);
            prop_assert_eq!(ct.len() % BLOCK_SIZE, 0);
            prop_assert_eq!(decrypt(&ct, &key, &iv).unwrap(), data);
        }
    }
}
