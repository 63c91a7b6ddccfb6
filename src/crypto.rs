//! Handshake crypto
//!
//! The client registers a 1024-bit RSA public key; the server answers with a
//! freshly generated AES-256 key encrypted under RSA-OAEP (SHA-1). File
//! contents arrive encrypted with AES-256-CBC, zero IV, PKCS#7 padding.
//!
//! The session layer only stores key material. Everything that touches a
//! cipher goes through [`CryptoProvider`].

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Modulus size the client generates
pub const RSA_KEY_BITS: usize = 1024;

/// AES-256 key length
pub const AES_KEY_LEN: usize = 32;

const AES_BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid RSA public key: {0}")]
    InvalidPublicKey(String),

    #[error("Unsupported RSA key size: {0} bits (expected 1024)")]
    UnsupportedKeySize(usize),

    #[error("Invalid AES key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("RSA encryption failed: {0}")]
    Encrypt(String),

    #[error("AES decryption failed: bad padding or truncated ciphertext")]
    Decrypt,
}

// ============================================================================
// Public Key
// ============================================================================

/// Parsed client public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
    fingerprint: String,
}

impl PublicKey {
    /// Import an X.509 SubjectPublicKeyInfo DER encoding
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

        let bits = inner.size() * 8;
        if bits != RSA_KEY_BITS {
            return Err(CryptoError::UnsupportedKeySize(bits));
        }

        Ok(Self {
            inner,
            fingerprint: hex::encode(Sha256::digest(der)),
        })
    }

    /// SHA-256 of the DER encoding, hex encoded
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn rsa(&self) -> &RsaPublicKey {
        &self.inner
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Cipher operations consumed by the dispatcher
pub trait CryptoProvider: Send + Sync {
    /// Fill a fresh buffer from the OS CSPRNG
    fn generate_random_bytes(&self, n: usize) -> Vec<u8>;

    /// Wrap key material for the client (RSA-OAEP)
    fn encrypt_for_transport(&self, data: &[u8], key: &PublicKey) -> Result<Vec<u8>, CryptoError>;

    /// Unwrap file contents sent by the client (AES-256-CBC)
    fn decrypt_from_transport(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// RustCrypto-backed provider matching the backup client's cipher suite
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaAesCrypto;

impl RsaAesCrypto {
    pub fn new() -> Self {
        Self
    }

    /// Client-side counterpart of [`CryptoProvider::decrypt_from_transport`]
    pub fn encrypt_contents(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = [0u8; AES_BLOCK_LEN];
        let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
    }
}

impl CryptoProvider for RsaAesCrypto {
    fn generate_random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        OsRng.fill_bytes(&mut buf);
        buf
    }

    fn encrypt_for_transport(&self, data: &[u8], key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        key.rsa()
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }

    fn decrypt_from_transport(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = [0u8; AES_BLOCK_LEN];
        let cipher = Aes256CbcDec::new_from_slices(key, &iv)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| CryptoError::Decrypt)
    }
}

// ============================================================================
// Test Keys
// ============================================================================

#[cfg(test)]
pub(crate) mod test_keys {
    use std::sync::OnceLock;

    use rand::rngs::OsRng;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{BigUint, RsaPrivateKey};

    /// 1024-bit key with e = 17; its SPKI encoding is exactly 160 bytes
    pub fn client_key() -> &'static (RsaPrivateKey, Vec<u8>) {
        static KEY: OnceLock<(RsaPrivateKey, Vec<u8>)> = OnceLock::new();
        KEY.get_or_init(|| generate(17))
    }

    /// 1024-bit key with e = 65537; encodes to 162 bytes
    pub fn oversized_key_der() -> &'static Vec<u8> {
        static KEY: OnceLock<Vec<u8>> = OnceLock::new();
        KEY.get_or_init(|| generate(65537).1)
    }

    fn generate(exponent: u32) -> (RsaPrivateKey, Vec<u8>) {
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, 1024, &BigUint::from(exponent))
            .expect("key generation");
        let der = private
            .to_public_key()
            .to_public_key_der()
            .expect("spki encoding")
            .as_bytes()
            .to_vec();
        (private, der)
    }
}
