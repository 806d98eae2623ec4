//! Message body encryption for relayed conversations.
//!
//! Kahla clients encrypt message bodies with CryptoJS' passphrase mode, so the
//! default cipher reproduces that envelope: base64 of `"Salted__" || salt ||
//! AES-256-CBC(PKCS#7)` with key and IV derived by OpenSSL's EVP_BytesToKey
//! (MD5, one round).

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALTED_MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("ciphertext is missing the salted header")]
    MissingSaltHeader,
    #[error("invalid derived key or iv length")]
    InvalidKeyLength,
    #[error("ciphertext could not be decrypted with the given key")]
    Decrypt,
    #[error("decrypted message is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub trait MessageCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, key: &str) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str, key: &str) -> Result<String, CipherError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CryptoJsAes;

impl CryptoJsAes {
    fn encrypt_with_salt(
        plaintext: &str,
        key: &str,
        salt: [u8; SALT_LEN],
    ) -> Result<String, CipherError> {
        let (derived_key, iv) = derive_key_and_iv(key.as_bytes(), &salt);
        let ciphertext = Aes256CbcEnc::new_from_slices(&derived_key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut envelope = Vec::with_capacity(SALTED_MAGIC.len() + SALT_LEN + ciphertext.len());
        envelope.extend_from_slice(SALTED_MAGIC);
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }
}

impl MessageCipher for CryptoJsAes {
    fn encrypt(&self, plaintext: &str, key: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::encrypt_with_salt(plaintext, key, salt)
    }

    fn decrypt(&self, ciphertext: &str, key: &str) -> Result<String, CipherError> {
        let envelope = STANDARD.decode(ciphertext.trim())?;
        let header_len = SALTED_MAGIC.len() + SALT_LEN;
        if envelope.len() < header_len || &envelope[..SALTED_MAGIC.len()] != SALTED_MAGIC {
            return Err(CipherError::MissingSaltHeader);
        }
        let salt = &envelope[SALTED_MAGIC.len()..header_len];
        let (derived_key, iv) = derive_key_and_iv(key.as_bytes(), salt);
        let plaintext = Aes256CbcDec::new_from_slices(&derived_key, &iv)
            .map_err(|_| CipherError::InvalidKeyLength)?
            .decrypt_padded_vec_mut::<Pkcs7>(&envelope[header_len..])
            .map_err(|_| CipherError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

fn derive_key_and_iv(passphrase: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut previous: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(passphrase);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        derived.extend_from_slice(&previous);
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}
