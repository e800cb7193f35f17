//! Fernet tokens: AES-128-CBC encryption authenticated with HMAC-SHA256.
//! A token is `0x80 || issued_at || iv || ciphertext || hmac`, URL-safe
//! base64 encoded, so values written by any Fernet implementation load here
//! and values produced here can sit inside an `ENC(...)` marker.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes::Aes128;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use super::marker::wrap_marker;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: u8 = 0x80;
const KEY_LEN: usize = 32;
/// The first half of the key signs, the second half encrypts.
const SIGNING_KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;
/// Version byte plus the big-endian issue timestamp.
const HEADER_LEN: usize = 1 + 8;
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Wrong key, tampered or truncated token, unknown version, or expired.
    #[error("invalid token")]
    InvalidToken,
    /// Input that is unusable before authentication is even attempted.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// 32 bytes of key material, textually URL-safe base64 encoded.
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Draws a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(key_bytes: &[u8]) -> Result<Self, CipherError> {
        if key_bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidValue(format!(
                "key must be {KEY_LEN} url-safe base64-encoded bytes"
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key_bytes);
        Ok(Self { bytes })
    }

    /// Parses the textual form produced by [`SecretKey::encode`].
    pub fn parse(text: &str) -> Result<Self, CipherError> {
        let mut decoded = URL_SAFE.decode(text.as_bytes()).map_err(|_| {
            CipherError::InvalidValue(format!("key must be {KEY_LEN} url-safe base64-encoded bytes"))
        })?;
        let key = Self::from_bytes(&decoded);
        decoded.zeroize();
        key
    }

    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    fn signing(&self) -> &[u8] {
        &self.bytes[..SIGNING_KEY_LEN]
    }

    fn encryption(&self) -> &[u8] {
        &self.bytes[SIGNING_KEY_LEN..]
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Encrypts and decrypts tokens under a single [`SecretKey`].
pub struct SecretCipher {
    key: SecretKey,
}

impl SecretCipher {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    pub fn from_text(key: &str) -> Result<Self, CipherError> {
        SecretKey::parse(key).map(Self::new)
    }

    /// Seals `plaintext` into a token stamped with the current time.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        self.seal(plaintext, unix_now(), &iv)
    }

    /// Opens a token regardless of its age.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CipherError> {
        self.open(token).map(|(_, plaintext)| plaintext)
    }

    /// Opens a token, rejecting it when it was issued more than `ttl` ago or
    /// claims to be issued in the future beyond the allowed clock skew.
    pub fn decrypt_with_ttl(&self, token: &str, ttl: Duration) -> Result<Vec<u8>, CipherError> {
        let (issued_at, plaintext) = self.open(token)?;
        let now = unix_now();
        if issued_at.saturating_add(ttl.as_secs()) < now {
            return Err(CipherError::InvalidToken);
        }
        if issued_at > now.saturating_add(MAX_CLOCK_SKEW.as_secs()) {
            return Err(CipherError::InvalidToken);
        }
        Ok(plaintext)
    }

    fn seal(&self, plaintext: &[u8], issued_at: u64, iv: &[u8; IV_LEN]) -> Result<String, CipherError> {
        let ciphertext = Aes128CbcEnc::new_from_slices(self.key.encryption(), iv)
            .map_err(|e| CipherError::InvalidValue(format!("encryption failed: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(HEADER_LEN + IV_LEN + ciphertext.len() + MAC_LEN);
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&issued_at.to_be_bytes());
        token.extend_from_slice(iv);
        token.extend_from_slice(&ciphertext);

        let mut mac = self.mac()?;
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());
        Ok(URL_SAFE.encode(token))
    }

    fn open(&self, token: &str) -> Result<(u64, Vec<u8>), CipherError> {
        if !token.is_ascii() {
            return Err(CipherError::InvalidValue(
                "token must contain only ASCII characters".to_string(),
            ));
        }
        let data = URL_SAFE
            .decode(token.as_bytes())
            .map_err(|_| CipherError::InvalidToken)?;
        if data.len() < HEADER_LEN + IV_LEN + MAC_LEN || data[0] != TOKEN_VERSION {
            return Err(CipherError::InvalidToken);
        }

        let (signed, tag) = data.split_at(data.len() - MAC_LEN);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(tag).map_err(|_| CipherError::InvalidToken)?;

        let (header, body) = signed.split_at(HEADER_LEN);
        let (iv, ciphertext) = body.split_at(IV_LEN);
        let issued_at = <[u8; 8]>::try_from(&header[1..])
            .map(u64::from_be_bytes)
            .map_err(|_| CipherError::InvalidToken)?;

        let plaintext = Aes128CbcDec::new_from_slices(self.key.encryption(), iv)
            .map_err(|_| CipherError::InvalidToken)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::InvalidToken)?;
        Ok((issued_at, plaintext))
    }

    fn mac(&self) -> Result<HmacSha256, CipherError> {
        HmacSha256::new_from_slice(self.key.signing())
            .map_err(|e| CipherError::InvalidValue(format!("hmac setup failed: {e}")))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Returns a fresh key in its textual form.
pub fn generate_key() -> String {
    SecretKey::generate().encode()
}

/// Encrypts `plaintext` and wraps the token as `ENC(<token>)`. A missing key
/// yields `Ok(None)` so callers can run before a key has been provisioned.
pub fn encrypt_with_key(key: Option<&str>, plaintext: &str) -> Result<Option<String>, CipherError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let token = SecretCipher::from_text(key)?.encrypt(plaintext.as_bytes())?;
    Ok(Some(wrap_marker(&token)))
}

pub fn decrypt_with_key(key: &str, token: &str) -> Result<Vec<u8>, CipherError> {
    SecretCipher::from_text(key)?.decrypt(token)
}

pub fn decrypt_with_ttl(key: &str, token: &str, ttl: Duration) -> Result<Vec<u8>, CipherError> {
    SecretCipher::from_text(key)?.decrypt_with_ttl(token, ttl)
}
