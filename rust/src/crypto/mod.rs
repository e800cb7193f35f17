//! Cryptography for encrypted settings: the token cipher and the `ENC(...)`
//! marker format that carries its tokens inside configuration values.

pub mod marker;
pub mod secrets;

pub use marker::{is_marker, marker_payload, wrap_marker};
pub use secrets::{
    decrypt_with_key, decrypt_with_ttl, encrypt_with_key, generate_key, CipherError, SecretCipher,
    SecretKey,
};
