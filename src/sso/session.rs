//! Session payload and the cookie codec.
//!
//! A session cookie is `base64(nonce || ciphertext)` where the ciphertext is
//! AES-256-GCM over the JSON-encoded [`Session`], without associated data.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// AES-256 key size in bytes.
pub const KEY_LEN: usize = 32;

/// GCM standard nonce size in bytes.
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key length, expected 32 bytes")]
    InvalidKeyLength,
    #[error("message authentication failed")]
    AuthenticationFailed,
    #[error("malformed cookie: {0}")]
    MalformedCookie(&'static str),
    #[error("failed to read from the system random source")]
    Entropy,
    #[error("invalid session payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A user as reported by the identity provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub login: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gravatar_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub is_syncing: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub synced_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub correct_scopes: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: String,
}

/// The authenticated state carried by the cookie and sent upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "user")]
    pub identity: Identity,
    pub token: String,
}

// The identity provider sends `null` for unset fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Encrypts `plaintext` under a fresh random nonce.
///
/// # Errors
/// Returns [`CodecError::InvalidKeyLength`] unless `key` is exactly 32 bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CodecError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidKeyLength)?;

    // Random nonces are safe for up to 2^32 messages per key.
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CodecError::Entropy)?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::AuthenticationFailed)?;

    Ok((ciphertext, nonce))
}

/// Decrypts and authenticates `ciphertext`.
///
/// # Errors
/// Returns [`CodecError::AuthenticationFailed`] if the tag does not verify.
pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidKeyLength)?;

    if nonce.len() != NONCE_LEN {
        return Err(CodecError::MalformedCookie("nonce must be 12 bytes in length"));
    }

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::AuthenticationFailed)
}

/// Wire form of a sealed payload.
#[must_use]
pub fn encode(nonce: &[u8], ciphertext: &[u8]) -> String {
    let mut raw = Vec::with_capacity(nonce.len() + ciphertext.len());
    raw.extend_from_slice(nonce);
    raw.extend_from_slice(ciphertext);
    Base64::encode_string(&raw)
}

/// Splits a cookie value into `(nonce, ciphertext)`.
///
/// # Errors
/// Returns [`CodecError::MalformedCookie`] for bad base64, a short nonce or an
/// empty ciphertext.
pub fn decode(value: &str) -> Result<([u8; NONCE_LEN], Vec<u8>), CodecError> {
    let raw = Base64::decode_vec(value)
        .map_err(|_| CodecError::MalformedCookie("invalid base64 encoding"))?;

    if raw.len() < NONCE_LEN {
        return Err(CodecError::MalformedCookie("nonce must be 12 bytes in length"));
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    if ciphertext.is_empty() {
        return Err(CodecError::MalformedCookie("encrypted cookie missing"));
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);

    Ok((nonce, ciphertext.to_vec()))
}

/// Seals and opens [`Session`] cookies with the configured encryption key.
#[derive(Debug)]
pub struct SessionCodec {
    key: SecretSlice<u8>,
}

impl SessionCodec {
    /// # Errors
    /// Returns [`CodecError::InvalidKeyLength`] unless `key` is 32 bytes.
    pub fn new(key: Vec<u8>) -> Result<Self, CodecError> {
        if key.len() != KEY_LEN {
            return Err(CodecError::InvalidKeyLength);
        }
        Ok(Self {
            key: SecretSlice::from(key),
        })
    }

    /// Serialize, encrypt and encode a session into a cookie value.
    ///
    /// # Errors
    /// Returns an error if serialization or encryption fails.
    pub fn seal(&self, session: &Session) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(session)?;
        let (ciphertext, nonce) = encrypt(&plaintext, self.key.expose_secret())?;
        Ok(encode(&nonce, &ciphertext))
    }

    /// Recover a session from a cookie value.
    ///
    /// # Errors
    /// Returns an error if the value is malformed, fails authentication or does
    /// not hold a session.
    pub fn open(&self, value: &str) -> Result<Session, CodecError> {
        let (nonce, ciphertext) = decode(value)?;
        let plaintext = decrypt(&ciphertext, &nonce, self.key.expose_secret())?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: [u8; KEY_LEN] = [7u8; KEY_LEN];

    fn alice() -> Session {
        Session {
            identity: Identity {
                id: 42,
                name: "Alice".to_string(),
                login: "alice".to_string(),
                email: "alice@example.com".to_string(),
                gravatar_id: "abc".to_string(),
                is_syncing: false,
                synced_at: "2016-01-01T00:00:00Z".to_string(),
                correct_scopes: true,
                created_at: "2015-01-01T00:00:00Z".to_string(),
            },
            token: "T".to_string(),
        }
    }

    #[test]
    fn seal_open_roundtrip() {
        let codec = SessionCodec::new(KEY.to_vec()).unwrap();
        let cookie = codec.seal(&alice()).unwrap();
        assert_eq!(codec.open(&cookie).unwrap(), alice());
    }

    #[test]
    fn encrypt_uses_fresh_nonces() {
        let (first, first_nonce) = encrypt(b"payload", &KEY).unwrap();
        let (second, second_nonce) = encrypt(b"payload", &KEY).unwrap();
        assert_ne!(first_nonce, second_nonce);
        assert_ne!(first, second);
    }

    #[test]
    fn encrypt_rejects_wrong_key_length() {
        assert!(matches!(
            encrypt(b"payload", &[0u8; 16]),
            Err(CodecError::InvalidKeyLength)
        ));
        assert!(matches!(
            decrypt(b"payload", &[0u8; NONCE_LEN], &[0u8; 31]),
            Err(CodecError::InvalidKeyLength)
        ));
        assert!(matches!(
            SessionCodec::new(vec![0u8; 33]),
            Err(CodecError::InvalidKeyLength)
        ));
    }

    #[test]
    fn flipped_bits_fail_authentication() {
        let (ciphertext, nonce) = encrypt(b"{\"token\":\"T\"}", &KEY).unwrap();
        for index in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            if let Some(byte) = tampered.get_mut(index) {
                *byte ^= 0x01;
            }
            assert!(matches!(
                decrypt(&tampered, &nonce, &KEY),
                Err(CodecError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let (ciphertext, nonce) = encrypt(b"secret", &KEY).unwrap();
        let other = [8u8; KEY_LEN];
        assert!(matches!(
            decrypt(&ciphertext, &nonce, &other),
            Err(CodecError::AuthenticationFailed)
        ));
    }

    #[test]
    fn decode_rejects_short_input() {
        let short = Base64::encode_string(&[1u8; 5]);
        assert!(matches!(
            decode(&short),
            Err(CodecError::MalformedCookie(_))
        ));

        let nonce_only = Base64::encode_string(&[1u8; NONCE_LEN]);
        assert!(matches!(
            decode(&nonce_only),
            Err(CodecError::MalformedCookie("encrypted cookie missing"))
        ));

        assert!(matches!(decode(""), Err(CodecError::MalformedCookie(_))));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(matches!(
            decode("not base64!"),
            Err(CodecError::MalformedCookie("invalid base64 encoding"))
        ));
    }

    #[test]
    fn encode_prefixes_nonce() {
        let value = encode(&[1u8; NONCE_LEN], &[2u8; 3]);
        let (nonce, ciphertext) = decode(&value).unwrap();
        assert_eq!(nonce, [1u8; NONCE_LEN]);
        assert_eq!(ciphertext, vec![2u8; 3]);
    }

    #[test]
    fn open_rejects_non_session_plaintext() {
        let codec = SessionCodec::new(KEY.to_vec()).unwrap();
        let (ciphertext, nonce) = encrypt(b"not json", &KEY).unwrap();
        assert!(matches!(
            codec.open(&encode(&nonce, &ciphertext)),
            Err(CodecError::Serialization(_))
        ));
    }

    #[test]
    fn session_json_uses_user_key() {
        let value = serde_json::to_value(alice()).unwrap();
        assert_eq!(value["user"]["login"], "alice");
        assert_eq!(value["token"], "T");
    }

    #[test]
    fn identity_accepts_null_fields() {
        let identity: Identity = serde_json::from_value(json!({
            "id": 1,
            "name": null,
            "login": "bob",
            "email": null,
            "gravatar_id": null,
            "is_syncing": null,
            "synced_at": null,
            "correct_scopes": true,
            "created_at": "2015-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(identity.login, "bob");
        assert_eq!(identity.name, "");
        assert!(!identity.is_syncing);
    }
}
