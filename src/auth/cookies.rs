//! Authenticated, encrypted cookie values.
//!
//! Token layout: `base64url(nonce (12 bytes) || ChaCha20-Poly1305 ciphertext)`.
//! The AEAD key is `SHA-256(secret)` and the cookie name is the associated
//! data, so a value sealed for `_csrf` never opens as `JSESSIONID`.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use chrono::{Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const MIN_SECRET_LEN: usize = 32;

/// Lifetime embedded by [`SecureCookie::encode`].
pub const DEFAULT_MAX_AGE_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie {0} not present")]
    Missing(String),
    #[error("malformed cookie value")]
    Malformed,
    #[error("failed to serialize cookie value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to encrypt cookie value")]
    Encrypt,
    #[error("cookie value failed authentication")]
    Decrypt,
    #[error("cookie value expired")]
    Expired,
    #[error("cookie TTL out of range: {0} seconds")]
    Ttl(i64),
    #[error("invalid Set-Cookie header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("cookie secret is not valid hex")]
    Hex,
    #[error("cookie secret must be at least 32 bytes, got {0}")]
    TooShort(usize),
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    exp: i64,
    value: T,
}

#[derive(Clone)]
pub struct SecureCookie {
    key: [u8; 32],
}

impl std::fmt::Debug for SecureCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCookie").finish_non_exhaustive()
    }
}

impl SecureCookie {
    /// Build a codec from raw secret bytes.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Sha256::digest(secret).into(),
        }
    }

    /// Build a codec from a hex secret of at least 32 decoded bytes.
    ///
    /// # Errors
    /// Returns [`SecretError`] when the value is not hex or too short.
    pub fn from_hex(secret: &str) -> Result<Self, SecretError> {
        let bytes = hex::decode(secret.trim()).map_err(|_| SecretError::Hex)?;
        if bytes.len() < MIN_SECRET_LEN {
            return Err(SecretError::TooShort(bytes.len()));
        }
        Ok(Self::new(&bytes))
    }

    /// Codec with a fresh random secret. Cookies it issues do not survive a restart.
    #[must_use]
    pub fn random() -> Self {
        let mut secret = [0u8; MIN_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        Self::new(&secret)
    }

    /// Seal `value` for cookie `name` with the default max age.
    ///
    /// # Errors
    /// Returns an error if serialization or encryption fails.
    pub fn encode<T: Serialize>(&self, name: &str, value: &T) -> Result<String, CookieError> {
        self.encode_with_ttl(name, value, DEFAULT_MAX_AGE_SECONDS)
    }

    /// Seal `value` for cookie `name`, valid for `ttl_seconds`.
    ///
    /// # Errors
    /// Returns an error if serialization or encryption fails.
    #[allow(deprecated)]
    pub fn encode_with_ttl<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> Result<String, CookieError> {
        let envelope = Envelope {
            exp: Utc::now().timestamp().saturating_add(ttl_seconds),
            value,
        };
        let plaintext = serde_json::to_vec(&envelope).map_err(CookieError::Serialize)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(Base64UrlUnpadded::encode_string(&sealed))
    }

    /// Open a token sealed for cookie `name`.
    ///
    /// # Errors
    /// Fails on malformed input, authentication failure (tampering, wrong
    /// name or key), undecodable payloads and expired values.
    #[allow(deprecated)]
    pub fn decode<T: DeserializeOwned>(&self, name: &str, token: &str) -> Result<T, CookieError> {
        let sealed = Base64UrlUnpadded::decode_vec(token).map_err(|_| CookieError::Malformed)?;
        if sealed.len() <= NONCE_LEN {
            return Err(CookieError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Decrypt)?;

        let envelope: Envelope<T> =
            serde_json::from_slice(&plaintext).map_err(|_| CookieError::Malformed)?;
        if Utc::now().timestamp() >= envelope.exp {
            return Err(CookieError::Expired);
        }
        Ok(envelope.value)
    }

    /// Build a `Set-Cookie` header carrying the sealed `value`.
    ///
    /// # Errors
    /// Returns an error if the expiry is not representable, the value cannot
    /// be sealed or the header is invalid.
    pub fn set_secure_cookie<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> Result<HeaderValue, CookieError> {
        let expires = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or(CookieError::Ttl(ttl_seconds))?;
        let token = self.encode_with_ttl(name, value, ttl_seconds)?;
        let expires = expires
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let cookie = format!(
            "{name}={token}; Path=/; Expires={expires}; Max-Age={ttl_seconds}; HttpOnly; Secure; SameSite=Lax"
        );
        Ok(HeaderValue::from_str(&cookie)?)
    }

    /// Read cookie `name` from the request headers and open it.
    ///
    /// # Errors
    /// [`CookieError::Missing`] when absent, otherwise see [`SecureCookie::decode`].
    pub fn cookie_value<T: DeserializeOwned>(
        &self,
        headers: &HeaderMap,
        name: &str,
    ) -> Result<T, CookieError> {
        let token =
            raw_cookie(headers, name).ok_or_else(|| CookieError::Missing(name.to_string()))?;
        self.decode(name, &token)
    }
}

/// Build a `Set-Cookie` header that deletes cookie `name`.
///
/// # Errors
/// Returns an error if `name` is not a valid header value.
pub fn clear_cookie(name: &str) -> Result<HeaderValue, CookieError> {
    let cookie = format!(
        "{name}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Lax"
    );
    Ok(HeaderValue::from_str(&cookie)?)
}

/// Raw value of cookie `name` across all `Cookie` headers.
pub fn raw_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
}
