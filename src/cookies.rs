//! Encrypted session cookies.
//!
//! Values are sealed with AES-256-GCM under a key derived from the configured
//! secret. The cookie name is bound into the plaintext so a value minted for
//! one cookie does not decrypt under another.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::config;

/// Browsers reject larger `Set-Cookie` values.
pub const MAX_COOKIE_LEN: usize = 4096;

pub const BOT_ID: &str = "bot_id";

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie value too long")]
    ValueTooLong,
    #[error("invalid cookie value")]
    InvalidValue,
    #[error("cookie not present")]
    Missing,
}

#[derive(Clone)]
pub struct CookieCodec {
    key: [u8; 32],
    secure: bool,
    max_age_secs: u64,
}

impl fmt::Debug for CookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieCodec")
            .field("secure", &self.secure)
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

impl CookieCodec {
    pub fn new(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self {
            key,
            secure: true,
            max_age_secs: 30 * 24 * 60 * 60,
        }
    }

    pub fn from_config(cfg: &config::Cookies) -> Self {
        Self::new(&cfg.secret)
            .secure(cfg.secure)
            .max_age(cfg.max_age_secs)
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    pub fn encrypt(&self, name: &str, value: &[u8]) -> Result<String, CookieError> {
        let mut plaintext = Vec::with_capacity(name.len() + 1 + value.len());
        plaintext.extend_from_slice(name.as_bytes());
        plaintext.push(b':');
        plaintext.extend_from_slice(value);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| CookieError::InvalidValue)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn decrypt(&self, name: &str, encoded: &str) -> Result<Vec<u8>, CookieError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| CookieError::InvalidValue)?;
        if sealed.len() <= NONCE_LEN {
            return Err(CookieError::InvalidValue);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CookieError::InvalidValue)?;

        let prefix_len = name.len() + 1;
        if plaintext.len() < prefix_len
            || &plaintext[..name.len()] != name.as_bytes()
            || plaintext[name.len()] != b':'
        {
            return Err(CookieError::InvalidValue);
        }
        Ok(plaintext[prefix_len..].to_vec())
    }

    /// Full `Set-Cookie` header value carrying the sealed `value`.
    pub fn set_cookie(&self, name: &str, value: &[u8]) -> Result<String, CookieError> {
        let sealed = self.encrypt(name, value)?;
        let mut header = format!(
            "{name}={sealed}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.max_age_secs
        );
        if self.secure {
            header.push_str("; Secure");
        }
        if header.len() > MAX_COOKIE_LEN {
            return Err(CookieError::ValueTooLong);
        }
        Ok(header)
    }

    /// Find `name` among the request's `Cookie` headers and open it.
    pub fn read(&self, headers: &HeaderMap, name: &str) -> Result<Vec<u8>, CookieError> {
        let raw = find_cookie(headers, name).ok_or(CookieError::Missing)?;
        self.decrypt(name, raw)
    }

    pub fn read_string(&self, headers: &HeaderMap, name: &str) -> Result<String, CookieError> {
        let bytes = self.read(headers, name)?;
        String::from_utf8(bytes).map_err(|_| CookieError::InvalidValue)
    }
}

fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}
