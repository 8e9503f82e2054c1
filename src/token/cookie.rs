//! Refresh-token cookie persistence.
//!
//! # Responsibilities
//! - Model cookie attributes (domain, secure, same-site, max age)
//! - Store cookies in memory or in a JSON file
//! - Obfuscate the refresh token before it is written
//!
//! # Design Decisions
//! - Obfuscation is a reversible XOR + base64url transform. It keeps the value
//!   from being trivially readable, nothing more; revocation on the backend is
//!   the real protection
//! - Expired cookies are treated as absent
//! - Undecodable values are treated as absent rather than as errors

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::token::types::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A single cookie with its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: u64,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at_ms: u64,
}

impl Cookie {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Storage for cookies scoped to one domain.
pub trait CookieJar: Send + Sync + std::fmt::Debug {
    /// Insert or replace a cookie by name.
    fn set(&self, cookie: Cookie) -> Result<(), TokenError>;

    /// Get an unexpired cookie by name.
    fn get(&self, name: &str, now_ms: u64) -> Option<Cookie>;

    /// Delete a cookie by name.
    fn remove(&self, name: &str) -> Result<(), TokenError>;
}

/// In-process cookie jar.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: Arc<DashMap<String, Cookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for MemoryCookieJar {
    fn set(&self, cookie: Cookie) -> Result<(), TokenError> {
        self.cookies.insert(cookie.name.clone(), cookie);
        Ok(())
    }

    fn get(&self, name: &str, now_ms: u64) -> Option<Cookie> {
        self.cookies
            .get(name)
            .map(|r| r.value().clone())
            .filter(|c| !c.is_expired(now_ms))
    }

    fn remove(&self, name: &str) -> Result<(), TokenError> {
        self.cookies.remove(name);
        Ok(())
    }
}

/// Cookie jar persisted to a JSON file on every change.
#[derive(Debug)]
pub struct FileCookieJar {
    path: PathBuf,
    cookies: DashMap<String, Cookie>,
    /// One writer at a time; the snapshot is taken under it.
    save_lock: Mutex<()>,
}

impl FileCookieJar {
    /// Load from file if it exists, otherwise start empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let path = path.as_ref().to_path_buf();
        let cookies = DashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let map: HashMap<String, Cookie> = serde_json::from_reader(reader)?;
            for (k, v) in map {
                cookies.insert(k, v);
            }
            tracing::info!(path = %path.display(), count = cookies.len(), "Loaded cookie jar");
        }
        Ok(Self {
            path,
            cookies,
            save_lock: Mutex::new(()),
        })
    }

    fn save(&self) -> Result<(), TokenError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let map: HashMap<_, _> = self
            .cookies
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer(&mut writer, &map)?;
        writer.flush()?;
        Ok(())
    }
}

impl CookieJar for FileCookieJar {
    fn set(&self, cookie: Cookie) -> Result<(), TokenError> {
        self.cookies.insert(cookie.name.clone(), cookie);
        self.save()
    }

    fn get(&self, name: &str, now_ms: u64) -> Option<Cookie> {
        self.cookies
            .get(name)
            .map(|r| r.value().clone())
            .filter(|c| !c.is_expired(now_ms))
    }

    fn remove(&self, name: &str) -> Result<(), TokenError> {
        if self.cookies.remove(name).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

/// Reversible transform applied to the refresh token before persisting.
pub fn obfuscate(value: &str, key: &str) -> String {
    URL_SAFE_NO_PAD.encode(xor(value.as_bytes(), key.as_bytes()))
}

/// Inverse of [`obfuscate`]. `None` when the value was tampered with.
pub fn deobfuscate(encoded: &str, key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(xor(&bytes, key.as_bytes())).ok()
}

fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}
