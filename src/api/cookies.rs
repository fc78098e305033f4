//! Persistent cookie jar
//!
//! Plays the browser's role for the refresh cookie: the backend sets and
//! clears it through `Set-Cookie`, reqwest replays it on matching requests,
//! and it survives process restarts in `cookies.json`. Nothing else in the
//! crate reads cookie values.

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use reqwest::cookie::CookieStore as _;
use reqwest::header::HeaderValue;
use reqwest::Url;
use reqwest_cookie_store::CookieStoreMutex;

/// Cookie store shared with the HTTP client. RFC 6265 matching (domain,
/// path, expiry, secure) is done by `cookie_store`; this type adds the
/// on-disk copy.
pub struct CookieJar {
    path: Option<PathBuf>,
    store: CookieStoreMutex,
}

impl CookieJar {
    /// Jar that lives only as long as the process.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            store: CookieStoreMutex::new(cookie_store::CookieStore::default()),
        }
    }

    /// Load the jar from disk; a missing file is an empty jar.
    pub fn load(path: PathBuf) -> Result<Self> {
        let store = if path.exists() {
            let file = std::fs::File::open(&path).context("Failed to read cookie jar")?;
            cookie_store::CookieStore::load_json(BufReader::new(file))
                .map_err(|e| anyhow!("Failed to parse cookie jar: {}", e))?
        } else {
            cookie_store::CookieStore::default()
        };

        Ok(Self {
            path: Some(path),
            store: CookieStoreMutex::new(store),
        })
    }

    /// Session cookies are kept too, like a browser profile that is never
    /// closed.
    fn persist(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let mut buf = Vec::new();
        {
            let store = self
                .store
                .lock()
                .map_err(|_| anyhow!("Cookie jar lock poisoned"))?;
            store
                .save_incl_expired_and_nonpersistent_json(&mut buf)
                .map_err(|e| anyhow!("Failed to serialize cookie jar: {}", e))?;
        }
        let content = String::from_utf8(buf).context("Cookie jar is not UTF-8")?;
        crate::config::write_private(path, &content)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store
            .lock()
            .map(|store| store.iter_unexpired().count())
            .unwrap_or(0)
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let mut headers = cookie_headers.peekable();
        if headers.peek().is_none() {
            return;
        }
        self.store.set_cookies(&mut headers, url);
        tracing::debug!("Cookies updated by {}", url.path());

        if let Err(e) = self.persist() {
            tracing::warn!("Failed to save cookie jar: {:#}", e);
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.store.cookies(url)
    }
}
