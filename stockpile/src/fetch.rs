//! Network fetch primitive.
//!
//! A [`Fetcher`] turns a parsed URL into a byte stream. Workers read that
//! stream into pooled slots; they never see HTTP. [`HttpFetcher`] serves
//! HTTP(S), [`FileFetcher`] serves `file://` sources, [`SchemeFetcher`]
//! routes between the two and [`MockFetcher`] serves canned payloads for
//! tests and demos.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub use reqwest::Url;
use tracing::{debug, trace};

use crate::error::FetchError;

/// Default User-Agent sent with HTTP requests.
const DEFAULT_USER_AGENT: &str = concat!("stockpile/", env!("CARGO_PKG_VERSION"));

/// Default transport timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Byte stream returned by a fetcher.
pub type ByteStream = Box<dyn Read + Send>;

/// Opens byte streams for resource URLs.
pub trait Fetcher: Send + Sync {
    fn open(&self, url: &Url) -> Result<ByteStream, FetchError>;
}

/// Parse a resource URL, mapping failures to [`FetchError::InvalidUrl`].
pub fn parse_url(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// HttpFetcher
// =============================================================================

/// Blocking HTTP(S) fetcher built on `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn open(&self, url: &Url) -> Result<ByteStream, FetchError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(FetchError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        }

        trace!(url = %url, "HTTP GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| FetchError::Transport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "HTTP request rejected");
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(Box::new(response))
    }
}

// =============================================================================
// FileFetcher
// =============================================================================

/// Serves `file://` URLs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn open(&self, url: &Url) -> Result<ByteStream, FetchError> {
        if url.scheme() != "file" {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "expected a file:// URL".to_string(),
            });
        }
        let path = url.to_file_path().map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "not a local path".to_string(),
        })?;
        Ok(Box::new(File::open(path)?))
    }
}

// =============================================================================
// SchemeFetcher
// =============================================================================

/// Sends `file://` URLs to [`FileFetcher`] and everything else to
/// [`HttpFetcher`].
#[derive(Clone)]
pub struct SchemeFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl SchemeFetcher {
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::with_timeout(timeout_secs)?,
            file: FileFetcher,
        })
    }
}

impl Fetcher for SchemeFetcher {
    fn open(&self, url: &Url) -> Result<ByteStream, FetchError> {
        match url.scheme() {
            "file" => self.file.open(url),
            _ => self.http.open(url),
        }
    }
}

// =============================================================================
// MockFetcher
// =============================================================================

#[derive(Default)]
struct MockState {
    payloads: HashMap<String, Vec<u8>>,
    failures: HashMap<String, usize>,
    attempts: HashMap<String, usize>,
    held: bool,
}

/// In-memory fetcher with canned payloads.
///
/// Counts every `open` per URL, can fail a URL a given number of times and
/// can hold all requests until [`release`](Self::release) is called.
#[derive(Default)]
pub struct MockFetcher {
    state: Mutex<MockState>,
    released: Condvar,
    read_size: Option<usize>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap each `read` call at `read_size` bytes, like a slow socket.
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = Some(read_size.max(1));
        self
    }

    /// Serve `payload` for `url`.
    pub fn serve(&self, url: &str, payload: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.payloads.insert(url.to_string(), payload.into());
    }

    /// Fail the next `times` opens of `url` with a transport error.
    pub fn fail(&self, url: &str, times: usize) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(url.to_string(), times);
    }

    /// Block every `open` until [`release`](Self::release).
    pub fn hold(&self) {
        self.state.lock().unwrap().held = true;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().held = false;
        self.released.notify_all();
    }

    /// Number of times `url` has been opened.
    pub fn attempts(&self, url: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.attempts.get(url).copied().unwrap_or(0)
    }

    /// Opens across all URLs.
    pub fn total_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts.values().sum()
    }
}

impl Fetcher for MockFetcher {
    fn open(&self, url: &Url) -> Result<ByteStream, FetchError> {
        let key = url.as_str();
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(key.to_string()).or_insert(0) += 1;

        while state.held {
            state = self.released.wait(state).unwrap();
        }

        if let Some(remaining) = state.failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Transport("injected failure".to_string()));
            }
        }

        let payload = state
            .payloads
            .get(key)
            .cloned()
            .ok_or(FetchError::Status(404))?;
        let stream: ByteStream = match self.read_size {
            Some(limit) => Box::new(Trickle {
                inner: Cursor::new(payload),
                limit,
            }),
            None => Box::new(Cursor::new(payload)),
        };
        Ok(stream)
    }
}

struct Trickle<R> {
    inner: R,
    limit: usize,
}

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.limit);
        self.inner.read(&mut buf[..len])
    }
}
