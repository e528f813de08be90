//! Remote document store client.
//!
//! The whole board lives in ONE remote JSON document: read = GET, write =
//! PUT of the full body. No partial updates, no query language, and no
//! auth beyond knowing the URL — whoever has the URL has full read/write
//! access. That trust model is inherited from the deployment style, not
//! something this layer tries to fix.
//!
//! No retries here either: the sync engine's heartbeat is the retry loop.

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure or timeout. Transient: the heartbeat will
    /// try again.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-2xx status. Carries enough detail
    /// to tell a bad document URL from a passing outage.
    #[error("remote rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// The two-operation boundary the sync engine reconciles against.
/// Implemented over HTTP below and by in-memory fakes in tests; a future
/// per-task merge transport would slot in here without touching callers.
pub trait DocumentStore: Send + Sync {
    /// Read the whole document. `Ok(None)` means it has never been
    /// written — distinct from failure, because a missing document
    /// triggers first-time initialization rather than an error state.
    fn fetch(&self) -> Result<Option<String>, RemoteError>;

    /// Replace the whole document. 2xx is success, anything else failure.
    fn store(&self, body: &str) -> Result<(), RemoteError>;
}

/// HTTP implementation over a single document URL.
pub struct HttpStore {
    agent: ureq::Agent,
    url: String,
}

impl HttpStore {
    /// `timeout` bounds every request end to end; a hung server surfaces
    /// as `Unreachable` instead of blocking a sync slot forever.
    pub fn new(url: impl Into<String>, timeout: Duration) -> HttpStore {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        HttpStore { agent, url: url.into() }
    }
}

impl DocumentStore for HttpStore {
    fn fetch(&self) -> Result<Option<String>, RemoteError> {
        // Cache-busting: some document hosts sit behind caches that would
        // happily serve a stale board.
        let bust = Utc::now().timestamp_millis().to_string();
        let result = self
            .agent
            .get(&self.url)
            .query("t", &bust)
            .set("Cache-Control", "no-cache")
            .call();

        match result {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
                if body.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(body))
                }
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(status, response)) => Err(RemoteError::Rejected {
                status,
                message: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(t)) => Err(RemoteError::Unreachable(t.to_string())),
        }
    }

    fn store(&self, body: &str) -> Result<(), RemoteError> {
        let result = self
            .agent
            .put(&self.url)
            .set("Content-Type", "application/json")
            .send_string(body);

        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, response)) => Err(RemoteError::Rejected {
                status,
                message: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(t)) => Err(RemoteError::Unreachable(t.to_string())),
        }
    }
}
