use serde::Deserialize;
use std::{error::Error, fs};

const SETTINGS_FILENAME: &str = "settings.json";

/// Deployment knobs, read from `settings.json` next to the binary.
/// Every field has a default so a partial file (or none of the sync
/// fields, for a server-only deployment) still loads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server: where the document store listens.
    pub bind_address: String,
    pub bind_port: u16,
    /// Server: redb file backing the stored documents.
    pub shelf_path: String,

    /// Client: the one shared document URL for this board.
    pub document_url: String,
    /// Client: heartbeat period, seconds.
    pub poll_interval_secs: u64,
    /// Client: per-request timeout, seconds.
    pub request_timeout_secs: u64,
    /// Client: shared password that grants the admin flag at login.
    pub admin_password: String,
    /// Client: redb file backing the local snapshot/session cache.
    pub cache_path: String,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 3000,
            shelf_path: "prepboard-docs.redb".to_string(),
            document_url: "http://localhost:3000/docs/main".to_string(),
            poll_interval_secs: 10,
            request_timeout_secs: 10,
            admin_password: "letmein".to_string(),
            cache_path: "prepboard-cache.redb".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings, Box<dyn Error>> {
        let content = fs::read_to_string(SETTINGS_FILENAME)?;
        let settings = serde_json::from_str(&content)?;
        Ok(settings)
    }
}
