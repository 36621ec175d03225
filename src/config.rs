use std::path::Path;
use std::time::Duration;

use log::{error, info, warn};
use url::Url;

pub const DEFAULT_HOST: &str = "kahoot.it";

/// Transport settings shared by every session of a run.
///
/// Built once in `main` and handed to sessions behind an `Arc`; nothing reads
/// these values from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `https` in production; `http` turns the WebSocket into plain `ws`.
    pub scheme: String,
    pub host: String,
    /// Skip TLS certificate and hostname verification.
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
    /// Bounded wait for each handshake/connect/login/join reply.
    pub reply_timeout: Duration,
    /// How long a joined session keeps its connection open before releasing it.
    pub linger: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: DEFAULT_HOST.to_string(),
            accept_invalid_certs: true,
            request_timeout: Duration::from_secs(30),
            reply_timeout: Duration::from_secs(30),
            linger: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn reserve_url(&self, game_pin: u32, timestamp_ms: u128) -> String {
        format!("{}://{}/reserve/session/{}/?{}", self.scheme, self.host, game_pin, timestamp_ms)
    }

    fn channel_scheme(&self) -> &'static str {
        if self.scheme == "http" {
            "ws"
        } else {
            "wss"
        }
    }

    /// The connection identifier is pushed as a path segment, so any reserved
    /// characters it contains are percent-encoded.
    pub fn channel_url(&self, game_pin: u32, connection_id: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}://{}/cometd/{}", self.channel_scheme(), self.host, game_pin))?;
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(connection_id);
        }
        Ok(url)
    }
}

/// Reads one proxy per line, skipping blank lines.
///
/// A missing or unreadable file means "no proxies", never an error.
pub fn load_proxies(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let proxies = parse_proxy_list(&contents);
            info!("Loaded {} proxies from {}", proxies.len(), path.display());
            proxies
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Proxy file {} not found, running without proxies", path.display());
            Vec::new()
        }
        Err(e) => {
            error!("Error loading proxies from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn parse_proxy_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bare `host:port` entries are HTTP proxies.
pub fn normalize_proxy(entry: &str) -> String {
    if entry.contains("://") {
        entry.to_string()
    } else {
        format!("http://{}", entry)
    }
}
