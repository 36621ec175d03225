use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, USER_AGENT};
use reqwest::{Client, Error as ReqwestError, StatusCode};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{normalize_proxy, ClientConfig};
use crate::transport::{Channel, Reservation, Transport};
use crate::utils;

pub const SESSION_TOKEN_HEADER: &str = "x-kahoot-session-token";

const MAX_TUNNEL_RESPONSE: usize = 8 * 1024;

static BASE_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"));
    headers
});

#[derive(Debug, Deserialize)]
struct ReserveResponse {
    challenge: Option<String>,
}

#[derive(Debug)]
pub enum NetworkError {
    Reqwest(ReqwestError),
    ApiError { status: StatusCode, message: String },
    MissingSessionToken,
    SerdeJsonError(serde_json::Error),
    UrlParseError(url::ParseError),
    WebSocket(tungstenite::Error),
    Tls(native_tls::Error),
    Io(std::io::Error),
    Proxy(String),
    Timeout(String),
}

impl From<ReqwestError> for NetworkError {
    fn from(err: ReqwestError) -> NetworkError {
        NetworkError::Reqwest(err)
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> NetworkError {
        NetworkError::UrlParseError(err)
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> NetworkError {
        NetworkError::SerdeJsonError(err)
    }
}

impl From<tungstenite::Error> for NetworkError {
    fn from(err: tungstenite::Error) -> NetworkError {
        NetworkError::WebSocket(err)
    }
}

impl From<native_tls::Error> for NetworkError {
    fn from(err: native_tls::Error) -> NetworkError {
        NetworkError::Tls(err)
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> NetworkError {
        NetworkError::Io(err)
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Reqwest(e) => write!(f, "HTTP request error: {}", e),
            NetworkError::ApiError { status, message } => write!(f, "API error ({}): {}", status, message),
            NetworkError::MissingSessionToken => write!(f, "No session token found in response headers"),
            NetworkError::SerdeJsonError(e) => write!(f, "JSON deserialization error: {}", e),
            NetworkError::UrlParseError(e) => write!(f, "URL parsing error: {}", e),
            NetworkError::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            NetworkError::Tls(e) => write!(f, "TLS error: {}", e),
            NetworkError::Io(e) => write!(f, "IO error: {}", e),
            NetworkError::Proxy(e) => write!(f, "Proxy error: {}", e),
            NetworkError::Timeout(what) => write!(f, "Timed out: {}", what),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Reqwest(e) => Some(e),
            NetworkError::SerdeJsonError(e) => Some(e),
            NetworkError::UrlParseError(e) => Some(e),
            NetworkError::WebSocket(e) => Some(e),
            NetworkError::Tls(e) => Some(e),
            NetworkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// HTTP client plus optional proxy for a single join attempt.
pub struct LiveTransport {
    client: Client,
    config: Arc<ClientConfig>,
    proxy: Option<Url>,
}

impl LiveTransport {
    pub fn new(config: Arc<ClientConfig>, proxy: Option<&str>) -> Result<Self, NetworkError> {
        let proxy = proxy.map(|p| Url::parse(&normalize_proxy(p))).transpose()?;

        let mut builder = Client::builder()
            .default_headers(BASE_HEADERS.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout);
        builder = match &proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str())?),
            // only the configured proxy list is used, never the environment
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            config,
            proxy,
        })
    }

    async fn connect_stream(&self, host: &str, port: u16) -> Result<TcpStream, NetworkError> {
        match &self.proxy {
            Some(proxy) => open_tunnel(proxy, host, port).await,
            None => Ok(TcpStream::connect((host, port)).await?),
        }
    }
}

impl Transport for LiveTransport {
    type Channel = LiveChannel;

    async fn reserve(&mut self, game_pin: u32) -> Result<Reservation, NetworkError> {
        let url = self.config.reserve_url(game_pin, utils::timestamp_millis());
        debug!("[API] Sending GET to reservation URL: {}", url);

        let start_time = Instant::now();
        let response = self.client.get(&url).send().await?;
        debug!("[TIMING] reserve for game {} took {:.2?}", game_pin, start_time.elapsed());

        let status = response.status();
        if status != StatusCode::OK {
            return Err(NetworkError::ApiError {
                status,
                message: format!("Game with pin {} not found", game_pin),
            });
        }

        let session_token = response
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        if session_token.is_empty() {
            return Err(NetworkError::MissingSessionToken);
        }

        let body = response.text().await?;
        let parsed: ReserveResponse = serde_json::from_str(&body)?;
        debug!("[API] Session token: {}", session_token);

        Ok(Reservation {
            session_token,
            challenge: parsed.challenge,
        })
    }

    async fn open(&mut self, game_pin: u32, connection_id: &str) -> Result<LiveChannel, NetworkError> {
        let url = self.config.channel_url(game_pin, connection_id)?;
        let host = url
            .host_str()
            .ok_or_else(|| NetworkError::Proxy(format!("no host in {}", url)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        debug!("Connecting to WebSocket: {}", url);

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.config.accept_invalid_certs)
            .build()?;

        let connect = async {
            let stream = self.connect_stream(&host, port).await?;
            let (ws, response) =
                client_async_tls_with_config(url.as_str(), stream, None, Some(Connector::NativeTls(tls))).await?;
            debug!("WebSocket upgraded (status: {})", response.status());
            Ok::<_, NetworkError>(ws)
        };
        let ws = tokio::time::timeout(self.config.request_timeout, connect)
            .await
            .map_err(|_| NetworkError::Timeout(format!("opening {}", url)))??;

        Ok(LiveChannel { ws })
    }

    async fn close(self) {
        debug!("Releasing HTTP client");
        drop(self.client);
    }
}

/// Opens an HTTP CONNECT tunnel through `proxy` to `host:port`.
async fn open_tunnel(proxy: &Url, host: &str, port: u16) -> Result<TcpStream, NetworkError> {
    if proxy.scheme() != "http" {
        return Err(NetworkError::Proxy(format!(
            "unsupported proxy scheme '{}' for WebSocket tunnel",
            proxy.scheme()
        )));
    }
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| NetworkError::Proxy(format!("no host in proxy {}", proxy)))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);

    let mut stream = TcpStream::connect((proxy_host, proxy_port)).await?;
    stream.write_all(connect_request(proxy, host, port).as_bytes()).await?;

    // Byte-wise so nothing past the header block is consumed.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_TUNNEL_RESPONSE {
            return Err(NetworkError::Proxy("oversized CONNECT response".to_string()));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(NetworkError::Proxy("proxy closed during CONNECT".to_string()));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if tunnel_established(status_line) {
        info!("Tunnel to {}:{} established via {}", host, port, proxy_host);
        Ok(stream)
    } else {
        Err(NetworkError::Proxy(format!("CONNECT refused: {}", status_line)))
    }
}

fn connect_request(proxy: &Url, host: &str, port: u16) -> String {
    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or_default());
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", STANDARD.encode(credentials)));
    }
    request.push_str("\r\n");
    request
}

fn tunnel_established(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(version), Some(code)) if version.starts_with("HTTP/") && code.starts_with('2')
    )
}

/// Persistent WebSocket to the game server.
pub struct LiveChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Channel for LiveChannel {
    async fn send_text(&mut self, text: String) -> Result<(), NetworkError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Message>, NetworkError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                // pings are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(message)) => return Ok(Some(message)),
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("WebSocket close: {}", e);
        }
    }
}
