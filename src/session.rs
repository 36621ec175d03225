//! One join attempt, driven as a strict request/reply state machine:
//!
//! `Init -> TokenAcquired -> ChallengeSolved -> Connected -> Handshaken ->
//! MetaConnected -> LoggedIn -> Joined`, with any stage able to fail.
//!
//! Every failure is returned as a [`FailureReason`] value. The channel and the
//! transport are closed exactly once on every path before [`SessionClient::join`]
//! returns.

use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::challenge_solver::{self, ChallengeError};
use crate::cometd::{self, Reply, CONTROLLER_CHANNEL};
use crate::config::ClientConfig;
use crate::network_client::NetworkError;
use crate::transport::{Channel, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    TokenAcquired,
    ChallengeSolved,
    Connected,
    Handshaken,
    MetaConnected,
    LoggedIn,
    Joined,
    Failed,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::TokenAcquired),
            Stage::TokenAcquired => Some(Stage::ChallengeSolved),
            Stage::ChallengeSolved => Some(Stage::Connected),
            Stage::Connected => Some(Stage::Handshaken),
            Stage::Handshaken => Some(Stage::MetaConnected),
            Stage::MetaConnected => Some(Stage::LoggedIn),
            Stage::LoggedIn => Some(Stage::Joined),
            Stage::Joined | Stage::Failed => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::TokenAcquired => "TOKEN_ACQUIRED",
            Stage::ChallengeSolved => "CHALLENGE_SOLVED",
            Stage::Connected => "CONNECTED",
            Stage::Handshaken => "HANDSHAKEN",
            Stage::MetaConnected => "META_CONNECTED",
            Stage::LoggedIn => "LOGGED_IN",
            Stage::Joined => "JOINED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    GameNotFound(StatusCode),
    MissingToken,
    ChallengeSolveFailed(ChallengeError),
    TransportError(String),
    HandshakeFailed(String),
    ConnectFailed(String),
    LoginFailed(String),
    JoinUnconfirmed(String),
    UnexpectedError(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::GameNotFound(status) => write!(f, "game not found (status: {})", status),
            FailureReason::MissingToken => write!(f, "no session token in reservation response"),
            FailureReason::ChallengeSolveFailed(e) => write!(f, "challenge solve failed: {}", e),
            FailureReason::TransportError(e) => write!(f, "transport error: {}", e),
            FailureReason::HandshakeFailed(e) => write!(f, "handshake failed: {}", e),
            FailureReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            FailureReason::LoginFailed(e) => write!(f, "login failed: {}", e),
            FailureReason::JoinUnconfirmed(e) => write!(f, "join unconfirmed: {}", e),
            FailureReason::UnexpectedError(e) => write!(f, "unexpected error: {}", e),
        }
    }
}

impl FailureReason {
    fn from_reservation(err: NetworkError) -> Self {
        match err {
            NetworkError::ApiError { status, .. } => FailureReason::GameNotFound(status),
            NetworkError::MissingSessionToken => FailureReason::MissingToken,
            NetworkError::SerdeJsonError(e) => {
                FailureReason::UnexpectedError(format!("malformed reservation body: {}", e))
            }
            other => FailureReason::TransportError(other.to_string()),
        }
    }

    fn transport(err: NetworkError) -> Self {
        FailureReason::TransportError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Joined,
    Failed(FailureReason),
}

impl Outcome {
    pub fn is_joined(&self) -> bool {
        matches!(self, Outcome::Joined)
    }
}

pub struct SessionClient<T: Transport> {
    transport: T,
    config: Arc<ClientConfig>,
    game_pin: u32,
    name: String,
    stage: Stage,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T, config: Arc<ClientConfig>, game_pin: u32, name: impl Into<String>) -> Self {
        Self {
            transport,
            config,
            game_pin,
            name: name.into(),
            stage: Stage::Init,
        }
    }

    /// Runs the whole join attempt and releases every resource it opened.
    pub async fn join(mut self) -> Outcome {
        info!("Joining game {} as {}", self.game_pin, self.name);

        let mut channel = None;
        let result = self.drive(&mut channel).await;

        if result.is_ok() && !self.config.linger.is_zero() {
            // give the server time to register the join before hanging up
            tokio::time::sleep(self.config.linger).await;
        }
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.transport.close().await;

        match result {
            Ok(()) => {
                info!("Successfully joined as {}", self.name);
                Outcome::Joined
            }
            Err(reason) => {
                let last = self.stage;
                self.stage = Stage::Failed;
                warn!("[{}] {} -> {} ({})", self.name, last, self.stage, reason);
                Outcome::Failed(reason)
            }
        }
    }

    async fn drive(&mut self, slot: &mut Option<T::Channel>) -> Result<(), FailureReason> {
        let reservation = self
            .transport
            .reserve(self.game_pin)
            .await
            .map_err(FailureReason::from_reservation)?;
        self.advance(Stage::TokenAcquired);

        let challenge = reservation
            .challenge
            .ok_or(FailureReason::ChallengeSolveFailed(ChallengeError::MissingChallenge))?;
        let connection_id = challenge_solver::solve_challenge(&reservation.session_token, &challenge)
            .map_err(FailureReason::ChallengeSolveFailed)?;
        debug!("[{}] Session ID: {}", self.name, connection_id);
        self.advance(Stage::ChallengeSolved);

        let opened = self
            .transport
            .open(self.game_pin, &connection_id)
            .await
            .map_err(FailureReason::transport)?;
        let channel = slot.insert(opened);
        self.advance(Stage::Connected);

        let reply = self.exchange(channel, cometd::handshake_request(), "handshake").await?;
        let client_id = successful_reply(reply)
            .and_then(|r| r.client_id.ok_or_else(|| "no clientId in reply".to_string()))
            .map_err(FailureReason::HandshakeFailed)?;
        debug!("[{}] Client ID: {}", self.name, client_id);
        self.advance(Stage::Handshaken);

        let reply = self.exchange(channel, cometd::connect_request(&client_id), "connect").await?;
        successful_reply(reply).map_err(FailureReason::ConnectFailed)?;
        self.advance(Stage::MetaConnected);

        let login = cometd::login_request(&client_id, self.game_pin, &self.config.host, &self.name);
        let reply = self.exchange(channel, login, "login").await?;
        successful_reply(reply).map_err(FailureReason::LoginFailed)?;
        self.advance(Stage::LoggedIn);

        let join = cometd::join_request(&client_id, self.game_pin, &self.config.host);
        let reply = self.exchange(channel, join, "join").await?;
        let confirmation = successful_reply(reply).map_err(FailureReason::JoinUnconfirmed)?;
        if !confirmation.is_on(CONTROLLER_CHANNEL) {
            return Err(FailureReason::JoinUnconfirmed(format!(
                "reply on channel {:?}",
                confirmation.channel
            )));
        }
        self.advance(Stage::Joined);
        Ok(())
    }

    /// Sends one request and waits for one reply; both together are bounded
    /// by `reply_timeout`.
    async fn exchange(
        &self,
        channel: &mut T::Channel,
        request: String,
        step: &str,
    ) -> Result<Option<Message>, FailureReason> {
        let round_trip = async {
            channel.send_text(request).await.map_err(FailureReason::transport)?;
            debug!("[{}] Sent {}", self.name, step);
            channel.recv().await.map_err(FailureReason::transport)
        };

        match tokio::time::timeout(self.config.reply_timeout, round_trip).await {
            Ok(received) => received,
            Err(_) => Err(FailureReason::TransportError(format!(
                "no {} reply within {:?}",
                step, self.config.reply_timeout
            ))),
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(), Some(next), "out-of-order stage transition");
        debug!("[{}] {} -> {}", self.name, self.stage, next);
        self.stage = next;
    }
}

/// Accepts only a text frame whose first message carries a truthy `successful`.
fn successful_reply(message: Option<Message>) -> Result<Reply, String> {
    let text = match message {
        Some(Message::Text(text)) => text,
        Some(other) => return Err(format!("unexpected non-text reply: {:?}", other)),
        None => return Err("connection closed before reply".to_string()),
    };
    let reply = Reply::parse(&text).map_err(|e| e.to_string())?;
    if reply.successful {
        Ok(reply)
    } else {
        Err(format!("unsuccessful reply: {}", text))
    }
}
