//! Seams between the join state machine and the network.
//!
//! A [`Transport`] is owned by exactly one session: it performs the
//! reservation request and opens the persistent [`Channel`]. Both are
//! released through their `close` methods, which take `self` so that a
//! resource can only be closed once.

#![allow(async_fn_in_trait)]

use tokio_tungstenite::tungstenite::Message;

use crate::network_client::NetworkError;

/// Result of the reservation request: the raw token header and the challenge
/// field of the body, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub session_token: String,
    pub challenge: Option<String>,
}

pub trait Transport {
    type Channel: Channel;

    async fn reserve(&mut self, game_pin: u32) -> Result<Reservation, NetworkError>;

    async fn open(&mut self, game_pin: u32, connection_id: &str) -> Result<Self::Channel, NetworkError>;

    async fn close(self);
}

pub trait Channel {
    async fn send_text(&mut self, text: String) -> Result<(), NetworkError>;

    /// Next inbound message, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Result<Option<Message>, NetworkError>;

    async fn close(self);
}
