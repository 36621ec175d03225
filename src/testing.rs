//! Scripted in-memory transport shared by the session and batch tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::network_client::NetworkError;
use crate::transport::{Channel, Reservation, Transport};

pub enum Script {
    Reply(Message),
    Closed,
    Fail,
    Hang,
}

#[derive(Debug, Default)]
pub struct Log {
    pub sent: Vec<String>,
    pub opened: Vec<(u32, String)>,
    pub transport_closed: u32,
    pub channel_closed: u32,
}

#[derive(Default)]
struct Plan {
    reservation: Option<Result<Reservation, NetworkError>>,
    open_fails: bool,
    panics: bool,
    sends_before_stall: Option<usize>,
    replies: VecDeque<Script>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    pub log: Rc<RefCell<Log>>,
    plan: Rc<RefCell<Plan>>,
}

impl MockTransport {
    pub fn with_replies(replies: Vec<Script>) -> Self {
        let transport = MockTransport::default();
        transport.plan.borrow_mut().replies = replies.into();
        transport
    }

    /// Scripted for a complete, successful join.
    pub fn joining() -> Self {
        Self::with_replies(vec![
            Script::Reply(success_reply("/meta/handshake", Some("client-1"))),
            Script::Reply(success_reply("/meta/connect", None)),
            Script::Reply(success_reply("/service/controller", None)),
            Script::Reply(success_reply("/service/controller", None)),
        ])
    }

    pub fn set_reservation(&self, reservation: Result<Reservation, NetworkError>) {
        self.plan.borrow_mut().reservation = Some(reservation);
    }

    pub fn fail_open(&self) {
        self.plan.borrow_mut().open_fails = true;
    }

    pub fn panic_on_reserve(&self) {
        self.plan.borrow_mut().panics = true;
    }

    /// Lets `sends` frames through, then every further send never completes.
    pub fn stall_sends_after(&self, sends: usize) {
        self.plan.borrow_mut().sends_before_stall = Some(sends);
    }
}

/// Token "QUI=" ("AB") with offset 3 and cipher input "AB" gives "r7".
pub fn solvable_reservation() -> Reservation {
    Reservation {
        session_token: "QUI=".to_string(),
        challenge: Some("decode.call(this, 'AB'); function decode(m) { var offset = \t(1 + 2)\t; }".to_string()),
    }
}

impl Transport for MockTransport {
    type Channel = MockChannel;

    async fn reserve(&mut self, _game_pin: u32) -> Result<Reservation, NetworkError> {
        let mut plan = self.plan.borrow_mut();
        if plan.panics {
            panic!("simulated transport fault");
        }
        plan.reservation.take().unwrap_or_else(|| Ok(solvable_reservation()))
    }

    async fn open(&mut self, game_pin: u32, connection_id: &str) -> Result<MockChannel, NetworkError> {
        let mut plan = self.plan.borrow_mut();
        if plan.open_fails {
            return Err(NetworkError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)));
        }
        self.log.borrow_mut().opened.push((game_pin, connection_id.to_string()));
        Ok(MockChannel {
            log: self.log.clone(),
            sends_before_stall: plan.sends_before_stall,
            replies: std::mem::take(&mut plan.replies),
        })
    }

    async fn close(self) {
        self.log.borrow_mut().transport_closed += 1;
    }
}

pub struct MockChannel {
    log: Rc<RefCell<Log>>,
    sends_before_stall: Option<usize>,
    replies: VecDeque<Script>,
}

impl Channel for MockChannel {
    async fn send_text(&mut self, text: String) -> Result<(), NetworkError> {
        match self.sends_before_stall {
            Some(0) => std::future::pending().await,
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        self.log.borrow_mut().sent.push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Message>, NetworkError> {
        match self.replies.pop_front() {
            Some(Script::Reply(message)) => Ok(Some(message)),
            Some(Script::Closed) | None => Ok(None),
            Some(Script::Fail) => Err(NetworkError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset))),
            Some(Script::Hang) => std::future::pending().await,
        }
    }

    async fn close(self) {
        self.log.borrow_mut().channel_closed += 1;
    }
}

pub fn success_reply(channel: &str, client_id: Option<&str>) -> Message {
    let mut message = serde_json::json!({"channel": channel, "successful": true});
    if let Some(id) = client_id {
        message["clientId"] = id.into();
    }
    Message::Text(serde_json::json!([message]).to_string())
}

pub fn failure_reply(channel: &str) -> Message {
    Message::Text(serde_json::json!([{"channel": channel, "successful": false}]).to_string())
}

pub fn binary() -> Message {
    Message::Binary(vec![1, 2, 3])
}

pub fn test_config() -> Arc<ClientConfig> {
    Arc::new(ClientConfig {
        reply_timeout: Duration::from_millis(50),
        linger: Duration::ZERO,
        ..ClientConfig::default()
    })
}

/// The HTTP side is released exactly once, and so is the channel if one was opened.
pub fn assert_released_once(transport: &MockTransport) {
    let log = transport.log.borrow();
    assert_eq!(log.transport_closed, 1, "{:?}", log);
    assert_eq!(log.channel_closed as usize, log.opened.len(), "{:?}", log);
}
