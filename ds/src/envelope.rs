//! This module contains the envelope exchanged between Felix participants and
//! the server, together with the reserved control vocabulary.
//!
//! An [`Envelope`] is either a chat message or a control message:
//!  - chat: `body` is user text, `recipients` lists the addressees (empty means
//!    every logged-in participant except the sender)
//!  - control: `body` is one of the reserved tokens below, or starts with one of
//!    the reserved prefixes; `recipients` is reused for structured payloads
//!    - `login`: `[host, port]` of the sender's push listener
//!    - `{$USERS}...`: the full list of logged-in participants
//!

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Sender identity of every server-originated envelope.
pub const HOST: &str = "host";
/// The only identity allowed to issue [`SHUTDOWN_COMMAND`].
pub const HOST_ADMIN: &str = "host::admin";
/// Sender identity of notices produced locally by a session.
pub const CLIENT: &str = "client";

pub const LOGIN: &str = "login";
pub const WELCOME: &str = "welcome";
pub const LOGOUT: &str = "logout";
pub const BYE: &str = "bye";
pub const ACK: &str = "ack";
pub const USERS_PREFIX: &str = "{$USERS}";
pub const SHUTDOWN_PREFIX: &str = "{$SHUTDOWN}";
pub const SHUTDOWN_COMMAND: &str = "shutdown::immediate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "control")]
    pub is_control: bool,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub body: String,
}

impl Envelope {
    pub fn new(
        is_control: bool,
        sender: impl Into<String>,
        recipients: Vec<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            is_control,
            sender: sender.into(),
            recipients,
            sent_at: Utc::now(),
            body: body.into(),
        }
    }

    pub fn chat(sender: impl Into<String>, recipients: Vec<String>, body: impl Into<String>) -> Self {
        Self::new(false, sender, recipients, body)
    }

    pub fn control(
        sender: impl Into<String>,
        recipients: Vec<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(true, sender, recipients, body)
    }

    /// The reply every receiver writes back once it has read a pushed envelope.
    pub fn ack(sender: impl Into<String>) -> Self {
        Self::control(sender, Vec::new(), ACK)
    }

    /// True for a control envelope whose body is exactly `token`.
    pub fn is_control_reply(&self, token: &str) -> bool {
        self.is_control && self.body == token
    }

    pub fn is_ack(&self) -> bool {
        self.is_control_reply(ACK)
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_control { "control" } else { "chat" };
        write!(
            f,
            "[{kind}] {} -> {:?} @ {}: {}",
            self.sender,
            self.recipients,
            self.sent_at.to_rfc3339(),
            self.body
        )
    }
}

/// Sub-kind of a control body, derived from its reserved prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Presence snapshot, `recipients` carries every logged-in name.
    Users,
    /// The server is terminating.
    Shutdown,
    /// Displayable system message.
    Plain,
}

/// Classify a control body and return the text that follows its prefix.
pub fn split_control(body: &str) -> (ControlKind, &str) {
    if let Some(text) = body.strip_prefix(USERS_PREFIX) {
        (ControlKind::Users, text)
    } else if let Some(text) = body.strip_prefix(SHUTDOWN_PREFIX) {
        (ControlKind::Shutdown, text)
    } else {
        (ControlKind::Plain, body)
    }
}
