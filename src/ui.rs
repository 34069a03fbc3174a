//! User-interface collaborator consumed by a session.
//!
//! The session only calls these three methods; how (or whether) anything gets
//! rendered is up to the implementation.

use chrono::Local;
use parking_lot::Mutex;

use ds::Envelope;

pub trait ChatUi: Send + Sync {
    /// A chat message, or a displayable system message, arrived.
    fn on_message(&self, envelope: &Envelope);

    /// The full list of logged-in participants changed.
    fn on_presence_list(&self, names: &[String]);

    /// Typing and sending should be turned on or off.
    fn on_chat_enabled_changed(&self, enabled: bool);
}

#[derive(Debug, Default)]
struct SilentUiState {
    chat_enabled: bool,
    users: Vec<String>,
    last_message: Option<Envelope>,
}

/// Renders nothing and remembers the latest of each callback.
#[derive(Debug, Default)]
pub struct SilentUi {
    state: Mutex<SilentUiState>,
}

impl SilentUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_chat_enabled(&self) -> bool {
        self.state.lock().chat_enabled
    }

    pub fn users(&self) -> Vec<String> {
        self.state.lock().users.clone()
    }

    pub fn last_message(&self) -> Option<Envelope> {
        self.state.lock().last_message.clone()
    }
}

impl ChatUi for SilentUi {
    fn on_message(&self, envelope: &Envelope) {
        self.state.lock().last_message = Some(envelope.clone());
    }

    fn on_presence_list(&self, names: &[String]) {
        self.state.lock().users = names.to_vec();
    }

    fn on_chat_enabled_changed(&self, enabled: bool) {
        self.state.lock().chat_enabled = enabled;
    }
}

/// Line-oriented terminal rendering for the console client.
pub struct ConsoleUi {
    user_name: String,
    /// Everyone else currently logged in.
    others: Mutex<Vec<String>>,
}

impl ConsoleUi {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            others: Mutex::new(Vec::new()),
        }
    }

    pub fn others(&self) -> Vec<String> {
        self.others.lock().clone()
    }
}

impl ChatUi for ConsoleUi {
    fn on_message(&self, envelope: &Envelope) {
        let at = envelope.sent_at.with_timezone(&Local).format("%H:%M:%S");
        if envelope.is_control {
            println!("[{at}] *** {}", envelope.body);
        } else if envelope.recipients.is_empty() {
            println!("[{at}] <{}> {}", envelope.sender, envelope.body);
        } else {
            println!(
                "[{at}] <{} to {}> {}",
                envelope.sender,
                envelope.recipients.join(", "),
                envelope.body
            );
        }
    }

    fn on_presence_list(&self, names: &[String]) {
        let others: Vec<String> = names
            .iter()
            .filter(|name| **name != self.user_name)
            .cloned()
            .collect();
        if others.is_empty() {
            println!("*** nobody else is here");
        } else {
            println!("*** online: {}", others.join(", "));
        }
        *self.others.lock() = others;
    }

    fn on_chat_enabled_changed(&self, enabled: bool) {
        if enabled {
            println!("*** chat enabled, type /help for commands");
        } else {
            println!("*** chat disabled");
        }
    }
}
