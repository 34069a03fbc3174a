pub mod admin;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod dispatch;
pub mod logging;
pub mod reaper;
pub mod server;
pub mod session;
pub mod ui;

mod error;

pub use error::{DirectoryError, PushError, ServerError, SessionError};

pub use config::{ServerConfig, SessionConfig};
pub use directory::{PeerAddress, PresenceDirectory};
pub use dispatch::{DispatchReport, DispatchStatus, Dispatcher};
pub use server::ChatServer;
pub use session::{SessionEndpoint, SessionState};
pub use ui::{ChatUi, ConsoleUi, SilentUi};
