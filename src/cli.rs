use clap::{Parser, Subcommand};

use crate::config::{DEFAULT_REAPER_INTERVAL, DEFAULT_SERVER_PORT};

#[derive(Parser, Debug)]
#[command(version, about = "Felix chat server and console client", long_about = None)]
pub struct Args {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, env = "FELIX_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Run the chat server
    Server {
        #[arg(short, long, env = "FELIX_PORT", default_value_t = DEFAULT_SERVER_PORT)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Name shown in the greeting
        #[arg(long, env = "FELIX_SERVER_NAME", default_value = "localhost")]
        name: String,
        /// Seconds between stale-presence checks
        #[arg(long, default_value_t = DEFAULT_REAPER_INTERVAL.as_secs())]
        reaper_secs: u64,
    },
    /// Ask a running server to shut down
    Shutdown {
        #[arg(long, env = "FELIX_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, env = "FELIX_PORT", default_value_t = DEFAULT_SERVER_PORT)]
        port: u16,
    },
    /// Chat from the terminal
    Client {
        #[arg(short, long, env = "FELIX_USER")]
        user: String,
        #[arg(long, env = "FELIX_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, env = "FELIX_PORT", default_value_t = DEFAULT_SERVER_PORT)]
        port: u16,
        /// Host the server should push messages to, instead of the local
        /// address used to reach it
        #[arg(long, env = "FELIX_ADVERTISE")]
        advertise: Option<String>,
    },
}

/// One line typed into the console client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `@a,b text` for named recipients, plain text for everybody.
    Say { recipients: Vec<String>, text: String },
    Users,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub const CONSOLE_HELP: &str = "@name[,name...] text  message selected users\n\
text                   message everybody\n\
/users                 list who is online\n\
/quit                  log out and exit";

pub fn parse_console_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }

    if let Some(command) = line.strip_prefix('/') {
        return match command.trim() {
            "quit" | "exit" => ConsoleCommand::Quit,
            "users" => ConsoleCommand::Users,
            "help" => ConsoleCommand::Help,
            other => ConsoleCommand::Unknown(other.to_string()),
        };
    }

    if let Some(addressed) = line.strip_prefix('@') {
        let (names, text) = addressed.split_once(char::is_whitespace).unwrap_or((addressed, ""));
        let recipients: Vec<String> = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return ConsoleCommand::Empty;
        }
        return ConsoleCommand::Say {
            recipients,
            text: text.to_string(),
        };
    }

    ConsoleCommand::Say {
        recipients: Vec::new(),
        text: line.to_string(),
    }
}
