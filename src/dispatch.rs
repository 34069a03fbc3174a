//! Dispatch engine: routes chat envelopes, broadcasts presence and handles the
//! administrative shutdown.
//!
//! Dispatching, presence broadcasts, logins and logouts all run inside one
//! critical section, so the recipient set cannot change while an envelope is
//! being fanned out.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ds::envelope::{HOST, HOST_ADMIN, SHUTDOWN_COMMAND, SHUTDOWN_PREFIX, USERS_PREFIX};
use ds::Envelope;

use crate::{
    delivery::Delivery,
    directory::{PeerAddress, PresenceDirectory},
};

pub const LOST_NOTICE: &str = "Your message has been lost (in space).";
pub const SHUTDOWN_NOTICE: &str =
    "Server shutdown initiated by the administrator. You will be logged off!";
pub const GHOSTS_NOTICE: &str = "Ghost users have vanished...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The sender is not logged in; nothing was sent.
    Rejected,
    /// At least one recipient acknowledged; the sender got the echo.
    Delivered(Vec<String>),
    /// Nobody acknowledged; the sender got the lost notice.
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub status: DispatchStatus,
    /// The envelope was the administrative shutdown command.
    pub shutdown: bool,
}

pub struct Dispatcher {
    directory: Arc<PresenceDirectory>,
    delivery: Delivery,
    gate: AsyncMutex<()>,
    /// Names present when the last presence broadcast started.
    last_broadcast: Mutex<Option<BTreeSet<String>>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            directory: delivery.directory().clone(),
            delivery,
            gate: AsyncMutex::new(()),
            last_broadcast: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn directory(&self) -> &Arc<PresenceDirectory> {
        &self.directory
    }

    /// Cancelled once the shutdown command has been dispatched.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn register_participant(&self, name: &str, address: PeerAddress) -> Option<PeerAddress> {
        let _gate = self.gate.lock().await;
        let previous = self.directory.register(name, address.clone());
        match previous {
            None => info!("New login: {name} at {address}"),
            Some(_) => info!("Login re-used: {name} at {address}"),
        }
        previous
    }

    pub async fn remove_participant(&self, name: &str) -> bool {
        let _gate = self.gate.lock().await;
        let removed = self.directory.unregister(name).is_some();
        if removed {
            info!("Bye to: {name}");
        }
        removed
    }

    /// Push a single server-originated envelope to `name`.
    pub async fn notify(&self, name: &str, envelope: &Envelope) -> bool {
        let _gate = self.gate.lock().await;
        self.delivery.deliver(name, envelope).await
    }

    pub async fn dispatch(&self, mut envelope: Envelope) -> DispatchReport {
        let _gate = self.gate.lock().await;

        let origin = envelope.sender.clone();
        if !self.directory.contains(&origin) {
            warn!("Rejected message from: {origin}");
            return DispatchReport {
                status: DispatchStatus::Rejected,
                shutdown: false,
            };
        }

        let shutdown = is_shutdown_command(&envelope);
        if shutdown {
            info!("Shutdown requested by {origin}");
            // everyone, the administrator included, is told to log off
            envelope = Envelope::control(
                HOST,
                Vec::new(),
                format!("{SHUTDOWN_PREFIX}{SHUTDOWN_NOTICE}"),
            );
        }

        let targets = self.resolve_recipients(&envelope);
        let mut delivered = Vec::with_capacity(targets.len());
        for name in &targets {
            if self.delivery.deliver(name, &envelope).await {
                delivered.push(name.clone());
            }
        }

        let status = if delivered.is_empty() {
            let notice = Envelope::control(HOST, envelope.recipients.clone(), LOST_NOTICE);
            self.delivery.deliver(&origin, &notice).await;
            DispatchStatus::Lost
        } else {
            if !targets.contains(&origin) {
                self.delivery.deliver(&origin, &envelope).await;
            }
            DispatchStatus::Delivered(delivered)
        };

        if shutdown {
            self.shutdown.cancel();
        }
        DispatchReport { status, shutdown }
    }

    /// Push the current participant list to every participant.
    ///
    /// `changed` names who joined or left; `None` announces a drift repair.
    /// Returns how many participants acknowledged.
    pub async fn broadcast_presence(&self, changed: Option<&str>, joined: bool) -> usize {
        let _gate = self.gate.lock().await;

        let names = self.directory.snapshot_names();
        *self.last_broadcast.lock() = Some(names.clone());

        let body = presence_notice(changed, joined);
        let mut reached = 0;
        for name in &names {
            // evictions during the loop shrink the list sent to the next ones
            let notice = Envelope::control(HOST, self.directory.names(), body.clone());
            if self.delivery.deliver(name, &notice).await {
                reached += 1;
            }
        }
        debug!("Presence broadcast reached {reached}/{} participant(s)", names.len());
        reached
    }

    /// True when the directory no longer matches the last broadcast snapshot.
    pub fn presence_drifted(&self) -> bool {
        match self.last_broadcast.lock().as_ref() {
            Some(previous) => *previous != self.directory.snapshot_names(),
            None => false,
        }
    }

    fn resolve_recipients(&self, envelope: &Envelope) -> Vec<String> {
        if envelope.recipients.is_empty() {
            return self
                .directory
                .names()
                .into_iter()
                .filter(|name| *name != envelope.sender)
                .collect();
        }

        let mut seen = HashSet::new();
        envelope
            .recipients
            .iter()
            .filter(|name| **name != envelope.sender)
            .filter(|name| {
                let known = self.directory.contains(name);
                if !known {
                    debug!("Skipping unknown recipient {name}");
                }
                known
            })
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }
}

fn is_shutdown_command(envelope: &Envelope) -> bool {
    envelope.sender == HOST_ADMIN
        && envelope.recipients.len() == 1
        && envelope.recipients[0] == HOST
        && envelope.body == SHUTDOWN_COMMAND
}

pub fn presence_notice(changed: Option<&str>, joined: bool) -> String {
    match changed {
        Some(name) => {
            let verb = if joined { "joined" } else { "left" };
            format!("{USERS_PREFIX}{name} has {verb} the chat.")
        }
        None => format!("{USERS_PREFIX}{GHOSTS_NOTICE}"),
    }
}
