//! Push one envelope to one participant. The first failed push evicts it.

use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::{debug, warn};

use ds::Envelope;

use crate::{
    directory::{PeerAddress, PresenceDirectory},
    error::PushError,
};

#[derive(Clone)]
pub struct Delivery {
    directory: Arc<PresenceDirectory>,
    /// Woken on every eviction so the reaper can re-broadcast presence.
    drift: Arc<Notify>,
    timeout: Duration,
}

impl Delivery {
    pub fn new(directory: Arc<PresenceDirectory>, drift: Arc<Notify>, timeout: Duration) -> Self {
        Self {
            directory,
            drift,
            timeout,
        }
    }

    pub fn directory(&self) -> &Arc<PresenceDirectory> {
        &self.directory
    }

    /// Deliver `envelope` to `name` and report whether it was acknowledged.
    ///
    /// An unknown name is only logged. A known name that fails to acknowledge
    /// is evicted from the directory; there is no second attempt.
    pub async fn deliver(&self, name: &str, envelope: &Envelope) -> bool {
        let Some(address) = self.directory.lookup(name) else {
            warn!("Can not route message to: {name}");
            return false;
        };

        match self.push(&address, envelope.clone()).await {
            Ok(()) => {
                debug!("Delivered to {name} at {address}");
                true
            }
            Err(e) => {
                warn!("Sniped user {name} at {address}: {e}");
                if self.directory.evict(name, &address) {
                    self.drift.notify_one();
                }
                false
            }
        }
    }

    async fn push(&self, address: &PeerAddress, envelope: Envelope) -> Result<(), PushError> {
        let reply = ds::request((address.host.as_str(), address.port), envelope, self.timeout).await?;
        if reply.is_ack() {
            Ok(())
        } else {
            Err(PushError::NotAcknowledged(reply.body))
        }
    }
}
