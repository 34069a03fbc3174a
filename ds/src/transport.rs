//! Both sides of a single request/reply exchange over TCP.

use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::{envelope::Envelope, wire::EnvelopeCodec, DeliveryServiceError};

/// Bounded wait applied to every exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a connection to `addr`, write `envelope` and wait for exactly one reply.
///
/// Connecting and reading the reply are each bounded by `wait`. The connection
/// is closed when this returns, whatever the outcome.
pub async fn request<A: ToSocketAddrs>(
    addr: A,
    envelope: Envelope,
    wait: Duration,
) -> Result<Envelope, DeliveryServiceError> {
    let stream = tokio::time::timeout(wait, TcpStream::connect(addr))
        .await
        .map_err(|_| DeliveryServiceError::Timeout(wait))??;
    let mut framed = Framed::new(stream, EnvelopeCodec::new());

    trace!("raw envelope out: {envelope}");
    framed.send(envelope).await?;

    match tokio::time::timeout(wait, framed.next()).await {
        Ok(Some(reply)) => {
            let reply = reply?;
            trace!("raw envelope in: {reply}");
            Ok(reply)
        }
        Ok(None) => Err(DeliveryServiceError::ConnectionClosed),
        Err(_) => Err(DeliveryServiceError::Timeout(wait)),
    }
}

/// Answering side of an exchange: the request has been read, the reply is owed.
pub struct Exchange {
    framed: Framed<TcpStream, EnvelopeCodec>,
    peer: Option<SocketAddr>,
}

impl Exchange {
    /// Read the single request envelope from a freshly accepted connection.
    pub async fn accept(
        stream: TcpStream,
        wait: Duration,
    ) -> Result<(Envelope, Exchange), DeliveryServiceError> {
        let peer = stream.peer_addr().ok();
        let mut framed = Framed::new(stream, EnvelopeCodec::new());

        match tokio::time::timeout(wait, framed.next()).await {
            Ok(Some(request)) => {
                let request = request?;
                trace!("raw envelope in from {peer:?}: {request}");
                Ok((request, Exchange { framed, peer }))
            }
            Ok(None) => Err(DeliveryServiceError::ConnectionClosed),
            Err(_) => Err(DeliveryServiceError::Timeout(wait)),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Write the reply and close the connection.
    pub async fn reply(mut self, envelope: Envelope) -> Result<(), DeliveryServiceError> {
        trace!("raw envelope out to {:?}: {envelope}", self.peer);
        self.framed.send(envelope).await?;
        Ok(())
    }
}
