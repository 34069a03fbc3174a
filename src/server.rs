//! Chat server: accepts one exchange per connection and drives the dispatcher.

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ds::envelope::{BYE, HOST, LOGIN, LOGOUT, WELCOME};
use ds::{Envelope, Exchange};

use crate::{
    config::ServerConfig,
    delivery::Delivery,
    directory::{PeerAddress, PresenceDirectory},
    dispatch::Dispatcher,
    error::ServerError,
    reaper::{IntervalScheduler, Reaper},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ChatServer {
    config: ServerConfig,
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    drift: Arc<Notify>,
}

impl ChatServer {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.bind_host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::BindError {
                addr: format!("{}:{}", config.bind_host, config.port),
                source,
            })?;

        let directory = Arc::new(PresenceDirectory::new());
        let drift = Arc::new(Notify::new());
        let delivery = Delivery::new(directory, drift.clone(), config.exchange_timeout);
        let dispatcher = Arc::new(Dispatcher::new(delivery));

        Ok(Self {
            config,
            listener,
            dispatcher,
            drift,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Cancel to stop the server; also cancelled by the shutdown command.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.dispatcher.shutdown_token()
    }

    /// Accept connections until shutdown. The reaper lives exactly as long.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = self.dispatcher.shutdown_token();
        let reaper = Reaper::new(
            self.dispatcher.clone(),
            IntervalScheduler::new(self.config.reaper_interval),
            self.drift.clone(),
        );
        let reaper_task = tokio::spawn(reaper.run(shutdown.child_token()));

        info!(
            "Felix {VERSION} chat server running on {} ({})",
            self.local_addr()?,
            self.config.server_name
        );

        let greeting: Arc<str> =
            format!("Welcome to Felix v{VERSION} @ {}", self.config.server_name).into();
        let wait = self.config.exchange_timeout;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = self.dispatcher.clone();
                        let greeting = greeting.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&dispatcher, stream, &greeting, wait).await {
                                debug!("Connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                },
            }
        }

        info!(">>> Shutting down.");
        if let Err(e) = reaper_task.await {
            error!("Reaper task failed: {e}");
        }
        Ok(())
    }
}

async fn handle_connection(
    dispatcher: &Dispatcher,
    stream: TcpStream,
    greeting: &str,
    wait: Duration,
) -> Result<(), ServerError> {
    let (envelope, exchange) = Exchange::accept(stream, wait).await?;

    if !envelope.is_control {
        exchange.reply(Envelope::ack(HOST)).await?;
        let report = dispatcher.dispatch(envelope).await;
        debug!("Dispatch finished: {report:?}");
        return Ok(());
    }

    match envelope.body.as_str() {
        LOGIN => login(dispatcher, envelope, exchange, greeting).await,
        LOGOUT => logout(dispatcher, envelope, exchange).await,
        other => {
            warn!(
                "Ignoring control request {other:?} from {} ({:?})",
                envelope.sender,
                exchange.peer()
            );
            Ok(())
        }
    }
}

async fn login(
    dispatcher: &Dispatcher,
    envelope: Envelope,
    exchange: Exchange,
    greeting: &str,
) -> Result<(), ServerError> {
    let name = envelope.sender;
    let address = match PeerAddress::from_login_recipients(&envelope.recipients) {
        Ok(address) => address,
        Err(e) => {
            warn!("Refused login from {name}: {e}");
            exchange
                .reply(Envelope::control(HOST, Vec::new(), e.to_string()))
                .await?;
            return Ok(());
        }
    };

    dispatcher.register_participant(&name, address).await;
    exchange
        .reply(Envelope::control(HOST, Vec::new(), WELCOME))
        .await?;

    dispatcher.broadcast_presence(Some(&name), true).await;
    dispatcher
        .notify(&name, &Envelope::control(HOST, vec![name.clone()], greeting))
        .await;
    Ok(())
}

async fn logout(
    dispatcher: &Dispatcher,
    envelope: Envelope,
    exchange: Exchange,
) -> Result<(), ServerError> {
    let name = envelope.sender;
    exchange.reply(Envelope::control(HOST, Vec::new(), BYE)).await?;

    dispatcher.remove_participant(&name).await;
    dispatcher.broadcast_presence(Some(&name), false).await;
    Ok(())
}
