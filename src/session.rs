//! Participant side of the chat: an outbound link to the server and an inbound
//! listener for pushed envelopes, composed behind [`SessionEndpoint`].
//!
//! The two halves share no mutable state. The listener tells the endpoint about
//! a server shutdown through a channel; the endpoint applies it the next time
//! it is used, or as soon as [`SessionEndpoint::closed_by_server`] is awaited.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream, UdpSocket},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ds::envelope::{ACK, BYE, CLIENT, LOGIN, LOGOUT, WELCOME};
use ds::{split_control, ControlKind, DeliveryServiceError, Envelope, Exchange};

use crate::{config::SessionConfig, directory::PeerAddress, error::SessionError, ui::ChatUi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LoggedIn,
}

#[derive(Debug)]
enum ListenerEvent {
    ShutdownNotice,
}

/// Outbound half: one fresh connection per request.
#[derive(Debug, Clone)]
pub struct ServerLink {
    user_name: String,
    server_host: String,
    server_port: u16,
    timeout: Duration,
}

impl ServerLink {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            user_name: config.user_name.clone(),
            server_host: config.server_host.clone(),
            server_port: config.server_port,
            timeout: config.request_timeout,
        }
    }

    /// Local address of the route towards the server, i.e. the address the
    /// server can push back to. No packet is sent.
    pub async fn local_host(&self) -> Result<String, SessionError> {
        let server = tokio::net::lookup_host((self.server_host.as_str(), self.server_port))
            .await?
            .next()
            .ok_or_else(|| SessionError::UnresolvedHost(self.server_host.clone()))?;
        let unspecified: IpAddr = if server.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let probe = UdpSocket::bind((unspecified, 0)).await?;
        probe.connect(server).await?;
        Ok(probe.local_addr()?.ip().to_string())
    }

    /// Send one envelope and require a control reply whose body is `expected`.
    pub async fn send(
        &self,
        is_control: bool,
        recipients: Vec<String>,
        body: &str,
        expected: &str,
    ) -> Result<Envelope, SessionError> {
        let envelope = Envelope::new(is_control, self.user_name.as_str(), recipients, body);
        let reply = ds::request(
            (self.server_host.as_str(), self.server_port),
            envelope,
            self.timeout,
        )
        .await?;

        if reply.is_control_reply(expected) {
            Ok(reply)
        } else {
            Err(SessionError::UnexpectedReply {
                expected: expected.to_string(),
                received: reply.body,
            })
        }
    }
}

struct PushContext {
    user_name: String,
    ui: Arc<dyn ChatUi>,
    events: mpsc::UnboundedSender<ListenerEvent>,
    wait: Duration,
}

/// Inbound half: accepts envelopes pushed by the server.
///
/// The socket is only open while the accept loop runs; a stopped listener
/// refuses pushes instead of leaving them in the backlog.
struct PushListener {
    idle: Option<TcpListener>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
    bind_host: String,
    port: u16,
    context: Arc<PushContext>,
}

impl PushListener {
    /// Claim the first free port in `base_port + 1 ..= base_port + port_probes`.
    async fn bind(config: &SessionConfig, context: Arc<PushContext>) -> Result<Self, SessionError> {
        let first = config.base_port.saturating_add(1);
        for offset in 1..=config.port_probes {
            let Some(port) = config.base_port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((config.bind_host.as_str(), port)).await {
                Ok(listener) => {
                    info!("Push listener for {} bound on port {port}", context.user_name);
                    return Ok(Self {
                        idle: Some(listener),
                        running: None,
                        bind_host: config.bind_host.clone(),
                        port,
                        context,
                    });
                }
                Err(e) => debug!("Port {port} unavailable: {e}"),
            }
        }
        Err(SessionError::NoAvailablePort {
            first,
            attempts: config.port_probes,
        })
    }

    fn start(&mut self, listener: TcpListener) {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(listener, stop.clone(), self.context.clone()));
        self.running = Some((stop, handle));
    }

    /// Stop accepting and close the socket. The port is bound again on restart.
    async fn stop(&mut self) {
        self.idle = None;
        let Some((stop, handle)) = self.running.take() else {
            return;
        };
        stop.cancel();
        if let Err(e) = handle.await {
            error!("Push listener task failed: {e}");
        }
    }

    /// Make sure the accept loop runs, restarting it after a stop or a
    /// shutdown notice.
    async fn ensure_running(&mut self) -> Result<(), SessionError> {
        if let Some((stop, _)) = &self.running {
            if !stop.is_cancelled() {
                return Ok(());
            }
            self.stop().await;
        }

        let listener = match self.idle.take() {
            Some(listener) => listener,
            None => TcpListener::bind((self.bind_host.as_str(), self.port)).await?,
        };
        self.start(listener);
        Ok(())
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        if let Some((stop, _)) = &self.running {
            stop.cancel();
        }
    }
}

async fn accept_loop(listener: TcpListener, stop: CancellationToken, context: Arc<PushContext>) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let context = context.clone();
                    let stop = stop.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_push(&context, stream, &stop).await {
                            warn!("Push from {peer} failed: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Push listener stopped accepting: {e}");
                    break;
                }
            },
        }
    }
    debug!("Push listener for {} stopped", context.user_name);
}

async fn handle_push(
    context: &PushContext,
    stream: TcpStream,
    stop: &CancellationToken,
) -> Result<(), DeliveryServiceError> {
    let (envelope, exchange) = Exchange::accept(stream, context.wait).await?;
    exchange
        .reply(Envelope::ack(context.user_name.as_str()))
        .await?;

    if !envelope.is_control {
        context.ui.on_message(&envelope);
        return Ok(());
    }

    let (kind, text) = split_control(&envelope.body);
    let stripped = Envelope {
        body: text.to_string(),
        ..envelope.clone()
    };
    match kind {
        ControlKind::Users => {
            context.ui.on_presence_list(&envelope.recipients);
            context.ui.on_message(&stripped);
        }
        ControlKind::Shutdown => {
            info!("Server is shutting down, {} is logged off", context.user_name);
            context.ui.on_message(&stripped);
            context.ui.on_chat_enabled_changed(false);
            if context.events.send(ListenerEvent::ShutdownNotice).is_err() {
                debug!("Session of {} is gone, shutdown notice dropped", context.user_name);
            }
            stop.cancel();
        }
        ControlKind::Plain => context.ui.on_message(&envelope),
    }
    Ok(())
}

pub struct SessionEndpoint {
    link: ServerLink,
    listener: PushListener,
    advertised: PeerAddress,
    ui: Arc<dyn ChatUi>,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    state: SessionState,
}

impl SessionEndpoint {
    /// Claim a push port and start listening. The session starts disconnected.
    pub async fn bind(config: SessionConfig, ui: Arc<dyn ChatUi>) -> Result<Self, SessionError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let context = Arc::new(PushContext {
            user_name: config.user_name.clone(),
            ui: ui.clone(),
            events: events_tx,
            wait: config.request_timeout,
        });

        let mut listener = match PushListener::bind(&config, context).await {
            Ok(listener) => listener,
            Err(e) => {
                ui.on_message(&client_notice(e.to_string()));
                return Err(e);
            }
        };
        listener.ensure_running().await?;

        let link = ServerLink::new(&config);
        let host = match config.advertised_host {
            Some(host) => host,
            None => match link.local_host().await {
                Ok(host) => host,
                Err(e) => {
                    ui.on_message(&client_notice(e.to_string()));
                    return Err(e);
                }
            },
        };

        Ok(Self {
            advertised: PeerAddress::new(host, listener.port),
            link,
            listener,
            ui,
            events,
            state: SessionState::Disconnected,
        })
    }

    pub fn user_name(&self) -> &str {
        &self.link.user_name
    }

    pub fn local_port(&self) -> u16 {
        self.listener.port
    }

    pub fn advertised_address(&self) -> &PeerAddress {
        &self.advertised
    }

    pub fn state(&mut self) -> SessionState {
        self.drain_events();
        self.state
    }

    pub async fn login(&mut self) -> Result<(), SessionError> {
        self.drain_events();
        if let Err(e) = self.listener.ensure_running().await {
            return self.fail(e);
        }

        match self
            .link
            .send(true, self.advertised.to_login_recipients(), LOGIN, WELCOME)
            .await
        {
            Ok(_) => {
                info!("{} logged in from {}", self.user_name(), self.advertised);
                self.state = SessionState::LoggedIn;
                self.ui.on_chat_enabled_changed(true);
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    pub async fn logout(&mut self) -> Result<(), SessionError> {
        self.ui.on_message(&client_notice("Requesting logout..."));
        match self.link.send(true, Vec::new(), LOGOUT, BYE).await {
            Ok(_) => {
                info!("{} logged out", self.user_name());
                self.listener.stop().await;
                self.state = SessionState::Disconnected;
                self.ui.on_presence_list(&[]);
                self.ui.on_chat_enabled_changed(false);
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Send one envelope to the server and require the `expected` reply.
    pub async fn send(
        &mut self,
        is_control: bool,
        recipients: Vec<String>,
        body: &str,
        expected: &str,
    ) -> Result<Envelope, SessionError> {
        match self.link.send(is_control, recipients, body, expected).await {
            Ok(reply) => Ok(reply),
            Err(e) => self.fail(e),
        }
    }

    /// Send chat text; an empty recipient list reaches everybody else.
    pub async fn say(&mut self, recipients: Vec<String>, text: &str) -> Result<(), SessionError> {
        self.send(false, recipients, text, ACK).await.map(|_| ())
    }

    /// Resolves once the server has announced its shutdown. Cancel-safe.
    pub async fn closed_by_server(&mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                ListenerEvent::ShutdownNotice => {
                    self.state = SessionState::Disconnected;
                    return;
                }
            }
        }
        std::future::pending::<()>().await
    }

    /// Wait until the server announces its shutdown, or `wait` elapses.
    pub async fn wait_for_shutdown(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.closed_by_server())
            .await
            .is_ok()
    }

    /// Recipient list for a selection: picking nobody or everybody broadcasts.
    pub fn addressees(selected: &[String], available: &[String]) -> Vec<String> {
        let everyone = available.iter().all(|name| selected.contains(name));
        if selected.is_empty() || everyone {
            Vec::new()
        } else {
            selected.to_vec()
        }
    }

    /// Stop the push listener and release its port.
    pub async fn close(mut self) {
        self.listener.stop().await;
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                ListenerEvent::ShutdownNotice => self.state = SessionState::Disconnected,
            }
        }
    }

    fn fail<T>(&mut self, e: SessionError) -> Result<T, SessionError> {
        warn!("Session of {} failed: {e}", self.user_name());
        self.state = SessionState::Disconnected;
        self.ui.on_message(&client_notice(e.to_string()));
        Err(e)
    }
}

fn client_notice(text: impl Into<String>) -> Envelope {
    Envelope::control(CLIENT, Vec::new(), text)
}
