use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Notify},
    task::JoinHandle,
};

use ds::envelope::{HOST, HOST_ADMIN, SHUTDOWN_COMMAND, SHUTDOWN_PREFIX};
use ds::{Envelope, Exchange, DEFAULT_EXCHANGE_TIMEOUT};
use felix::{
    delivery::Delivery,
    dispatch::{DispatchStatus, Dispatcher, LOST_NOTICE},
    PeerAddress, PresenceDirectory,
};

/// A participant listener that records every pushed envelope and acks it.
struct Peer {
    address: PeerAddress,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    _task: JoinHandle<()>,
}

impl Peer {
    async fn spawn(name: &str) -> Self {
        Self::spawn_with_delay(name, Duration::ZERO).await
    }

    /// Like `spawn`, but holds every ack back for `delay`.
    async fn spawn_with_delay(name: &str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind peer listener");
        let port = listener
            .local_addr()
            .expect("Failed to read peer address")
            .port();
        let (tx, inbox) = mpsc::unbounded_channel();
        let name = name.to_string();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok((envelope, exchange)) =
                    Exchange::accept(stream, DEFAULT_EXCHANGE_TIMEOUT).await
                {
                    // recorded before the ack so the dispatcher never outruns the inbox
                    let _ = tx.send(envelope);
                    tokio::time::sleep(delay).await;
                    let _ = exchange.reply(Envelope::ack(name.as_str())).await;
                }
            }
        });

        Self {
            address: PeerAddress::new("127.0.0.1", port),
            inbox,
            _task: task,
        }
    }

    fn take(&mut self) -> Envelope {
        self.inbox.try_recv().expect("Peer received nothing")
    }

    fn is_idle(&mut self) -> bool {
        self.inbox.try_recv().is_err()
    }
}

/// An address nobody listens on.
async fn dead_address() -> PeerAddress {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let port = listener
        .local_addr()
        .expect("Failed to read probe address")
        .port();
    drop(listener);
    PeerAddress::new("127.0.0.1", port)
}

fn dispatcher() -> (Arc<Dispatcher>, Arc<Notify>) {
    let directory = Arc::new(PresenceDirectory::new());
    let drift = Arc::new(Notify::new());
    let delivery = Delivery::new(directory, drift.clone(), Duration::from_secs(2));
    (Arc::new(Dispatcher::new(delivery)), drift)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_broadcast_is_echoed_to_sender() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    let mut bob = Peer::spawn("bob").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", bob.address.clone()).await;

    let report = dispatcher
        .dispatch(Envelope::chat("alice", vec![], "hi"))
        .await;
    assert_eq!(report.status, DispatchStatus::Delivered(names(&["bob"])));
    assert!(!report.shutdown);

    let at_bob = bob.take();
    assert_eq!(at_bob.sender, "alice");
    assert_eq!(at_bob.body, "hi");
    assert!(!at_bob.is_control);

    // the echo is the very same envelope
    assert_eq!(alice.take(), at_bob);
    assert!(alice.is_idle());
    assert!(bob.is_idle());
}

#[tokio::test]
async fn test_unknown_recipient_yields_lost_notice() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;

    let report = dispatcher
        .dispatch(Envelope::chat("alice", names(&["carol"]), "are you there?"))
        .await;
    assert_eq!(report.status, DispatchStatus::Lost);

    let notice = alice.take();
    assert!(notice.is_control);
    assert_eq!(notice.sender, HOST);
    assert_eq!(notice.body, LOST_NOTICE);
    assert_eq!(notice.recipients, names(&["carol"]));
    assert!(alice.is_idle());
}

#[tokio::test]
async fn test_unreachable_recipients_are_evicted() {
    let (dispatcher, drift) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", dead_address().await).await;
    dispatcher.register_participant("carol", dead_address().await).await;

    let report = dispatcher
        .dispatch(Envelope::chat("alice", names(&["bob", "carol"]), "ping"))
        .await;
    assert_eq!(report.status, DispatchStatus::Lost);

    // exactly one failure envelope
    assert_eq!(alice.take().body, LOST_NOTICE);
    assert!(alice.is_idle());

    assert_eq!(dispatcher.directory().names(), names(&["alice"]));
    tokio::time::timeout(Duration::from_secs(1), drift.notified())
        .await
        .expect("Eviction did not signal drift");
}

#[tokio::test]
async fn test_unregistered_sender_is_rejected() {
    let (dispatcher, _) = dispatcher();
    let mut bob = Peer::spawn("bob").await;
    dispatcher.register_participant("bob", bob.address.clone()).await;

    let report = dispatcher
        .dispatch(Envelope::chat("mallory", vec![], "let me in"))
        .await;
    assert_eq!(report.status, DispatchStatus::Rejected);
    assert!(bob.is_idle());
}

#[tokio::test]
async fn test_targeted_recipients_are_deduplicated() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    let mut bob = Peer::spawn("bob").await;
    let mut carol = Peer::spawn("carol").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", bob.address.clone()).await;
    dispatcher.register_participant("carol", carol.address.clone()).await;

    let recipients = names(&["bob", "bob", "alice"]);
    let report = dispatcher
        .dispatch(Envelope::chat("alice", recipients.clone(), "just you"))
        .await;
    assert_eq!(report.status, DispatchStatus::Delivered(names(&["bob"])));

    assert_eq!(bob.take().body, "just you");
    assert!(bob.is_idle());
    assert!(carol.is_idle());

    let echo = alice.take();
    assert_eq!(echo.recipients, recipients);
    assert!(alice.is_idle());
}

#[tokio::test]
async fn test_presence_broadcast_excludes_evicted() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    let mut bob = Peer::spawn("bob").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", bob.address.clone()).await;
    dispatcher.register_participant("carol", dead_address().await).await;

    assert!(!dispatcher.presence_drifted());
    let reached = dispatcher.broadcast_presence(Some("bob"), true).await;
    assert_eq!(reached, 2);

    let at_alice = alice.take();
    assert!(at_alice.is_control);
    assert_eq!(at_alice.body, "{$USERS}bob has joined the chat.");
    assert_eq!(at_alice.recipients, names(&["alice", "bob", "carol"]));
    assert_eq!(bob.take().body, "{$USERS}bob has joined the chat.");

    // carol failed at the end of the fan-out
    assert!(dispatcher.presence_drifted());

    dispatcher.broadcast_presence(None, false).await;
    let repaired = alice.take();
    assert_eq!(repaired.recipients, names(&["alice", "bob"]));
    assert_eq!(repaired.body, "{$USERS}Ghost users have vanished...");
    assert_eq!(bob.take().recipients, names(&["alice", "bob"]));
    assert!(!dispatcher.presence_drifted());
}

#[tokio::test]
async fn test_admin_shutdown_reaches_everyone() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    let mut bob = Peer::spawn("bob").await;
    let mut admin = Peer::spawn(HOST_ADMIN).await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", bob.address.clone()).await;
    dispatcher.register_participant(HOST_ADMIN, admin.address.clone()).await;

    let token = dispatcher.shutdown_token();
    assert!(!token.is_cancelled());

    let report = dispatcher
        .dispatch(Envelope::chat(HOST_ADMIN, names(&[HOST]), SHUTDOWN_COMMAND))
        .await;
    assert!(report.shutdown);
    assert_eq!(
        report.status,
        DispatchStatus::Delivered(names(&["alice", "bob", HOST_ADMIN]))
    );

    for peer in [&mut alice, &mut bob, &mut admin] {
        let notice = peer.take();
        assert!(notice.is_control);
        assert_eq!(notice.sender, HOST);
        assert!(notice.body.starts_with(SHUTDOWN_PREFIX));
        assert!(peer.is_idle());
    }
    assert!(token.is_cancelled());
    assert!(dispatcher.is_shutting_down());
}

#[tokio::test]
async fn test_shutdown_command_from_participant_is_plain_chat() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;

    let report = dispatcher
        .dispatch(Envelope::chat("alice", names(&[HOST]), SHUTDOWN_COMMAND))
        .await;
    assert!(!report.shutdown);
    assert_eq!(report.status, DispatchStatus::Lost);
    assert_eq!(alice.take().body, LOST_NOTICE);
    assert!(!dispatcher.is_shutting_down());
}

#[tokio::test]
async fn test_fan_out_excludes_concurrent_logins() {
    let (dispatcher, _) = dispatcher();
    let mut alice = Peer::spawn("alice").await;
    let mut bob = Peer::spawn_with_delay("bob", Duration::from_millis(500)).await;
    let mut carol = Peer::spawn("carol").await;
    dispatcher.register_participant("alice", alice.address.clone()).await;
    dispatcher.register_participant("bob", bob.address.clone()).await;

    let finished = Arc::new(Mutex::new(Vec::new()));

    let dispatch_task = {
        let dispatcher = dispatcher.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            let report = dispatcher
                .dispatch(Envelope::chat("alice", vec![], "slow one"))
                .await;
            finished.lock().push("dispatch");
            report
        })
    };

    // bob has the envelope but is still sitting on the ack
    let at_bob = tokio::time::timeout(Duration::from_secs(5), bob.inbox.recv())
        .await
        .expect("Fan-out never reached bob")
        .expect("Peer inbox closed");
    assert_eq!(at_bob.body, "slow one");

    let login_task = {
        let dispatcher = dispatcher.clone();
        let finished = finished.clone();
        let address = carol.address.clone();
        tokio::spawn(async move {
            dispatcher.register_participant("carol", address).await;
            finished.lock().push("login");
        })
    };
    let presence_task = {
        let dispatcher = dispatcher.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            dispatcher.broadcast_presence(None, false).await;
            finished.lock().push("presence");
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(finished.lock().is_empty());
    assert!(!dispatcher.directory().contains("carol"));

    let report = dispatch_task.await.expect("Dispatch task panicked");
    login_task.await.expect("Login task panicked");
    presence_task.await.expect("Presence task panicked");

    assert_eq!(report.status, DispatchStatus::Delivered(names(&["bob"])));
    assert_eq!(finished.lock().first(), Some(&"dispatch"));
    assert_eq!(finished.lock().len(), 3);

    // carol only ever sees presence, never the chat
    while let Ok(envelope) = carol.inbox.try_recv() {
        assert!(envelope.is_control);
    }
    let echo = alice.take();
    assert_eq!(echo.body, "slow one");
}
