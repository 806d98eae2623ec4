use super::*;
use std::sync::atomic::Ordering;

use message_cipher::CryptoJsAes;

use crate::test_support::{
    relay_with, wait_until, ConnectScript, FakeChatClient, FakeTransport, PUSHER_ADDRESS,
};

fn addr() -> String {
    PUSHER_ADDRESS.to_string()
}

#[test]
fn login_retries_then_restarts_cycle() {
    let policy = RetryPolicy::immediate(3);

    let state = SessionState::Idle.next(SessionEvent::Advance, &policy);
    assert_eq!(state, SessionState::LoggingIn { attempt: 1 });
    let state = state.next(SessionEvent::StageFailed, &policy);
    assert_eq!(state, SessionState::LoggingIn { attempt: 2 });
    assert_eq!(
        SessionState::LoggingIn { attempt: 3 }.next(SessionEvent::StageFailed, &policy),
        SessionState::Idle
    );
    assert_eq!(
        state.next(SessionEvent::LoginSucceeded, &policy),
        SessionState::Authenticated
    );
}

#[test]
fn pusher_initialization_leads_to_connect() {
    let policy = RetryPolicy::immediate(2);

    let state = SessionState::Authenticated.next(SessionEvent::Advance, &policy);
    assert_eq!(state, SessionState::InitializingPusher { attempt: 1 });
    assert_eq!(
        state.clone().next(SessionEvent::StageFailed, &policy),
        SessionState::InitializingPusher { attempt: 2 }
    );
    assert_eq!(
        SessionState::InitializingPusher { attempt: 2 }.next(SessionEvent::StageFailed, &policy),
        SessionState::Idle
    );
    assert_eq!(
        state.next(SessionEvent::PusherReady(addr()), &policy),
        SessionState::ConnectingTransport { address: addr(), attempt: 1 }
    );
}

#[test]
fn connect_retries_only_the_connect_step() {
    let policy = RetryPolicy::immediate(3);

    let lost = SessionState::ConnectingTransport { address: addr(), attempt: 2 }
        .next(SessionEvent::TransportLost, &policy);
    assert_eq!(lost, SessionState::Disconnected { address: addr(), attempt: 2 });
    assert_eq!(
        lost.next(SessionEvent::Advance, &policy),
        SessionState::ConnectingTransport { address: addr(), attempt: 3 }
    );
    assert_eq!(
        SessionState::Disconnected { address: addr(), attempt: 3 }.next(SessionEvent::Advance, &policy),
        SessionState::Idle
    );
}

#[test]
fn established_connection_resets_connect_attempts() {
    let policy = RetryPolicy::immediate(3);

    let connected = SessionState::ConnectingTransport { address: addr(), attempt: 3 }
        .next(SessionEvent::TransportConnected, &policy);
    assert_eq!(connected, SessionState::Connected { address: addr() });

    let dropped = connected.next(SessionEvent::TransportLost, &policy);
    assert_eq!(dropped, SessionState::Disconnected { address: addr(), attempt: 0 });
    assert_eq!(
        dropped.next(SessionEvent::Advance, &policy),
        SessionState::ConnectingTransport { address: addr(), attempt: 1 }
    );
}

#[test]
fn shutdown_interrupts_every_state() {
    let policy = RetryPolicy::default();
    let states = [
        SessionState::Idle,
        SessionState::LoggingIn { attempt: 4 },
        SessionState::Authenticated,
        SessionState::InitializingPusher { attempt: 1 },
        SessionState::ConnectingTransport { address: addr(), attempt: 1 },
        SessionState::Connected { address: addr() },
        SessionState::Disconnected { address: addr(), attempt: 2 },
        SessionState::Interrupted,
    ];
    for state in states {
        assert_eq!(
            state.next(SessionEvent::Shutdown, &policy),
            SessionState::Interrupted
        );
    }
    assert_eq!(
        SessionState::Connected { address: addr() }.next(SessionEvent::TransportClosed, &policy),
        SessionState::Interrupted
    );
    assert_eq!(
        SessionState::Interrupted.next(SessionEvent::Advance, &policy),
        SessionState::Interrupted
    );
}

#[test]
fn unrelated_events_keep_the_state() {
    let policy = RetryPolicy::default();
    assert_eq!(
        SessionState::Idle.next(SessionEvent::TransportConnected, &policy),
        SessionState::Idle
    );
    assert_eq!(
        SessionState::Authenticated.next(SessionEvent::LoginSucceeded, &policy),
        SessionState::Authenticated
    );
}

#[test]
fn credentials_debug_hides_password() {
    let credentials = Credentials::new("bot@example.com", "hunter2");
    let rendered = format!("{credentials:?}");
    assert!(rendered.contains("bot@example.com"));
    assert!(!rendered.contains("hunter2"));
}

async fn stop(shutdown: CancellationToken, handle: JoinHandle<()>) {
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("session stops after shutdown")
        .expect("session task joins");
}

fn spawn_session(
    client: Arc<FakeChatClient>,
    transport: Arc<FakeTransport>,
) -> (CancellationToken, JoinHandle<()>) {
    let manager = SessionManager::new(
        relay_with(client),
        transport,
        Credentials::new("bot@example.com", "secret"),
    );
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { manager.run(token).await });
    (shutdown, handle)
}

#[tokio::test]
async fn login_failures_are_retried_before_connecting() {
    let client = Arc::new(FakeChatClient::default());
    client.login_failures.store(1, Ordering::SeqCst);
    let transport = FakeTransport::scripted([]);

    let (shutdown, handle) = spawn_session(Arc::clone(&client), Arc::clone(&transport));
    wait_until(|| transport.state() == TransportState::Connected).await;

    assert_eq!(client.login_calls.load(Ordering::SeqCst), 2);
    assert_eq!(*transport.addresses.lock().unwrap(), vec![addr()]);
    wait_until(|| client.friend_list_calls.load(Ordering::SeqCst) == 1).await;

    stop(shutdown, handle).await;
    assert_eq!(transport.state(), TransportState::Closed);
}

#[tokio::test]
async fn dropped_connection_reconnects_without_new_login() {
    let client = Arc::new(FakeChatClient::default());
    let transport = FakeTransport::scripted([
        ConnectScript::Refuse,
        ConnectScript::DropAfterConnect,
        ConnectScript::HoldUntilShutdown,
    ]);

    let (shutdown, handle) = spawn_session(Arc::clone(&client), Arc::clone(&transport));
    wait_until(|| transport.connect_calls() == 3 && transport.state() == TransportState::Connected)
        .await;

    assert_eq!(client.login_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.init_calls.load(Ordering::SeqCst), 1);
    stop(shutdown, handle).await;
}

#[tokio::test]
async fn exhausted_connects_restart_from_login() {
    let client = Arc::new(FakeChatClient::default());
    let transport = FakeTransport::scripted([ConnectScript::Refuse, ConnectScript::Refuse]);

    let (shutdown, handle) = spawn_session(Arc::clone(&client), Arc::clone(&transport));
    wait_until(|| transport.connect_calls() == 3 && transport.state() == TransportState::Connected)
        .await;

    assert_eq!(client.login_calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.init_calls.load(Ordering::SeqCst), 2);
    stop(shutdown, handle).await;
}

#[tokio::test]
async fn shutdown_interrupts_login_backoff() {
    let client = Arc::new(FakeChatClient::default());
    client.login_failures.store(u32::MAX, Ordering::SeqCst);
    let relay = RelayService::new(
        Arc::clone(&client) as Arc<dyn client_core::ChatServiceClient>,
        Arc::new(CryptoJsAes),
        RetryPolicy {
            initial_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        },
    );
    let manager = SessionManager::new(
        relay,
        FakeTransport::scripted([]),
        Credentials::new("bot@example.com", "wrong"),
    );
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { manager.run(token).await });

    wait_until(|| client.login_calls.load(Ordering::SeqCst) == 1).await;
    stop(shutdown, handle).await;
    assert_eq!(client.login_calls.load(Ordering::SeqCst), 1);
}
