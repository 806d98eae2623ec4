use std::{fmt, sync::Arc, time::Duration};

use client_core::{RealtimeTransport, TransportState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::RelayError, relay::RelayService, retry::RetryPolicy};

/// The single identity the relay logs in as.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LoggingIn { attempt: u32 },
    Authenticated,
    InitializingPusher { attempt: u32 },
    ConnectingTransport { address: String, attempt: u32 },
    Connected { address: String },
    /// `attempt` counts consecutive connects that never came up; it is zero
    /// after an established connection dropped.
    Disconnected { address: String, attempt: u32 },
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Advance,
    LoginSucceeded,
    PusherReady(String),
    TransportConnected,
    TransportClosed,
    TransportLost,
    StageFailed,
    Shutdown,
}

impl SessionState {
    /// Transition table of the session. Pairs not listed keep the state.
    pub fn next(self, event: SessionEvent, policy: &RetryPolicy) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (_, E::Shutdown) | (S::Interrupted, _) => S::Interrupted,

            (S::Idle, E::Advance) => S::LoggingIn { attempt: 1 },

            (S::LoggingIn { .. }, E::LoginSucceeded) => S::Authenticated,
            (S::LoggingIn { attempt }, E::StageFailed) if policy.has_attempts_left(attempt) => {
                S::LoggingIn {
                    attempt: attempt + 1,
                }
            }
            (S::LoggingIn { .. }, E::StageFailed) => S::Idle,

            (S::Authenticated, E::Advance) => S::InitializingPusher { attempt: 1 },

            (S::InitializingPusher { .. }, E::PusherReady(address)) => {
                S::ConnectingTransport { address, attempt: 1 }
            }
            (S::InitializingPusher { attempt }, E::StageFailed)
                if policy.has_attempts_left(attempt) =>
            {
                S::InitializingPusher {
                    attempt: attempt + 1,
                }
            }
            (S::InitializingPusher { .. }, E::StageFailed) => S::Idle,

            (S::ConnectingTransport { address, .. }, E::TransportConnected) => {
                S::Connected { address }
            }
            (S::ConnectingTransport { address, attempt }, E::TransportLost | E::StageFailed) => {
                S::Disconnected { address, attempt }
            }
            (S::ConnectingTransport { .. } | S::Connected { .. }, E::TransportClosed) => {
                S::Interrupted
            }
            (S::Connected { address }, E::TransportLost) => S::Disconnected {
                address,
                attempt: 0,
            },

            (S::Disconnected { address, attempt }, E::Advance)
                if policy.has_attempts_left(attempt) =>
            {
                S::ConnectingTransport {
                    address,
                    attempt: attempt + 1,
                }
            }
            (S::Disconnected { .. }, E::Advance) => S::Idle,

            (state, _) => state,
        }
    }
}

/// Keeps one authenticated pusher session alive until shutdown.
pub struct SessionManager {
    relay: Arc<RelayService>,
    transport: Arc<dyn RealtimeTransport>,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl SessionManager {
    pub fn new(
        relay: Arc<RelayService>,
        transport: Arc<dyn RealtimeTransport>,
        credentials: Credentials,
    ) -> Self {
        let retry = relay.retry_policy().clone();
        Self {
            relay,
            transport,
            credentials,
            retry,
        }
    }

    /// Drives the state machine. Returns only once `shutdown` is observed.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut state = SessionState::Idle;
        let mut connection: Option<JoinHandle<anyhow::Result<()>>> = None;

        loop {
            let event = if shutdown.is_cancelled() {
                SessionEvent::Shutdown
            } else {
                self.step(&state, &mut connection, &shutdown).await
            };
            let next = state.clone().next(event, &self.retry);
            if next != state {
                debug!(from = ?state, to = ?next, "session state changed");
            }
            state = next;
            if state == SessionState::Interrupted {
                break;
            }
        }

        if let Some(connection) = connection.take() {
            if let Err(err) = connection.await {
                debug!(error = %err, "pusher connection task ended abnormally");
            }
        }
        info!("session stopped");
    }

    async fn step(
        &self,
        state: &SessionState,
        connection: &mut Option<JoinHandle<anyhow::Result<()>>>,
        shutdown: &CancellationToken,
    ) -> SessionEvent {
        match state {
            SessionState::Idle | SessionState::Authenticated => SessionEvent::Advance,
            SessionState::LoggingIn { attempt } => self.login(*attempt, shutdown).await,
            SessionState::InitializingPusher { attempt } => {
                self.init_pusher(*attempt, shutdown).await
            }
            SessionState::ConnectingTransport { address, attempt } => {
                self.open(address, *attempt, connection, shutdown).await
            }
            SessionState::Connected { .. } => match connection.take() {
                Some(handle) => self.finish(handle.await, None),
                None => SessionEvent::TransportLost,
            },
            SessionState::Disconnected { attempt, .. } => {
                let delay = if self.retry.has_attempts_left(*attempt) {
                    self.retry.delay_after((*attempt).max(1))
                } else {
                    warn!(attempts = attempt, "pusher connection attempts exhausted; logging in again");
                    self.retry.max_delay
                };
                pause(delay, shutdown).await
            }
            SessionState::Interrupted => SessionEvent::Shutdown,
        }
    }

    async fn login(&self, attempt: u32, shutdown: &CancellationToken) -> SessionEvent {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return SessionEvent::Shutdown,
            result = self.relay.client().login(&self.credentials.email, &self.credentials.password) => result,
        };
        match result {
            Ok(()) => {
                info!(email = %self.credentials.email, "logged in");
                self.relay.trigger_conversation_refresh();
                SessionEvent::LoginSucceeded
            }
            Err(err) => {
                let err = RelayError::AuthenticationFailure {
                    attempt,
                    cause: format!("{err:#}"),
                };
                self.stage_failed("login", attempt, &err, shutdown).await
            }
        }
    }

    async fn init_pusher(&self, attempt: u32, shutdown: &CancellationToken) -> SessionEvent {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return SessionEvent::Shutdown,
            result = self.relay.client().init_pusher() => result,
        };
        match result {
            Ok(address) => {
                info!(%address, "pusher initialized");
                SessionEvent::PusherReady(address)
            }
            Err(err) => {
                let err = RelayError::PusherInitFailure {
                    attempt,
                    cause: format!("{err:#}"),
                };
                self.stage_failed("init pusher", attempt, &err, shutdown).await
            }
        }
    }

    /// Logs a failed stage and waits before the next attempt, or before the
    /// cycle restarts when the attempts are used up.
    async fn stage_failed(
        &self,
        stage: &str,
        attempt: u32,
        err: &RelayError,
        shutdown: &CancellationToken,
    ) -> SessionEvent {
        warn!(stage, attempt, max_attempts = self.retry.max_attempts(), error = %err, "session stage failed");
        let delay = if self.retry.has_attempts_left(attempt) {
            self.retry.delay_after(attempt)
        } else {
            warn!(stage, "attempts exhausted; restarting session cycle");
            self.retry.max_delay
        };
        match pause(delay, shutdown).await {
            SessionEvent::Advance => SessionEvent::StageFailed,
            other => other,
        }
    }

    /// Starts the connection and waits until it is up or has ended.
    async fn open(
        &self,
        address: &str,
        attempt: u32,
        connection: &mut Option<JoinHandle<anyhow::Result<()>>>,
        shutdown: &CancellationToken,
    ) -> SessionEvent {
        let mut states = self.transport.subscribe_state();
        let transport = Arc::clone(&self.transport);
        let target = address.to_string();
        let token = shutdown.clone();
        let mut handle = tokio::spawn(async move { transport.connect(&target, token).await });
        debug!(%address, attempt, "connecting pusher");

        loop {
            tokio::select! {
                joined = &mut handle => return self.finish(joined, Some(attempt)),
                changed = states.changed() => {
                    if changed.is_err() {
                        return self.finish(handle.await, Some(attempt));
                    }
                    if *states.borrow_and_update() == TransportState::Connected {
                        info!(%address, "pusher connected");
                        *connection = Some(handle);
                        return SessionEvent::TransportConnected;
                    }
                }
            }
        }
    }

    /// Classifies how a connection ended. `attempt` is set while the
    /// connection had not come up yet.
    fn finish(
        &self,
        joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
        attempt: Option<u32>,
    ) -> SessionEvent {
        let cause = match joined {
            Ok(Ok(())) => {
                debug!(state = ?self.transport.state(), "pusher connection closed");
                return SessionEvent::TransportClosed;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(err) => err.to_string(),
        };
        let err = RelayError::TransportConnectFailure {
            attempt: attempt.unwrap_or(0),
            cause,
        };
        match attempt {
            Some(attempt) => warn!(
                stage = "connect",
                attempt,
                max_attempts = self.retry.max_attempts(),
                error = %err,
                "session stage failed"
            ),
            None => warn!(error = %err, "pusher disconnected; reconnecting"),
        }
        SessionEvent::TransportLost
    }
}

async fn pause(delay: Duration, shutdown: &CancellationToken) -> SessionEvent {
    tokio::select! {
        _ = shutdown.cancelled() => SessionEvent::Shutdown,
        _ = tokio::time::sleep(delay) => SessionEvent::Advance,
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
