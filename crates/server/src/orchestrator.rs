use std::sync::Arc;

use anyhow::Context;
use client_core::{ChatServiceClient, KahlaClient, PusherSocket, RealtimeTransport};
use message_cipher::{CryptoJsAes, MessageCipher};
use relay_core::{Credentials, EventDispatcher, RelayService, SessionManager};
use shared::protocol::PusherFrame;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{api::build_router, app_state::AppState, config::Settings};

/// Runs the session, the event dispatcher and the HTTP surface under one
/// shutdown token.
pub struct Orchestrator {
    relay: Arc<RelayService>,
    session: SessionManager,
    dispatcher: EventDispatcher,
    bind_addr: String,
    docs_url: String,
}

impl Orchestrator {
    pub fn new(
        relay: Arc<RelayService>,
        transport: Arc<dyn RealtimeTransport>,
        frames: mpsc::Receiver<PusherFrame>,
        cipher: Arc<dyn MessageCipher>,
        credentials: Credentials,
        bind_addr: String,
        docs_url: String,
    ) -> Self {
        let session = SessionManager::new(Arc::clone(&relay), transport, credentials);
        let dispatcher = EventDispatcher::new(Arc::clone(&relay), cipher, frames);
        Self {
            relay,
            session,
            dispatcher,
            bind_addr,
            docs_url,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let client: Arc<dyn ChatServiceClient> = Arc::new(KahlaClient::new(&settings.server_url)?);
        let cipher: Arc<dyn MessageCipher> = Arc::new(CryptoJsAes);
        let relay = RelayService::new(client, Arc::clone(&cipher), settings.retry.policy());
        let (transport, frames) = PusherSocket::new();
        Ok(Self::new(
            relay,
            transport,
            frames,
            cipher,
            Credentials::new(settings.email.clone(), settings.password.clone()),
            settings.bind_addr(),
            settings.docs_url.clone(),
        ))
    }

    /// Returns once all three activities have stopped. A fatal dispatcher
    /// error, a failed HTTP bind or a session that ends for any reason cancels
    /// `shutdown` for the others.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let Self {
            relay,
            session,
            dispatcher,
            bind_addr,
            docs_url,
        } = self;

        let session_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                // Cancels the others even when the session panics.
                let _stop_all = shutdown.clone().drop_guard();
                session.run(shutdown).await
            }
        });

        let dispatcher_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let result = dispatcher.run(shutdown.clone()).await;
                if let Err(err) = &result {
                    error!(error = %err, "event dispatcher failed; shutting down");
                    shutdown.cancel();
                }
                result
            }
        });

        let http_task = tokio::spawn({
            let shutdown = shutdown.clone();
            let state = Arc::new(AppState { relay, docs_url });
            async move {
                let result = serve(state, &bind_addr, shutdown.clone()).await;
                if let Err(err) = &result {
                    error!(error = %format!("{err:#}"), "http server failed; shutting down");
                    shutdown.cancel();
                }
                result
            }
        });

        let (session, dispatched, served) = tokio::join!(session_task, dispatcher_task, http_task);
        session.context("session task panicked")?;
        dispatched.context("dispatcher task panicked")??;
        served.context("http task panicked")??;
        info!("relay stopped");
        Ok(())
    }
}

async fn serve(
    state: Arc<AppState>,
    bind_addr: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {bind_addr}"))?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server exited with an error")?;
    info!("http server stopped");
    Ok(())
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
