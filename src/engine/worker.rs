//! The single task that owns a session's gateway connection.
//!
//! Events are applied one at a time in delivery order. After every
//! successful (re)connect both collections are refreshed before the next
//! event is read, so nothing missed while offline survives a reconnect.
//!
//! The retry budget is restored only once a connection proved stable: it
//! delivered an event or stayed open for [`STABLE_CONNECTION`]. A gateway
//! that accepts and drops straight away still runs out of retries.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::backoff::Backoff;
use super::{ConnectionStatus, EngineError, EngineInner};
use crate::channel::{ChannelConnection, ChannelConnector};
use crate::config::ReconnectionPolicy;

/// Uptime after which a connection that delivered nothing still counts as
/// healthy.
const STABLE_CONNECTION: Duration = Duration::from_secs(10);

/// Why the event pump stopped.
enum PumpEnd {
    Shutdown,
    Dropped { events: usize },
}

pub(super) struct SessionWorker {
    engine: Weak<EngineInner>,
    connector: Arc<dyn ChannelConnector>,
    session_id: String,
    generation: u64,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl SessionWorker {
    pub(super) fn new(
        engine: Weak<EngineInner>,
        connector: Arc<dyn ChannelConnector>,
        session_id: String,
        generation: u64,
        policy: ReconnectionPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            connector,
            session_id,
            generation,
            backoff: Backoff::new(policy),
            shutdown,
        }
    }

    /// `first` is the result of the caller's inline connect attempt.
    pub(super) async fn run(mut self, first: Option<Box<dyn ChannelConnection>>) {
        let mut pending = first;
        loop {
            let mut connection = match pending.take() {
                Some(connection) => connection,
                None => match self.reconnect().await {
                    Some(connection) => connection,
                    None => return,
                },
            };
            let opened = Instant::now();

            if !self.on_connected().await {
                connection.close().await;
                return;
            }
            let end = self.pump(&mut connection).await;
            connection.close().await;
            match end {
                PumpEnd::Shutdown => {
                    tracing::debug!(session_id = %self.session_id, "Session task stopped");
                    return;
                }
                PumpEnd::Dropped { events } => {
                    if events > 0 || opened.elapsed() >= STABLE_CONNECTION {
                        self.backoff.reset();
                    } else {
                        tracing::debug!(
                            session_id = %self.session_id,
                            attempt = self.backoff.attempt(),
                            "Channel dropped before it was stable"
                        );
                    }
                }
            }
        }
    }

    /// Mark the session connected and resynchronize. False once the
    /// session is gone.
    async fn on_connected(&self) -> bool {
        let Some(engine) = self.engine.upgrade() else {
            return false;
        };
        if engine
            .set_status(self.generation, ConnectionStatus::Connected)
            .is_err()
        {
            return false;
        }
        tracing::info!(session_id = %self.session_id, "Realtime channel connected");
        engine.resync(self.generation).await
    }

    async fn pump(&mut self, connection: &mut Box<dyn ChannelConnection>) -> PumpEnd {
        let mut events = 0;
        loop {
            let next = tokio::select! {
                next = connection.next_event() => next,
                _ = shutdown_requested(&mut self.shutdown) => return PumpEnd::Shutdown,
            };
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::info!(session_id = %self.session_id, "Gateway closed the channel");
                    return PumpEnd::Dropped { events };
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Realtime channel dropped");
                    return PumpEnd::Dropped { events };
                }
            };

            let Some(engine) = self.engine.upgrade() else {
                return PumpEnd::Shutdown;
            };
            events += 1;
            match engine.apply_event(self.generation, event) {
                Ok(_) => {}
                Err(EngineError::Stale) => return PumpEnd::Shutdown,
                Err(e) => {
                    tracing::error!(session_id = %self.session_id, error = %e, "Cannot apply gateway event");
                    return PumpEnd::Shutdown;
                }
            }
        }
    }

    /// Back off and retry until a connection opens, retries run out, or
    /// the session ends.
    async fn reconnect(&mut self) -> Option<Box<dyn ChannelConnection>> {
        loop {
            let Some(delay) = self.backoff.next_delay() else {
                tracing::error!(
                    session_id = %self.session_id,
                    attempts = self.backoff.attempt(),
                    "Realtime reconnection retries exhausted"
                );
                self.set_status(ConnectionStatus::Failed);
                return None;
            };
            let attempt = self.backoff.attempt();
            if !self.set_status(ConnectionStatus::Reconnecting { attempt }) {
                return None;
            }
            tracing::info!(
                session_id = %self.session_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting realtime channel"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut self.shutdown) => return None,
            }
            let result = tokio::select! {
                result = self.connector.connect(&self.session_id) => result,
                _ = shutdown_requested(&mut self.shutdown) => return None,
            };
            match result {
                Ok(connection) => return Some(connection),
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }
    }

    /// False when the engine is gone or has moved to another generation.
    fn set_status(&self, status: ConnectionStatus) -> bool {
        self.engine
            .upgrade()
            .is_some_and(|engine| engine.set_status(self.generation, status).is_ok())
    }
}

/// Resolves once shutdown was requested or the engine dropped its sender.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
