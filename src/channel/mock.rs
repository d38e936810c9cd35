//! Scriptable in-memory gateway.
//!
//! Tests push events into the live connection, drop it to simulate a
//! network loss, make the next few connects fail, or let them join and
//! drop at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{ChannelConnection, ChannelConnector, ChannelError, GatewayEvent};

enum MockFrame {
    Event(GatewayEvent),
    Drop,
}

#[derive(Default)]
struct MockState {
    live: Option<mpsc::UnboundedSender<MockFrame>>,
    joins: Vec<String>,
    failures_left: usize,
    drops_left: usize,
    attempts: usize,
}

#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    joined: Arc<watch::Sender<usize>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (joined, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            joined: Arc::new(joined),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` on the live connection. False when nothing is connected.
    pub fn push(&self, event: GatewayEvent) -> bool {
        match &self.state().live {
            Some(tx) => tx.send(MockFrame::Event(event)).is_ok(),
            None => false,
        }
    }

    /// Break the live connection with a transport error.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state().live.take() {
            let _ = tx.send(MockFrame::Drop);
        }
    }

    /// The next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state().failures_left = n;
    }

    /// The next `n` connects join, then break before any event.
    pub fn drop_next_connections(&self, n: usize) {
        self.state().drops_left = n;
    }

    /// Session ids joined so far, in order.
    pub fn joins(&self) -> Vec<String> {
        self.state().joins.clone()
    }

    /// Connect attempts including failed ones.
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state()
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Wait until at least `n` successful joins happened.
    pub async fn wait_for_joins(&self, n: usize) -> bool {
        let mut rx = self.joined.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|count| *count >= n))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let rx = {
            let mut state = self.state();
            state.attempts += 1;
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(ChannelError::Connect {
                    url: "mock://gateway".into(),
                    reason: "connection refused".into(),
                });
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.joins.push(session_id.to_string());
            if state.drops_left > 0 {
                state.drops_left -= 1;
                state.live = None;
                let _ = tx.send(MockFrame::Drop);
            } else {
                // A newer connection supersedes the previous one
                state.live = Some(tx);
            }
            rx
        };
        self.joined.send_modify(|count| *count += 1);
        Ok(Box::new(MockConnection { rx }))
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<MockFrame>,
}

#[async_trait]
impl ChannelConnection for MockConnection {
    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, ChannelError> {
        match self.rx.recv().await {
            Some(MockFrame::Event(event)) => Ok(Some(event)),
            Some(MockFrame::Drop) => Err(ChannelError::Transport("connection dropped".into())),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
