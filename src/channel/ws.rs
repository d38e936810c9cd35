//! WebSocket transport for the realtime gateway (tokio-tungstenite).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{ChannelConnection, ChannelConnector, ChannelError, ClientFrame, GatewayEvent};

/// Connects to `ws(s)://.../ws` and joins the session's group.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect_error(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::Connect {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let (mut stream, _response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| {
            self.connect_error(format!("timed out after {}s", self.connect_timeout.as_secs()))
        })?
        .map_err(|e| self.connect_error(e.to_string()))?;

        let join = serde_json::to_string(&ClientFrame::Join(session_id.to_string()))
            .map_err(|e| ChannelError::Join(e.to_string()))?;
        stream
            .send(Message::Text(join))
            .await
            .map_err(|e| ChannelError::Join(e.to_string()))?;

        tracing::info!(url = %self.url, session_id = %session_id, "Joined realtime gateway");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelConnection for WsConnection {
    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, ChannelError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match GatewayEvent::decode(&text) {
                    Ok(Some(event)) => return Ok(Some(event)),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed gateway frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                _ => {} // Ping/Pong handled by tungstenite, binary unused
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use crate::test_support::{appointment, notification};
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Gateway double: reports the join frame it receives, then sends
    /// `frames` verbatim and closes.
    async fn setup_gateway(frames: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
        let (joined_tx, joined_rx) = mpsc::unbounded_channel::<String>();
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| {
                let frames = frames.clone();
                let joined_tx = joined_tx.clone();
                async move {
                    ws.on_upgrade(move |socket| gateway_session(socket, frames, joined_tx))
                        .into_response()
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://127.0.0.1:{}/ws", addr.port()), joined_rx)
    }

    async fn gateway_session(
        mut socket: WebSocket,
        frames: Vec<String>,
        joined_tx: mpsc::UnboundedSender<String>,
    ) {
        if let Some(Ok(AxumMessage::Text(join))) = socket.recv().await {
            let _ = joined_tx.send(join);
        }
        for frame in frames {
            if socket.send(AxumMessage::Text(frame)).await.is_err() {
                return;
            }
        }
        let _ = socket.send(AxumMessage::Close(None)).await;
    }

    #[tokio::test]
    async fn connect_sends_join_and_reads_events_in_order() {
        let frames = vec![
            GatewayEvent::AppointmentNew(appointment("A1", AppointmentStatus::Pending)).to_frame(),
            GatewayEvent::Notification(notification("N1", false)).to_frame(),
        ];
        let (url, mut joined) = setup_gateway(frames).await;

        let connector = WsConnector::new(&url, Duration::from_secs(5));
        let mut conn = connector.connect("u-1").await.expect("connect");

        let join = tokio::time::timeout(Duration::from_secs(5), joined.recv())
            .await
            .expect("timeout waiting for join")
            .expect("gateway gone");
        let parsed: serde_json::Value = serde_json::from_str(&join).unwrap();
        assert_eq!(parsed["event"], "join");
        assert_eq!(parsed["data"], "u-1");

        let first = conn.next_event().await.unwrap().unwrap();
        assert_eq!(first.name(), "appointmentNew");
        let second = conn.next_event().await.unwrap().unwrap();
        assert_eq!(second.name(), "notification");
        assert_eq!(conn.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_skipped() {
        let frames = vec![
            "not valid json {{{".to_string(),
            r#"{"event":"typing","data":{}}"#.to_string(),
            GatewayEvent::Notification(notification("N7", false)).to_frame(),
        ];
        let (url, _joined) = setup_gateway(frames).await;

        let connector = WsConnector::new(&url, Duration::from_secs(5));
        let mut conn = connector.connect("u-1").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), conn.next_event())
            .await
            .expect("timeout")
            .unwrap()
            .unwrap();
        match event {
            GatewayEvent::Notification(n) => assert_eq!(n.id, "N7"),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_gateway_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new(&format!("ws://127.0.0.1:{port}/ws"), Duration::from_secs(2));
        let err = connector.connect("u-1").await.err().expect("should fail");
        assert!(matches!(err, ChannelError::Connect { .. }), "got {err:?}");
    }

    #[test]
    fn url_is_normalized() {
        let connector = WsConnector::new("ws://localhost:5003/ws/", Duration::from_secs(1));
        assert_eq!(connector.url(), "ws://localhost:5003/ws");
    }
}
