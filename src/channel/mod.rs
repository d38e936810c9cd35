//! Client side of the realtime gateway.
//!
//! The gateway pushes JSON text frames shaped `{"event": "<name>", "data": ...}`.
//! Three events are understood: `appointmentNew`, `appointmentStatusUpdated`
//! and `notification`. The client sends a single `join` frame carrying the
//! session's user id right after the socket opens, which puts the connection
//! into that user's update group.
//!
//! [`ChannelConnector`] / [`ChannelConnection`] are the seam the engine
//! subscribes through, so tests can swap in [`mock::MockConnector`].

pub mod mock;
pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Appointment, AppointmentStatusUpdate, Notification};

pub use mock::MockConnector;
pub use ws::WsConnector;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Gateway unreachable at {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Join rejected: {0}")]
    Join(String),

    #[error("Channel transport error: {0}")]
    Transport(String),

    #[error("Malformed gateway frame: {0}")]
    Decode(String),
}

/// Gateway → client push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    #[serde(rename = "appointmentNew")]
    AppointmentNew(Appointment),
    #[serde(rename = "appointmentStatusUpdated")]
    AppointmentStatusUpdated(AppointmentStatusUpdate),
    #[serde(rename = "notification")]
    Notification(Notification),
}

/// Client → gateway frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "join")]
    Join(String),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::AppointmentNew(_) => "appointmentNew",
            GatewayEvent::AppointmentStatusUpdated(_) => "appointmentStatusUpdated",
            GatewayEvent::Notification(_) => "notification",
        }
    }

    /// Decode a text frame. `Ok(None)` for well-formed frames carrying an
    /// event this client does not handle.
    pub fn decode(text: &str) -> Result<Option<GatewayEvent>, ChannelError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ChannelError::Decode(e.to_string()))?;
        let decode_err = |e: serde_json::Error| ChannelError::Decode(format!("{}: {e}", raw.event));

        let event = match raw.event.as_str() {
            "appointmentNew" => GatewayEvent::AppointmentNew(
                serde_json::from_value(raw.data.clone()).map_err(decode_err)?,
            ),
            "appointmentStatusUpdated" => GatewayEvent::AppointmentStatusUpdated(
                serde_json::from_value(raw.data.clone()).map_err(decode_err)?,
            ),
            "notification" => GatewayEvent::Notification(
                serde_json::from_value(raw.data.clone()).map_err(decode_err)?,
            ),
            other => {
                tracing::debug!(event = other, "Ignoring unhandled gateway event");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    pub fn to_frame(&self) -> String {
        // Serializing plain data structs cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Opens connections to the gateway.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a connection and join `session_id`'s update group.
    async fn connect(&self, session_id: &str) -> Result<Box<dyn ChannelConnection>, ChannelError>;
}

/// One live gateway connection.
#[async_trait]
pub trait ChannelConnection: Send {
    /// Next event in delivery order. `Ok(None)` once the gateway closed the
    /// channel; `Err` when the transport broke. Undecodable frames are
    /// skipped, never returned.
    async fn next_event(&mut self) -> Result<Option<GatewayEvent>, ChannelError>;

    async fn close(&mut self);
}
