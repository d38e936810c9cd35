//! Application state shared by every presentation surface.
//!
//! `CoreState` owns the identity client, the authenticated `Session` and the
//! single `RealtimeEngine`. The session lives behind an `RwLock`: most
//! operations only read it, login and logout write it.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::channel::{ChannelConnector, WsConnector};
use crate::client::{
    AppointmentService, HttpAppointmentService, HttpIdentityService, HttpNotificationService,
    HttpTransport, IdentityService, NotificationService, ServiceError,
};
use crate::config::ClientConfig;
use crate::engine::{EngineError, RealtimeEngine};
use crate::models::{Doctor, ProfileUpdate, Role, Session, User};

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    identity: Arc<dyn IdentityService>,
    /// Authenticated user. `None` when logged out.
    session: RwLock<Option<Session>>,
    engine: RealtimeEngine,
}

impl CoreState {
    pub fn new(identity: Arc<dyn IdentityService>, engine: RealtimeEngine) -> Self {
        Self {
            identity,
            session: RwLock::new(None),
            engine,
        }
    }

    /// Wire the reqwest clients and the WebSocket gateway from `config`.
    ///
    /// All HTTP clients share one transport so the identity service's
    /// session cookie reaches the appointment and notification services.
    pub fn from_config(config: &ClientConfig) -> Result<Self, CoreError> {
        let http = HttpTransport::new(config)?;
        let endpoints = &config.endpoints;

        let identity: Arc<dyn IdentityService> = Arc::new(
            HttpIdentityService::new(&endpoints.identity_url, http.clone())
                .with_directory_url(&endpoints.directory_url),
        );
        let appointments: Arc<dyn AppointmentService> = Arc::new(HttpAppointmentService::new(
            &endpoints.appointment_url,
            http.clone(),
        ));
        let notifications: Arc<dyn NotificationService> = Arc::new(
            HttpNotificationService::new(&endpoints.notification_url, http),
        );
        let connector: Arc<dyn ChannelConnector> = Arc::new(WsConnector::new(
            &endpoints.gateway_url,
            config.connect_timeout,
        ));

        let engine = RealtimeEngine::new(
            appointments,
            notifications,
            connector,
            config.reconnect,
            config.engine,
        );
        Ok(Self::new(identity, engine))
    }

    pub fn engine(&self) -> &RealtimeEngine {
        &self.engine
    }

    pub fn read_session(&self) -> Result<RwLockReadGuard<'_, Option<Session>>, CoreError> {
        self.session.read().map_err(|_| CoreError::LockPoisoned)
    }

    /// Clone of the active session, or `NoActiveSession`.
    pub fn require_session(&self) -> Result<Session, CoreError> {
        let guard = self.read_session()?;
        guard.clone().ok_or(CoreError::NoActiveSession)
    }

    pub fn is_logged_in(&self) -> bool {
        self.read_session().map(|s| s.is_some()).unwrap_or(false)
    }

    fn set_session(&self, session: Option<Session>) -> Result<(), CoreError> {
        let mut guard = self.session.write().map_err(|_| CoreError::LockPoisoned)?;
        *guard = session;
        Ok(())
    }

    /// Store the session and start its realtime engine.
    async fn start(&self, session: Session) -> Result<Session, CoreError> {
        self.set_session(Some(session.clone()))?;
        self.engine.connect(&session).await?;
        tracing::info!(user_id = %session.user_id, role = %session.role, "Session started");
        Ok(session)
    }

    // ── Authentication ──────────────────────────────────────

    /// Pick up a session the identity service still recognizes (cookie from
    /// an earlier login). `Ok(None)` when there is none.
    pub async fn restore_session(&self) -> Result<Option<Session>, CoreError> {
        match self.identity.current_user().await? {
            Some(user) => Ok(Some(self.start(Session::from_user(&user)).await?)),
            None => {
                tracing::debug!("No session to restore");
                Ok(None)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, CoreError> {
        let user = self.identity.login(email, password).await?;
        self.start(Session::from_user(&user)).await
    }

    /// Create an account. The caller logs in afterwards.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(), CoreError> {
        self.identity.register(name, email, password, role).await?;
        tracing::info!(role = %role, "Account registered");
        Ok(())
    }

    /// Stop the engine, then end the remote session. The local session is
    /// cleared even when the identity service call fails.
    pub async fn logout(&self) -> Result<(), CoreError> {
        let disconnected = self.engine.disconnect().await;
        let remote = self.identity.logout().await;
        self.set_session(None)?;

        if let Err(e) = &remote {
            tracing::warn!(error = %e, "Remote logout failed; local session cleared");
        }
        disconnected?;
        remote?;
        tracing::info!("Logged out");
        Ok(())
    }

    // ── Profile & directory ─────────────────────────────────

    /// Send only the fields that differ from the current profile, then
    /// re-read the user and refresh the session's display fields.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Session, CoreError> {
        let session = self.require_session()?;
        let current = User {
            id: session.user_id.clone(),
            email: session.email.clone(),
            name: session.name.clone(),
            image: session.image.clone(),
            role: session.role,
        };
        let changes = update.changes_from(&current);
        if changes.is_empty() {
            return Ok(session);
        }

        self.identity.update_profile(&changes).await?;
        let user = self
            .identity
            .current_user()
            .await?
            .ok_or(CoreError::NoActiveSession)?;

        let mut guard = self.session.write().map_err(|_| CoreError::LockPoisoned)?;
        let active = guard.as_mut().ok_or(CoreError::NoActiveSession)?;
        active.apply_profile(&user);
        tracing::info!(user_id = %active.user_id, "Profile updated");
        Ok(active.clone())
    }

    pub async fn list_doctors(&self) -> Result<Vec<Doctor>, CoreError> {
        Ok(self.identity.list_doctors().await?)
    }
}

// ═══════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("No active session")]
    NoActiveSession,
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CoreError {
    /// Message suitable for display next to the failed action.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Service(e) => e.user_message(),
            CoreError::Engine(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}
