//! Realtime reconciliation engine.
//!
//! Keeps the session's appointment list and notification inbox consistent
//! with the services while pushes arrive out of order, twice, or across a
//! reconnect. [`LocalView`] holds the merge rules; [`RealtimeEngine`] owns
//! the view, drives the gateway connection from a single session task, and
//! runs the service round-trips.
//!
//! Every mutation is tagged with the generation it started under and is
//! dropped when the generation moved on (connect to another session or
//! disconnect) before the mutation could be applied. Without a session
//! there is no active generation, so handlers and commands are refused.

pub mod backoff;
pub mod view;
mod worker;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::channel::{ChannelConnector, GatewayEvent};
use crate::client::{AppointmentService, NotificationService, ServiceError};
use crate::config::{EngineConfig, ReconnectionPolicy};
use crate::models::{
    Appointment, AppointmentStatus, AppointmentStatusUpdate, NewAppointment, Notification, Session,
};

pub use view::{AppointmentStats, LocalView, MergeOutcome, SortOrder};
use worker::SessionWorker;

/// How long `disconnect` waits for the session task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ═══════════════════════════════════════════════════════════
// Public types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Retries exhausted. `connect` starts over.
    Failed,
}

/// Change notification for the presentation layer. Carries no data: read
/// the new state through the engine's getters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    AppointmentsChanged,
    NotificationsChanged { unread: usize },
    Connection(ConnectionStatus),
    /// A post-connect refresh failed; the previous collection was kept.
    SyncFailed { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Refresh failed: {0}")]
    Fetch(#[source] ServiceError),

    #[error("{0}")]
    Command(#[source] ServiceError),

    #[error("Status {0} cannot be set on review; use APPROVED or REJECTED")]
    InvalidStatus(AppointmentStatus),

    #[error("No active session")]
    Stale,

    #[error("Internal lock error")]
    LockPoisoned,
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Fetch(e) | EngineError::Command(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Message suitable for display next to the failed action.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Fetch(e) | EngineError::Command(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Point-in-time copy of everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub session_id: Option<String>,
    pub status: ConnectionStatus,
    pub appointments: Vec<Appointment>,
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub appointment_stats: AppointmentStats,
}

// ═══════════════════════════════════════════════════════════
// Shared state
// ═══════════════════════════════════════════════════════════

struct ActiveChannel {
    session_id: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct EngineInner {
    view: RwLock<LocalView>,
    appointments: Arc<dyn AppointmentService>,
    notifications: Arc<dyn NotificationService>,
    connector: Arc<dyn ChannelConnector>,
    policy: ReconnectionPolicy,
    config: EngineConfig,
    updates: broadcast::Sender<EngineUpdate>,
    /// Serializes connect/disconnect.
    connection: tokio::sync::Mutex<Option<ActiveChannel>>,
}

impl EngineInner {
    fn emit(&self, update: EngineUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    fn read_view<R>(&self, f: impl FnOnce(&LocalView) -> R) -> Result<R, EngineError> {
        let view = self.view.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(f(&view))
    }

    /// Run `f` against the view if `generation` is still current.
    fn with_view<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut LocalView) -> R,
    ) -> Result<R, EngineError> {
        let mut view = self.view.write().map_err(|_| EngineError::LockPoisoned)?;
        if view.generation() != generation {
            return Err(EngineError::Stale);
        }
        Ok(f(&mut view))
    }

    /// Generation of the connected session. `Stale` when there is none.
    fn active_generation(&self) -> Result<u64, EngineError> {
        self.read_view(LocalView::active_generation)?
            .ok_or(EngineError::Stale)
    }

    fn set_status(&self, generation: u64, status: ConnectionStatus) -> Result<(), EngineError> {
        if self.with_view(generation, |v| v.set_status(status))? {
            self.emit(EngineUpdate::Connection(status));
        }
        Ok(())
    }

    /// Fence off everything in flight and drop the session's data.
    fn end_session(&self) -> Result<(), EngineError> {
        let (had_appointments, had_notifications, status_changed) = {
            let mut view = self.view.write().map_err(|_| EngineError::LockPoisoned)?;
            view.advance_generation();
            let had = (!view.appointments().is_empty(), !view.notifications().is_empty());
            view.clear();
            view.set_session(None);
            (had.0, had.1, view.set_status(ConnectionStatus::Disconnected))
        };

        if status_changed {
            self.emit(EngineUpdate::Connection(ConnectionStatus::Disconnected));
        }
        if had_appointments {
            self.emit(EngineUpdate::AppointmentsChanged);
        }
        if had_notifications {
            self.emit(EngineUpdate::NotificationsChanged { unread: 0 });
        }
        Ok(())
    }

    // ── Event merges ────────────────────────────────────────

    fn apply_event(&self, generation: u64, event: GatewayEvent) -> Result<MergeOutcome, EngineError> {
        match event {
            GatewayEvent::AppointmentNew(appointment) => {
                self.merge_appointment_created(generation, appointment)
            }
            GatewayEvent::AppointmentStatusUpdated(update) => {
                self.merge_status_changed(generation, update)
            }
            GatewayEvent::Notification(notification) => {
                self.merge_notification(generation, notification)
            }
        }
    }

    fn merge_appointment_created(
        &self,
        generation: u64,
        appointment: Appointment,
    ) -> Result<MergeOutcome, EngineError> {
        let id = appointment.id.clone();
        let outcome = self.with_view(generation, |v| v.insert_appointment(appointment))?;
        match outcome {
            MergeOutcome::Applied => {
                tracing::debug!(appointment_id = %id, "Appointment added");
                self.emit(EngineUpdate::AppointmentsChanged);
            }
            _ => tracing::debug!(appointment_id = %id, "Duplicate appointment ignored"),
        }
        Ok(outcome)
    }

    fn merge_status_changed(
        &self,
        generation: u64,
        update: AppointmentStatusUpdate,
    ) -> Result<MergeOutcome, EngineError> {
        let outcome = self.with_view(generation, |v| v.apply_status(&update))?;
        match outcome {
            MergeOutcome::Applied => {
                tracing::debug!(appointment_id = %update.id, status = %update.status, "Appointment status updated");
                self.emit(EngineUpdate::AppointmentsChanged);
            }
            MergeOutcome::UnknownId => {
                tracing::debug!(appointment_id = %update.id, "Status update for unknown appointment ignored");
            }
            MergeOutcome::IllegalTransition { from } => {
                tracing::warn!(
                    appointment_id = %update.id,
                    from = %from,
                    to = %update.status,
                    "Discarding illegal status transition"
                );
            }
            MergeOutcome::Duplicate | MergeOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    fn merge_notification(
        &self,
        generation: u64,
        notification: Notification,
    ) -> Result<MergeOutcome, EngineError> {
        let id = notification.id.clone();
        let (outcome, unread) = self.with_view(generation, |v| {
            let outcome = v.insert_notification(notification);
            (outcome, v.unread_count())
        })?;
        if outcome.changed() {
            tracing::debug!(notification_id = %id, unread, "Notification received");
            self.emit(EngineUpdate::NotificationsChanged { unread });
        } else {
            tracing::debug!(notification_id = %id, "Duplicate notification ignored");
        }
        Ok(outcome)
    }

    // ── Authoritative fetches ───────────────────────────────

    async fn refresh_appointments(&self, generation: u64) -> Result<usize, EngineError> {
        let fetched = self.appointments.list().await.map_err(|e| {
            tracing::warn!(error = %e, "Appointment refresh failed; keeping local list");
            EngineError::Fetch(e)
        })?;
        let count = fetched.len();
        self.with_view(generation, |v| v.replace_appointments(fetched))?;
        self.emit(EngineUpdate::AppointmentsChanged);
        Ok(count)
    }

    async fn refresh_notifications(&self, generation: u64) -> Result<usize, EngineError> {
        let fetched = self.notifications.list().await.map_err(|e| {
            tracing::warn!(error = %e, "Notification refresh failed; keeping local inbox");
            EngineError::Fetch(e)
        })?;
        let count = fetched.len();
        let unread = self.with_view(generation, |v| {
            v.replace_notifications(fetched);
            v.unread_count()
        })?;
        self.emit(EngineUpdate::NotificationsChanged { unread });
        Ok(count)
    }

    /// Refresh both collections after a (re)connect. Returns false once the
    /// generation is stale.
    async fn resync(&self, generation: u64) -> bool {
        let (appointments, notifications) = tokio::join!(
            self.refresh_appointments(generation),
            self.refresh_notifications(generation)
        );
        let mut current = true;
        for result in [appointments, notifications] {
            match result {
                Ok(_) => {}
                Err(EngineError::Stale) => current = false,
                Err(e) => self.emit(EngineUpdate::SyncFailed {
                    message: e.user_message(),
                }),
            }
        }
        current
    }

    /// Apply the local half of a finished command. A stale generation means
    /// the session ended meanwhile; the service result stands, the local
    /// merge is skipped.
    fn settle(
        &self,
        generation: u64,
        f: impl FnOnce(&mut LocalView) -> MergeOutcome,
    ) -> Result<MergeOutcome, EngineError> {
        match self.with_view(generation, f) {
            Ok(outcome) => {
                if outcome.changed() {
                    self.emit(EngineUpdate::AppointmentsChanged);
                }
                Ok(outcome)
            }
            Err(EngineError::Stale) => {
                tracing::debug!("Session ended during command; local merge skipped");
                Ok(MergeOutcome::Unchanged)
            }
            Err(e) => Err(e),
        }
    }

    /// Undo optimistic read flips after the service rejected them.
    fn rollback_reads(&self, generation: u64, ids: &[String], revision: u64) {
        if !self.config.rollback_failed_reads || ids.is_empty() {
            return;
        }
        match self.with_view(generation, |v| {
            let reverted = v.revert_read(ids, revision);
            (reverted, v.unread_count())
        }) {
            Ok((true, unread)) => {
                tracing::debug!(count = ids.len(), unread, "Rolled back read flags");
                self.emit(EngineUpdate::NotificationsChanged { unread });
            }
            Ok((false, _)) => {
                tracing::debug!("Inbox replaced since the read; rollback skipped");
            }
            Err(e) => tracing::debug!(error = %e, "Read rollback skipped"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// RealtimeEngine
// ═══════════════════════════════════════════════════════════

/// Handle to the engine. Cheap to clone; all clones share one view and one
/// gateway connection.
#[derive(Clone)]
pub struct RealtimeEngine {
    inner: Arc<EngineInner>,
}

impl RealtimeEngine {
    pub fn new(
        appointments: Arc<dyn AppointmentService>,
        notifications: Arc<dyn NotificationService>,
        connector: Arc<dyn ChannelConnector>,
        policy: ReconnectionPolicy,
        config: EngineConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));
        Self {
            inner: Arc::new(EngineInner {
                view: RwLock::new(LocalView::new(config.dedupe_notifications)),
                appointments,
                notifications,
                connector,
                policy,
                config,
                updates,
                connection: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.inner.updates.subscribe()
    }

    // ── Connection lifecycle ────────────────────────────────

    /// Open the gateway channel for `session` and start applying its
    /// events. No-op while already running for the same session; another
    /// session's channel is torn down first.
    ///
    /// A failed first attempt is not an error: the session task keeps
    /// retrying with backoff and reports through [`ConnectionStatus`].
    pub async fn connect(&self, session: &Session) -> Result<(), EngineError> {
        let mut connection = self.inner.connection.lock().await;

        if let Some(active) = connection.as_ref() {
            if active.session_id == session.user_id && !active.task.is_finished() {
                tracing::debug!(session_id = %session.user_id, "Already connected");
                return Ok(());
            }
        }
        if let Some(previous) = connection.take() {
            tracing::info!(
                previous = %previous.session_id,
                session_id = %session.user_id,
                "Replacing realtime session"
            );
            self.inner.end_session()?;
            stop_session_task(previous).await;
        }

        let generation = {
            let mut view = self.inner.view.write().map_err(|_| EngineError::LockPoisoned)?;
            let generation = view.advance_generation();
            view.clear();
            view.set_session(Some(session.user_id.clone()));
            view.set_status(ConnectionStatus::Connecting);
            generation
        };
        self.inner
            .emit(EngineUpdate::Connection(ConnectionStatus::Connecting));

        let first = match self.inner.connector.connect(&session.user_id).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(session_id = %session.user_id, error = %e, "Realtime connect failed; will retry");
                None
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = SessionWorker::new(
            Arc::downgrade(&self.inner),
            self.inner.connector.clone(),
            session.user_id.clone(),
            generation,
            self.inner.policy,
            shutdown_rx,
        );
        let task = tokio::spawn(worker.run(first));

        *connection = Some(ActiveChannel {
            session_id: session.user_id.clone(),
            shutdown,
            task,
        });
        Ok(())
    }

    /// Tear the channel down and clear the session's data. Once this
    /// returns, no event or in-flight result of the old session is applied.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        let mut connection = self.inner.connection.lock().await;
        let active = connection.take();
        self.inner.end_session()?;
        if let Some(active) = active {
            tracing::info!(session_id = %active.session_id, "Realtime session disconnected");
            stop_session_task(active).await;
        }
        Ok(())
    }

    // ── Event handlers ──────────────────────────────────────

    /// Discarded when the id is already held, else inserted at the head.
    pub fn on_appointment_created(
        &self,
        appointment: Appointment,
    ) -> Result<MergeOutcome, EngineError> {
        let generation = self.inner.active_generation()?;
        self.inner.merge_appointment_created(generation, appointment)
    }

    /// Overwrites only the status of a held record. Unknown ids and
    /// transitions the lifecycle forbids are ignored.
    pub fn on_appointment_status_changed(
        &self,
        update: AppointmentStatusUpdate,
    ) -> Result<MergeOutcome, EngineError> {
        let generation = self.inner.active_generation()?;
        self.inner.merge_status_changed(generation, update)
    }

    pub fn on_notification_received(
        &self,
        notification: Notification,
    ) -> Result<MergeOutcome, EngineError> {
        let generation = self.inner.active_generation()?;
        self.inner.merge_notification(generation, notification)
    }

    // ── Refresh ─────────────────────────────────────────────

    /// Replace the local list with the service's. On failure the list is
    /// left as it was.
    pub async fn refresh_appointments(&self) -> Result<(), EngineError> {
        let generation = self.inner.active_generation()?;
        let count = self.inner.refresh_appointments(generation).await?;
        tracing::debug!(count, "Appointments refreshed");
        Ok(())
    }

    pub async fn refresh_notifications(&self) -> Result<(), EngineError> {
        let generation = self.inner.active_generation()?;
        let count = self.inner.refresh_notifications(generation).await?;
        tracing::debug!(count, "Notifications refreshed");
        Ok(())
    }

    // ── Read flags ──────────────────────────────────────────

    /// Optimistically mark `id` read, then confirm with the service.
    /// Already-read items are left alone without a service call.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), EngineError> {
        let generation = self.inner.active_generation()?;
        let (outcome, revision, unread) = self.inner.with_view(generation, |v| {
            let revision = v.notifications_revision();
            (v.mark_read(id), revision, v.unread_count())
        })?;

        match outcome {
            MergeOutcome::Unchanged => return Ok(()),
            MergeOutcome::Applied => {
                self.inner
                    .emit(EngineUpdate::NotificationsChanged { unread });
            }
            _ => {}
        }

        if let Err(e) = self.inner.notifications.mark_read(id).await {
            tracing::warn!(notification_id = %id, error = %e, "Mark-as-read rejected");
            if outcome.changed() {
                self.inner
                    .rollback_reads(generation, &[id.to_string()], revision);
            }
            return Err(EngineError::Command(e));
        }
        Ok(())
    }

    /// Flip every unread item in one step, then confirm with the service.
    pub async fn mark_all_as_read(&self) -> Result<(), EngineError> {
        let generation = self.inner.active_generation()?;
        let (flipped, revision) = self.inner.with_view(generation, |v| {
            let revision = v.notifications_revision();
            (v.mark_all_read(), revision)
        })?;
        if !flipped.is_empty() {
            self.inner
                .emit(EngineUpdate::NotificationsChanged { unread: 0 });
        }

        if let Err(e) = self.inner.notifications.mark_all_read().await {
            tracing::warn!(count = flipped.len(), error = %e, "Mark-all-as-read rejected");
            self.inner.rollback_reads(generation, &flipped, revision);
            return Err(EngineError::Command(e));
        }
        tracing::debug!(count = flipped.len(), "All notifications marked read");
        Ok(())
    }

    // ── Appointment commands ────────────────────────────────

    /// Book an appointment. The created record is merged like a pushed
    /// `appointmentNew`, so a racing push never duplicates it.
    pub async fn create_appointment(
        &self,
        request: &NewAppointment,
    ) -> Result<Appointment, EngineError> {
        let generation = self.inner.active_generation()?;
        let created = self
            .inner
            .appointments
            .create(request)
            .await
            .map_err(EngineError::Command)?;
        let record = created.clone();
        self.inner
            .settle(generation, move |v| v.insert_appointment(record))?;
        Ok(created)
    }

    /// Doctor review. Only APPROVED and REJECTED are accepted.
    pub async fn update_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        if !status.is_review_decision() {
            return Err(EngineError::InvalidStatus(status));
        }
        let generation = self.inner.active_generation()?;
        let updated = self
            .inner
            .appointments
            .update_status(id, status)
            .await
            .map_err(EngineError::Command)?;
        let record = updated.clone();
        self.inner
            .settle(generation, move |v| v.replace_appointment(record))?;
        tracing::info!(appointment_id = %id, status = %status, "Appointment reviewed");
        Ok(updated)
    }

    pub async fn cancel_appointment(&self, id: &str) -> Result<(), EngineError> {
        let generation = self.inner.active_generation()?;
        self.inner
            .appointments
            .cancel(id)
            .await
            .map_err(EngineError::Command)?;
        self.inner.settle(generation, |v| v.remove_appointment(id))?;
        tracing::info!(appointment_id = %id, "Appointment cancelled");
        Ok(())
    }

    // ── Readers ─────────────────────────────────────────────

    pub fn appointments(&self) -> Result<Vec<Appointment>, EngineError> {
        self.inner.read_view(|v| v.appointments().to_vec())
    }

    pub fn notifications(&self) -> Result<Vec<Notification>, EngineError> {
        self.inner.read_view(|v| v.notifications().to_vec())
    }

    pub fn unread_count(&self) -> Result<usize, EngineError> {
        self.inner.read_view(LocalView::unread_count)
    }

    pub fn connection_status(&self) -> Result<ConnectionStatus, EngineError> {
        self.inner.read_view(LocalView::status)
    }

    /// Pending / approved / cancelled counters, derived on every call.
    pub fn appointment_stats(&self) -> Result<AppointmentStats, EngineError> {
        self.inner.read_view(LocalView::appointment_stats)
    }

    pub fn sorted_appointments(&self, order: SortOrder) -> Result<Vec<Appointment>, EngineError> {
        self.inner.read_view(|v| v.sorted_appointments(order))
    }

    pub fn session_id(&self) -> Result<Option<String>, EngineError> {
        self.inner.read_view(|v| v.session().map(str::to_string))
    }

    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        self.inner.read_view(|v| EngineSnapshot {
            session_id: v.session().map(str::to_string),
            status: v.status(),
            appointments: v.appointments().to_vec(),
            notifications: v.notifications().to_vec(),
            unread_count: v.unread_count(),
            appointment_stats: v.appointment_stats(),
        })
    }
}

async fn stop_session_task(active: ActiveChannel) {
    let ActiveChannel {
        session_id,
        shutdown,
        mut task,
    } = active;
    let _ = shutdown.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
        tracing::warn!(session_id = %session_id, "Session task did not stop in time; aborting");
        task.abort();
    }
}
