//! Pure merge state of one session: the two collections, the connection
//! status and the generation fence. No I/O; every rule that decides how a
//! pushed event or a fetch result changes the local collections lives here.

use serde::{Deserialize, Serialize};

use crate::models::{Appointment, AppointmentStatus, AppointmentStatusUpdate, Notification};

use super::ConnectionStatus;

/// How a single merge affected the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Id already present; nothing changed.
    Duplicate,
    /// Target id is not held locally; nothing changed.
    UnknownId,
    /// Status change not reachable from the current status; discarded.
    IllegalTransition { from: AppointmentStatus },
    /// Target already in the requested state.
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        self == MergeOutcome::Applied
    }
}

/// Dashboard counters, derived from the appointment list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    /// Cancelled and rejected together.
    pub cancelled: usize,
}

/// Ordering by appointment date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

#[derive(Debug)]
pub struct LocalView {
    generation: u64,
    /// Session the current generation belongs to. `None` between sessions.
    session: Option<String>,
    appointments: Vec<Appointment>,
    notifications: Vec<Notification>,
    /// Bumped whenever the inbox is replaced wholesale, so a late rollback
    /// never overwrites authoritative data.
    notifications_revision: u64,
    status: ConnectionStatus,
    dedupe_notifications: bool,
}

impl LocalView {
    pub fn new(dedupe_notifications: bool) -> Self {
        Self {
            generation: 0,
            session: None,
            appointments: Vec::new(),
            notifications: Vec::new(),
            notifications_revision: 0,
            status: ConnectionStatus::Disconnected,
            dedupe_notifications,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a new generation. Work tagged with an older one is discarded.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn set_session(&mut self, session: Option<String>) {
        self.session = session;
    }

    /// The current generation, if a session owns it.
    pub fn active_generation(&self) -> Option<u64> {
        self.session.as_ref().map(|_| self.generation)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Returns true when the status actually changed.
    pub fn set_status(&mut self, status: ConnectionStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn notifications_revision(&self) -> u64 {
        self.notifications_revision
    }

    /// Always computed from the collection.
    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn appointment_stats(&self) -> AppointmentStats {
        let mut stats = AppointmentStats {
            total: self.appointments.len(),
            ..AppointmentStats::default()
        };
        for a in &self.appointments {
            match a.status {
                AppointmentStatus::Pending => stats.pending += 1,
                AppointmentStatus::Approved => stats.approved += 1,
                AppointmentStatus::Cancelled | AppointmentStatus::Rejected => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Copy of the list ordered by `date_time`. Equal dates keep list order.
    pub fn sorted_appointments(&self, order: SortOrder) -> Vec<Appointment> {
        let mut sorted = self.appointments.clone();
        match order {
            SortOrder::Newest => sorted.sort_by(|a, b| b.date_time.cmp(&a.date_time)),
            SortOrder::Oldest => sorted.sort_by(|a, b| a.date_time.cmp(&b.date_time)),
        }
        sorted
    }

    /// Drop both collections (session ended).
    pub fn clear(&mut self) {
        self.appointments.clear();
        self.notifications.clear();
        self.notifications_revision += 1;
    }

    // ── Appointments ────────────────────────────────────────

    pub fn replace_appointments(&mut self, appointments: Vec<Appointment>) {
        self.appointments = appointments;
    }

    /// Created-event rule: an id already held is discarded, anything else
    /// goes to the head.
    pub fn insert_appointment(&mut self, appointment: Appointment) -> MergeOutcome {
        if self.appointments.iter().any(|a| a.id == appointment.id) {
            return MergeOutcome::Duplicate;
        }
        self.appointments.insert(0, appointment);
        MergeOutcome::Applied
    }

    /// Overwrites only `status`; never synthesizes a record.
    pub fn apply_status(&mut self, update: &AppointmentStatusUpdate) -> MergeOutcome {
        let Some(current) = self.appointments.iter_mut().find(|a| a.id == update.id) else {
            return MergeOutcome::UnknownId;
        };
        if current.status == update.status {
            return MergeOutcome::Unchanged;
        }
        if !current.status.can_transition_to(update.status) {
            return MergeOutcome::IllegalTransition {
                from: current.status,
            };
        }
        current.status = update.status;
        MergeOutcome::Applied
    }

    /// Swap in the service's copy of a record held locally.
    pub fn replace_appointment(&mut self, appointment: Appointment) -> MergeOutcome {
        match self.appointments.iter_mut().find(|a| a.id == appointment.id) {
            Some(slot) => {
                *slot = appointment;
                MergeOutcome::Applied
            }
            None => MergeOutcome::UnknownId,
        }
    }

    pub fn remove_appointment(&mut self, id: &str) -> MergeOutcome {
        let before = self.appointments.len();
        self.appointments.retain(|a| a.id != id);
        if self.appointments.len() == before {
            MergeOutcome::UnknownId
        } else {
            MergeOutcome::Applied
        }
    }

    // ── Notifications ───────────────────────────────────────

    pub fn replace_notifications(&mut self, notifications: Vec<Notification>) {
        self.notifications = notifications;
        self.notifications_revision += 1;
    }

    pub fn insert_notification(&mut self, notification: Notification) -> MergeOutcome {
        if self.dedupe_notifications && self.notifications.iter().any(|n| n.id == notification.id)
        {
            return MergeOutcome::Duplicate;
        }
        self.notifications.insert(0, notification);
        MergeOutcome::Applied
    }

    /// Flip one item to read.
    pub fn mark_read(&mut self, id: &str) -> MergeOutcome {
        let mut outcome = MergeOutcome::UnknownId;
        // Without dedupe the same id may appear more than once
        for n in self.notifications.iter_mut().filter(|n| n.id == id) {
            if n.read {
                if outcome == MergeOutcome::UnknownId {
                    outcome = MergeOutcome::Unchanged;
                }
            } else {
                n.read = true;
                outcome = MergeOutcome::Applied;
            }
        }
        outcome
    }

    /// Flip every unread item in one step. Returns the ids flipped.
    pub fn mark_all_read(&mut self) -> Vec<String> {
        let mut flipped = Vec::new();
        for n in self.notifications.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped.push(n.id.clone());
        }
        flipped
    }

    /// Undo an optimistic read flip, unless the inbox has been replaced since
    /// `revision` was taken. Returns true when anything was reverted.
    pub fn revert_read(&mut self, ids: &[String], revision: u64) -> bool {
        if revision != self.notifications_revision {
            return false;
        }
        let mut reverted = false;
        for n in self
            .notifications
            .iter_mut()
            .filter(|n| n.read && ids.contains(&n.id))
        {
            n.read = false;
            reverted = true;
        }
        reverted
    }
}
