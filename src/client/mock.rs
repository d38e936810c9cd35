//! In-memory collaborators for tests and offline presentation work.
//!
//! Each mock keeps the authoritative collection the real service would own,
//! counts calls, and can be switched into a failing mode with `fail_with`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{AppointmentService, IdentityService, NotificationService, ServiceError};
use crate::models::{
    Appointment, AppointmentStatus, Doctor, NewAppointment, Notification, ProfileUpdate, Role,
    User,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(what: &str) -> ServiceError {
    ServiceError::Status {
        status: 404,
        message: format!("{what} not found"),
    }
}

// ═══════════════════════════════════════════════════════════
// Appointments
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct AppointmentStore {
    appointments: Vec<Appointment>,
    failure: Option<ServiceError>,
    calls: HashMap<&'static str, usize>,
    next_id: u64,
}

/// Mock appointment service backed by a `Vec`.
pub struct MockAppointmentService {
    patient_id: String,
    store: Mutex<AppointmentStore>,
}

impl MockAppointmentService {
    pub fn new(appointments: Vec<Appointment>) -> Self {
        Self {
            patient_id: "patient-1".to_string(),
            store: Mutex::new(AppointmentStore {
                appointments,
                ..Default::default()
            }),
        }
    }

    /// Replace the authoritative collection.
    pub fn set_appointments(&self, appointments: Vec<Appointment>) {
        lock(&self.store).appointments = appointments;
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        lock(&self.store).appointments.clone()
    }

    /// Every following call fails with `err` until [`recover`](Self::recover).
    pub fn fail_with(&self, err: ServiceError) {
        lock(&self.store).failure = Some(err);
    }

    pub fn recover(&self) {
        lock(&self.store).failure = None;
    }

    pub fn calls(&self, op: &str) -> usize {
        lock(&self.store).calls.get(op).copied().unwrap_or(0)
    }

    fn begin(&self, op: &'static str) -> Result<MutexGuard<'_, AppointmentStore>, ServiceError> {
        let mut store = lock(&self.store);
        *store.calls.entry(op).or_default() += 1;
        if let Some(err) = store.failure.clone() {
            return Err(err);
        }
        Ok(store)
    }
}

impl Default for MockAppointmentService {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl AppointmentService for MockAppointmentService {
    async fn list(&self) -> Result<Vec<Appointment>, ServiceError> {
        Ok(self.begin("list")?.appointments.clone())
    }

    async fn create(&self, request: &NewAppointment) -> Result<Appointment, ServiceError> {
        let mut store = self.begin("create")?;
        store.next_id += 1;
        let created = Appointment {
            id: format!("mock-appt-{}", store.next_id),
            patient_id: self.patient_id.clone(),
            doctor_id: request.doctor_id.clone(),
            date_time: request.date_time,
            reason: request.reason.clone(),
            status: AppointmentStatus::Pending,
            created_at: Some(Utc::now()),
            patient_name: None,
            doctor_name: request.doctor_name.clone(),
            patient_image: request.patient_image.clone(),
            doctor_image: request.doctor_image.clone(),
        };
        store.appointments.insert(0, created.clone());
        Ok(created)
    }

    async fn update_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, ServiceError> {
        let mut store = self.begin("update_status")?;
        let appt = store
            .appointments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("Appointment"))?;
        appt.status = status;
        Ok(appt.clone())
    }

    async fn cancel(&self, id: &str) -> Result<(), ServiceError> {
        let mut store = self.begin("cancel")?;
        let before = store.appointments.len();
        store.appointments.retain(|a| a.id != id);
        if store.appointments.len() == before {
            return Err(not_found("Appointment"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct NotificationStore {
    notifications: Vec<Notification>,
    failure: Option<ServiceError>,
    calls: HashMap<&'static str, usize>,
}

/// Mock notification service backed by a `Vec`.
#[derive(Default)]
pub struct MockNotificationService {
    store: Mutex<NotificationStore>,
}

impl MockNotificationService {
    pub fn new(notifications: Vec<Notification>) -> Self {
        Self {
            store: Mutex::new(NotificationStore {
                notifications,
                ..Default::default()
            }),
        }
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        lock(&self.store).notifications = notifications;
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.store).notifications.clone()
    }

    pub fn fail_with(&self, err: ServiceError) {
        lock(&self.store).failure = Some(err);
    }

    pub fn recover(&self) {
        lock(&self.store).failure = None;
    }

    pub fn calls(&self, op: &str) -> usize {
        lock(&self.store).calls.get(op).copied().unwrap_or(0)
    }

    fn begin(&self, op: &'static str) -> Result<MutexGuard<'_, NotificationStore>, ServiceError> {
        let mut store = lock(&self.store);
        *store.calls.entry(op).or_default() += 1;
        if let Some(err) = store.failure.clone() {
            return Err(err);
        }
        Ok(store)
    }
}

#[async_trait]
impl NotificationService for MockNotificationService {
    async fn list(&self) -> Result<Vec<Notification>, ServiceError> {
        Ok(self.begin("list")?.notifications.clone())
    }

    async fn mark_read(&self, id: &str) -> Result<(), ServiceError> {
        let mut store = self.begin("mark_read")?;
        let n = store
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| not_found("Notification"))?;
        n.read = true;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ServiceError> {
        let mut store = self.begin("mark_all_read")?;
        store.notifications.iter_mut().for_each(|n| n.read = true);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct IdentityStore {
    accounts: Vec<(User, String)>,
    current: Option<String>,
    failure: Option<ServiceError>,
    next_id: u64,
}

/// Mock identity service with an in-memory account table.
#[derive(Default)]
pub struct MockIdentityService {
    store: Mutex<IdentityStore>,
}

impl MockIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account that can log in with `password`.
    pub fn with_account(self, user: User, password: &str) -> Self {
        lock(&self.store).accounts.push((user, password.to_string()));
        self
    }

    /// Pretend the browser already holds a session cookie for `user_id`.
    pub fn with_active_session(self, user_id: &str) -> Self {
        lock(&self.store).current = Some(user_id.to_string());
        self
    }

    pub fn fail_with(&self, err: ServiceError) {
        lock(&self.store).failure = Some(err);
    }

    pub fn recover(&self) {
        lock(&self.store).failure = None;
    }

    pub fn is_logged_in(&self) -> bool {
        lock(&self.store).current.is_some()
    }

    fn begin(&self) -> Result<MutexGuard<'_, IdentityStore>, ServiceError> {
        let store = lock(&self.store);
        if let Some(err) = store.failure.clone() {
            return Err(err);
        }
        Ok(store)
    }
}

fn unauthorized(message: &str) -> ServiceError {
    ServiceError::Status {
        status: 401,
        message: message.to_string(),
    }
}

#[async_trait]
impl IdentityService for MockIdentityService {
    async fn login(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let mut store = self.begin()?;
        let email = email.trim().to_lowercase();
        let user = store
            .accounts
            .iter()
            .find(|(u, pw)| u.email == email && pw == password)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| unauthorized("Invalid credentials"))?;
        store.current = Some(user.id.clone());
        Ok(user)
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(), ServiceError> {
        let mut store = self.begin()?;
        let email = email.trim().to_lowercase();
        if store.accounts.iter().any(|(u, _)| u.email == email) {
            return Err(ServiceError::Status {
                status: 409,
                message: "Email already registered".to_string(),
            });
        }
        store.next_id += 1;
        let user = User {
            id: format!("mock-user-{}", store.next_id),
            email,
            name: name.to_string(),
            image: None,
            role,
        };
        store.accounts.push((user, password.to_string()));
        Ok(())
    }

    async fn logout(&self) -> Result<(), ServiceError> {
        self.begin()?.current = None;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<User>, ServiceError> {
        let store = self.begin()?;
        Ok(store.current.as_ref().and_then(|id| {
            store
                .accounts
                .iter()
                .find(|(u, _)| &u.id == id)
                .map(|(u, _)| u.clone())
        }))
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ServiceError> {
        let mut store = self.begin()?;
        let current = store
            .current
            .clone()
            .ok_or_else(|| unauthorized("Authentication required"))?;
        let (user, password) = store
            .accounts
            .iter_mut()
            .find(|(u, _)| u.id == current)
            .ok_or_else(|| not_found("User"))?;

        if let Some(new_password) = &update.new_password {
            if update.current_password.as_deref() != Some(password.as_str()) {
                return Err(ServiceError::Status {
                    status: 400,
                    message: "Current password is incorrect".to_string(),
                });
            }
            *password = new_password.clone();
        }
        if let Some(name) = &update.name {
            user.name = name.clone();
        }
        if let Some(image) = &update.image {
            user.image = image.clone();
        }
        Ok(())
    }

    async fn list_doctors(&self) -> Result<Vec<Doctor>, ServiceError> {
        let store = self.begin()?;
        Ok(store
            .accounts
            .iter()
            .filter(|(u, _)| u.role == Role::Doctor)
            .map(|(u, _)| Doctor {
                id: u.id.clone(),
                name: u.name.clone(),
                email: u.email.clone(),
                image: u.image.clone(),
            })
            .collect())
    }
}
