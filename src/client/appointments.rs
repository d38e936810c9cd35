use async_trait::async_trait;
use serde::Serialize;

use super::{endpoint, HttpTransport, ServiceError};
use crate::models::{Appointment, AppointmentStatus, NewAppointment};

/// Appointment service, scoped server-side to the session's user.
#[async_trait]
pub trait AppointmentService: Send + Sync {
    async fn list(&self) -> Result<Vec<Appointment>, ServiceError>;

    async fn create(&self, request: &NewAppointment) -> Result<Appointment, ServiceError>;

    async fn update_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, ServiceError>;

    async fn cancel(&self, id: &str) -> Result<(), ServiceError>;
}

#[derive(Serialize)]
struct StatusBody {
    status: AppointmentStatus,
}

/// reqwest implementation against `/api/appointments`.
pub struct HttpAppointmentService {
    base_url: String,
    http: HttpTransport,
}

impl HttpAppointmentService {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl AppointmentService for HttpAppointmentService {
    async fn list(&self) -> Result<Vec<Appointment>, ServiceError> {
        let url = endpoint(&self.base_url, &["api", "appointments"])?;
        let request = self.http.client().get(url);
        self.http
            .send_json(request, "Failed to fetch appointments")
            .await
    }

    async fn create(&self, body: &NewAppointment) -> Result<Appointment, ServiceError> {
        let url = endpoint(&self.base_url, &["api", "appointments"])?;
        let request = self.http.client().post(url).json(body);
        let created: Appointment = self
            .http
            .send_json(request, "Failed to create appointment")
            .await?;
        tracing::info!(appointment_id = %created.id, doctor_id = %created.doctor_id, "Appointment booked");
        Ok(created)
    }

    async fn update_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment, ServiceError> {
        let url = endpoint(&self.base_url, &["api", "appointments", id, "status"])?;
        let request = self.http.client().patch(url).json(&StatusBody { status });
        self.http
            .send_json(request, "Failed to update status")
            .await
    }

    async fn cancel(&self, id: &str) -> Result<(), ServiceError> {
        let url = endpoint(&self.base_url, &["api", "appointments", id])?;
        let request = self.http.client().delete(url);
        self.http
            .send(request, "Failed to cancel appointment")
            .await?;
        Ok(())
    }
}
