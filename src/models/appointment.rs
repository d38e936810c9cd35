use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::AppointmentStatus;

/// One booking as returned by the appointment service.
///
/// The participant display fields are denormalized by the service so the
/// dashboard can render a row without a directory lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_image: Option<String>,
}

/// Partial payload of an `appointmentStatusUpdated` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentStatusUpdate {
    pub id: String,
    pub status: AppointmentStatus,
}

/// Booking request body for `POST /api/appointments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub doctor_id: String,
    pub date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_image: Option<String>,
}

impl NewAppointment {
    pub fn new(doctor_id: impl Into<String>, date_time: DateTime<Utc>) -> Self {
        Self {
            doctor_id: doctor_id.into(),
            date_time,
            reason: None,
            doctor_name: None,
            patient_image: None,
            doctor_image: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = if reason.trim().is_empty() { None } else { Some(reason) };
        self
    }
}
