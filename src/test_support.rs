//! Shared fixtures for unit tests.

use chrono::{TimeZone, Utc};

use crate::models::{Appointment, AppointmentStatus, Notification};

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn appointment(id: &str, status: AppointmentStatus) -> Appointment {
    Appointment {
        id: id.to_string(),
        patient_id: "patient-1".to_string(),
        doctor_id: "doctor-1".to_string(),
        date_time: Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap(),
        reason: Some("Check-up".to_string()),
        status,
        created_at: None,
        patient_name: Some("Ada".to_string()),
        doctor_name: Some("Dr. Okafor".to_string()),
        patient_image: None,
        doctor_image: None,
    }
}

pub fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: "patient-1".to_string(),
        kind: "APPOINTMENT_UPDATE".to_string(),
        title: format!("Update {id}"),
        message: "Your appointment changed".to_string(),
        read,
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        appointment_id: None,
    }
}

pub fn appointment_ids(items: &[Appointment]) -> Vec<&str> {
    items.iter().map(|a| a.id.as_str()).collect()
}

pub fn notification_ids(items: &[Notification]) -> Vec<&str> {
    items.iter().map(|n| n.id.as_str()).collect()
}

/// Poll `cond` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
