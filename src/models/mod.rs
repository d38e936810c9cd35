//! Wire-level domain types shared by the service clients, the realtime
//! channel and the reconciliation engine. JSON shapes follow the services
//! (camelCase keys, upper-case enum strings).

pub mod appointment;
pub mod enums;
pub mod notification;
pub mod user;

pub use appointment::{Appointment, AppointmentStatusUpdate, NewAppointment};
pub use enums::{AppointmentStatus, Role};
pub use notification::Notification;
pub use user::{Doctor, ProfileUpdate, Session, User};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid {field} value: {value}")]
    InvalidEnum { field: String, value: String },
}
