use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string form doubles as the serde wire name.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Role {
    Patient => "PATIENT",
    Doctor => "DOCTOR",
});

str_enum!(AppointmentStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
    Cancelled => "CANCELLED",
});

impl AppointmentStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// PENDING may be approved or rejected, anything may be cancelled, and
    /// re-delivering the current status is always accepted.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        if self == next || next == AppointmentStatus::Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (AppointmentStatus::Pending, AppointmentStatus::Approved)
                | (AppointmentStatus::Pending, AppointmentStatus::Rejected)
        )
    }

    /// Statuses a doctor may set through the status-update command.
    pub fn is_review_decision(self) -> bool {
        matches!(self, AppointmentStatus::Approved | AppointmentStatus::Rejected)
    }
}
