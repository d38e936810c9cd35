use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Role;

/// Identity payload returned by login, register and `me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub role: Role,
}

/// Entry of the doctor directory shown by the booking form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// The authenticated identity driving one engine connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            name: user.name.clone(),
            email: user.email.clone(),
            image: user.image.clone(),
            started_at: Utc::now(),
        }
    }

    /// Refresh display fields after a profile edit. Identity and start time
    /// are kept.
    pub fn apply_profile(&mut self, user: &User) {
        self.name = user.name.clone();
        self.email = user.email.clone();
        self.image = user.image.clone();
    }

    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }
}

/// Body of `PATCH /api/auth/profile`. Absent fields are left unchanged by
/// the identity service; `image: Some(None)` removes the picture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Option<String>>,
}

impl ProfileUpdate {
    /// Keep only what actually differs from `current`. Blank passwords are
    /// treated as "not provided".
    pub fn changes_from(&self, current: &User) -> ProfileUpdate {
        let non_blank = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        ProfileUpdate {
            name: self.name.clone().filter(|n| *n != current.name),
            current_password: non_blank(&self.current_password),
            new_password: non_blank(&self.new_password),
            image: self.image.clone().filter(|img| *img != current.image),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.current_password.is_none()
            && self.new_password.is_none()
            && self.image.is_none()
    }
}
