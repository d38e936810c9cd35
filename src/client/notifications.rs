use async_trait::async_trait;

use super::{endpoint, HttpTransport, ServiceError};
use crate::models::Notification;

/// Notification service: the session's inbox and its read flags.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn list(&self) -> Result<Vec<Notification>, ServiceError>;

    async fn mark_read(&self, id: &str) -> Result<(), ServiceError>;

    async fn mark_all_read(&self) -> Result<(), ServiceError>;
}

/// reqwest implementation against `/api/notifications`.
pub struct HttpNotificationService {
    base_url: String,
    http: HttpTransport,
}

impl HttpNotificationService {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl NotificationService for HttpNotificationService {
    async fn list(&self) -> Result<Vec<Notification>, ServiceError> {
        let url = endpoint(&self.base_url, &["api", "notifications"])?;
        let request = self.http.client().get(url);
        self.http
            .send_json(request, "Failed to fetch notifications")
            .await
    }

    // The updated record in the response body is ignored: the engine has
    // already applied the flag locally.
    async fn mark_read(&self, id: &str) -> Result<(), ServiceError> {
        let url = endpoint(&self.base_url, &["api", "notifications", id, "read"])?;
        let request = self.http.client().patch(url).json(&serde_json::json!({}));
        self.http.send(request, "Failed to mark as read").await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ServiceError> {
        let url = endpoint(&self.base_url, &["api", "notifications", "read-all"])?;
        let request = self.http.client().patch(url).json(&serde_json::json!({}));
        self.http.send(request, "Failed to mark all as read").await?;
        Ok(())
    }
}
