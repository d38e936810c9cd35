use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{endpoint, HttpTransport, ServiceError};
use crate::models::{Doctor, ProfileUpdate, Role, User};

/// Identity service: authentication, profile and the doctor directory.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Authenticate and establish the session cookie.
    async fn login(&self, email: &str, password: &str) -> Result<User, ServiceError>;

    /// Create an account. Does not log in.
    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(), ServiceError>;

    async fn logout(&self) -> Result<(), ServiceError>;

    /// The user behind the current session cookie, `None` when not
    /// authenticated.
    async fn current_user(&self) -> Result<Option<User>, ServiceError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ServiceError>;

    async fn list_doctors(&self) -> Result<Vec<Doctor>, ServiceError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: String,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: String,
    password: &'a str,
    role: Role,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct DoctorsEnvelope {
    #[serde(default)]
    doctors: Vec<Doctor>,
}

/// reqwest implementation against `/api/auth/*`. The doctor directory may
/// live on a different host than authentication.
pub struct HttpIdentityService {
    base_url: String,
    directory_url: String,
    http: HttpTransport,
}

impl HttpIdentityService {
    pub fn new(base_url: &str, http: HttpTransport) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            directory_url: base_url.clone(),
            base_url,
            http,
        }
    }

    /// Serve `list_doctors` from `directory_url` instead of the base URL.
    pub fn with_directory_url(mut self, directory_url: &str) -> Self {
        self.directory_url = directory_url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &[&str]) -> Result<reqwest::Url, ServiceError> {
        auth_url(&self.base_url, path)
    }
}

fn auth_url(base_url: &str, path: &[&str]) -> Result<reqwest::Url, ServiceError> {
    let mut segments = vec!["api", "auth"];
    segments.extend_from_slice(path);
    endpoint(base_url, &segments)
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn login(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let body = LoginRequest {
            email: email.trim().to_lowercase(),
            password,
        };
        let request = self.http.client().post(self.url(&["login"])?).json(&body);
        let envelope: UserEnvelope = self.http.send_json(request, "Login failed").await?;
        tracing::info!(user_id = %envelope.user.id, role = %envelope.user.role, "Logged in");
        Ok(envelope.user)
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(), ServiceError> {
        let body = RegisterRequest {
            name,
            email: email.trim().to_lowercase(),
            password,
            role,
        };
        let request = self.http.client().post(self.url(&["register"])?).json(&body);
        self.http.send(request, "Registration failed").await?;
        Ok(())
    }

    async fn logout(&self) -> Result<(), ServiceError> {
        let request = self
            .http
            .client()
            .post(self.url(&["logout"])?)
            .json(&serde_json::json!({}));
        self.http.send(request, "Logout failed").await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<Option<User>, ServiceError> {
        let request = self.http.client().get(self.url(&["me"])?);
        match self
            .http
            .send_json::<UserEnvelope>(request, "Not authenticated")
            .await
        {
            Ok(envelope) => Ok(Some(envelope.user)),
            Err(e) if e.is_unauthorized() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ServiceError> {
        let request = self.http.client().patch(self.url(&["profile"])?).json(update);
        self.http.send(request, "Failed to update profile").await?;
        Ok(())
    }

    async fn list_doctors(&self) -> Result<Vec<Doctor>, ServiceError> {
        let request = self
            .http
            .client()
            .get(auth_url(&self.directory_url, &["doctors"])?);
        let envelope: DoctorsEnvelope = self
            .http
            .send_json(request, "Failed to fetch doctors")
            .await?;
        Ok(envelope.doctors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::test_support::serve;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, patch, post};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    fn service(base: &str) -> HttpIdentityService {
        let http = HttpTransport::new(&ClientConfig::default()).unwrap();
        HttpIdentityService::new(base, http)
    }

    fn ada() -> serde_json::Value {
        serde_json::json!({
            "id": "u-1", "email": "ada@example.com", "name": "Ada",
            "image": null, "role": "PATIENT"
        })
    }

    #[tokio::test]
    async fn login_lowercases_email_and_returns_user() {
        let seen = Arc::new(Mutex::new(None::<serde_json::Value>));
        let seen_in = seen.clone();
        let app = Router::new().route(
            "/api/auth/login",
            post(move |Json(body): Json<serde_json::Value>| {
                let seen = seen_in.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(serde_json::json!({ "user": ada() }))
                }
            }),
        );
        let base = serve(app).await;

        let user = service(&base).login("  Ada@Example.COM ", "pw").await.unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(user.role, Role::Patient);
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["password"], "pw");
    }

    #[tokio::test]
    async fn login_failure_carries_service_message() {
        let app = Router::new().route(
            "/api/auth/login",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "error": "Invalid credentials" })),
                )
            }),
        );
        let base = serve(app).await;

        let err = service(&base).login("ada@example.com", "bad").await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Status {
                status: 401,
                message: "Invalid credentials".into()
            }
        );
    }

    #[tokio::test]
    async fn session_cookie_is_reused_for_me() {
        let app = Router::new()
            .route(
                "/api/auth/login",
                post(|| async {
                    (
                        [(header::SET_COOKIE, "accessToken=tok-1; Path=/")],
                        Json(serde_json::json!({ "user": ada() })),
                    )
                }),
            )
            .route(
                "/api/auth/me",
                get(|headers: axum::http::HeaderMap| async move {
                    let has_cookie = headers
                        .get(header::COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.contains("accessToken=tok-1"));
                    if has_cookie {
                        Json(serde_json::json!({ "user": ada() })).into_response()
                    } else {
                        StatusCode::UNAUTHORIZED.into_response()
                    }
                }),
            );
        let base = serve(app).await;
        let svc = service(&base);

        assert!(svc.current_user().await.unwrap().is_none());
        svc.login("ada@example.com", "pw").await.unwrap();
        let me = svc.current_user().await.unwrap();
        assert_eq!(me.map(|u| u.id).as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn current_user_propagates_server_errors() {
        let app = Router::new().route(
            "/api/auth/me",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = serve(app).await;

        let err = service(&base).current_user().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.user_message(), "Not authenticated");
    }

    #[tokio::test]
    async fn list_doctors_unwraps_envelope() {
        let app = Router::new().route(
            "/api/auth/doctors",
            get(|| async {
                Json(serde_json::json!({
                    "doctors": [
                        { "id": "d-1", "name": "Dr. Okafor", "email": "okafor@clinic.test" },
                        { "id": "d-2", "name": "Dr. Lin", "email": "lin@clinic.test", "image": "https://img/lin.png" }
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let doctors = service(&base).list_doctors().await.unwrap();
        assert_eq!(doctors.len(), 2);
        assert_eq!(doctors[1].image.as_deref(), Some("https://img/lin.png"));
    }

    #[tokio::test]
    async fn list_doctors_uses_directory_url() {
        let directory = Router::new().route(
            "/api/auth/doctors",
            get(|| async {
                Json(serde_json::json!({
                    "doctors": [{ "id": "d-1", "name": "Dr. Okafor", "email": "okafor@clinic.test" }]
                }))
            }),
        );
        let directory_base = serve(directory).await;
        // The auth host has no directory route
        let auth_base = serve(Router::new()).await;

        let svc = service(&auth_base).with_directory_url(&format!("{directory_base}/"));
        let doctors = svc.list_doctors().await.unwrap();
        assert_eq!(doctors[0].id, "d-1");

        let err = service(&auth_base).list_doctors().await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 404, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn register_sends_role_and_lowercased_email() {
        let seen = Arc::new(Mutex::new(None::<serde_json::Value>));
        let seen_in = seen.clone();
        let app = Router::new().route(
            "/api/auth/register",
            post(move |Json(body): Json<serde_json::Value>| {
                let seen = seen_in.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    (StatusCode::CREATED, Json(serde_json::json!({ "message": "ok" })))
                }
            }),
        );
        let base = serve(app).await;

        service(&base)
            .register("Dr. Lin", "LIN@clinic.test", "pw", Role::Doctor)
            .await
            .unwrap();
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["email"], "lin@clinic.test");
        assert_eq!(body["role"], "DOCTOR");
    }

    #[tokio::test]
    async fn update_profile_sends_only_present_fields() {
        let seen = Arc::new(Mutex::new(None::<serde_json::Value>));
        let seen_in = seen.clone();
        let app = Router::new().route(
            "/api/auth/profile",
            patch(move |Json(body): Json<serde_json::Value>| {
                let seen = seen_in.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    Json(serde_json::json!({ "user": ada() }))
                }
            }),
        );
        let base = serve(app).await;

        let update = ProfileUpdate {
            name: Some("Ada L.".into()),
            ..Default::default()
        };
        service(&base).update_profile(&update).await.unwrap();
        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body, serde_json::json!({ "name": "Ada L." }));
    }

    #[tokio::test]
    async fn unreachable_service_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = service(&format!("http://127.0.0.1:{port}"))
            .list_doctors()
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Connection(_)), "got {err:?}");
        assert!(err.is_retryable());
    }
}
