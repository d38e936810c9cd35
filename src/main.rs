//! Headless Carebook client: signs in, follows the session's realtime
//! updates and logs them until Ctrl-C.
//!
//! Credentials come from `CAREBOOK_EMAIL` / `CAREBOOK_PASSWORD`; without
//! them an existing session cookie is required.

use std::process::ExitCode;

use carebook_lib::config::{self, ClientConfig};
use carebook_lib::core_state::{CoreError, CoreState};
use carebook_lib::engine::{EngineUpdate, RealtimeEngine};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> ExitCode {
    carebook_lib::init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CoreError> {
    let config = ClientConfig::from_env();
    tracing::info!(
        identity = %config.endpoints.identity_url,
        directory = %config.endpoints.directory_url,
        appointments = %config.endpoints.appointment_url,
        notifications = %config.endpoints.notification_url,
        gateway = %config.endpoints.gateway_url,
        "Service endpoints"
    );
    let state = CoreState::from_config(&config)?;
    let mut updates = state.engine().subscribe();

    let credentials = std::env::var("CAREBOOK_EMAIL")
        .ok()
        .zip(std::env::var("CAREBOOK_PASSWORD").ok());
    let session = match credentials {
        Some((email, password)) => state.login(&email, &password).await?,
        None => state
            .restore_session()
            .await?
            .ok_or(CoreError::NoActiveSession)?,
    };
    tracing::info!(user = %session.name, role = %session.role, "Signed in");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => log_update(state.engine(), &update),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Update stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    state.logout().await
}

fn log_update(engine: &RealtimeEngine, update: &EngineUpdate) {
    match update {
        EngineUpdate::AppointmentsChanged => {
            let count = engine.appointments().map(|a| a.len()).unwrap_or(0);
            tracing::info!(count, "Appointments changed");
        }
        EngineUpdate::NotificationsChanged { unread } => {
            tracing::info!(unread, "Notifications changed");
        }
        EngineUpdate::Connection(status) => {
            tracing::info!(status = ?status, "Connection status");
        }
        EngineUpdate::SyncFailed { message } => {
            tracing::warn!(message = %message, "Sync failed");
        }
    }
}
