//! Admin-side update of the persisted stream configuration.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ContextDetails, RadioError, RadioErrorHandler};
use crate::events::{EventBus, EventPayload, EventPriority, StreamEvent};
use crate::store::{SettingsStore, StreamSettings, StreamUrlUpdate, SETTINGS_ENTITY};
use crate::validation::validate_stream_url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl AdminIdentity {
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email,
        }
    }

    fn details(&self) -> ContextDetails {
        ContextDetails::admin(self.user_id.clone(), self.email.clone())
    }
}

/// Validate, persist atomically, drop cached settings, then tell players to
/// reload.  Nothing is written when validation fails.
pub async fn update_stream_settings(
    store: &dyn SettingsStore,
    events: &EventBus,
    request: StreamUrlUpdate,
    admin: &AdminIdentity,
) -> Result<StreamSettings, RadioError> {
    if admin.user_id.trim().is_empty() {
        return Err(RadioErrorHandler::handle_auth_error(
            "admin identity required to change stream settings",
            ContextDetails::default(),
        ));
    }
    let details = admin.details();

    validate_stream_url("stream_url", &request.stream_url, &details)?;
    if let Some(fallback) = request.fallback_url.as_deref().filter(|u| !u.trim().is_empty()) {
        validate_stream_url("fallback_url", fallback, &details)?;
    }

    let settings = store
        .update_stream_url_atomic(request, &admin.user_id)
        .await
        .map_err(|e| {
            let mut err =
                RadioErrorHandler::handle_database_error(&e, "update_stream_url", SETTINGS_ENTITY);
            err.context.admin_user_id = details.admin_user_id.clone();
            err.context.admin_user_email = details.admin_user_email.clone();
            err
        })?;
    store.invalidate_entity_cache(SETTINGS_ENTITY).await;

    info!(
        "admin: {} set stream url to {} (revision {})",
        admin.user_id, settings.stream_url, settings.revision
    );
    events.safe_broadcast(StreamEvent::ConfigurationReloadRequired {
        payload: EventPayload::new(
            format!("stream settings updated by admin {}", admin.user_id),
            EventPriority::High,
            "admin",
        ),
        stream_url: Some(settings.stream_url.clone()),
    });
    Ok(settings)
}
