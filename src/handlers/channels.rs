use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    handlers::response::{ok, ApiResult},
    models::{
        booking::{InboundChannelEvent, ReconciliationRecord},
        channel::{
            ChannelAuth, ChannelConfig, ChannelConfigInput, ChannelCredential, ChannelEndpoints, ChannelHealth,
            ChannelKind, ChannelLifecycle, CredentialRotation, CredentialStatus, SupportedCurrency,
        },
        event::{EventEnvelope, EventType},
    },
    services::{distributor::DistributeRatesRequest, reconciler::ReconcileResult},
    AppState,
};

/// Credential as shown to callers: no secret material
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialView {
    pub id: Uuid,
    pub scheme: &'static str,
    pub status: CredentialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&ChannelCredential> for CredentialView {
    fn from(credential: &ChannelCredential) -> Self {
        let (scheme, key_id) = match &credential.auth {
            ChannelAuth::Basic { username, .. } => ("basic", Some(username.clone())),
            ChannelAuth::Bearer { .. } => ("bearer", None),
            ChannelAuth::Hmac { key_id, .. } => ("hmac", Some(key_id.clone())),
        };
        Self {
            id: credential.id,
            scheme,
            status: credential.status,
            key_id,
            expires_at: credential.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfigView {
    pub hotel_id: String,
    pub channel_id: String,
    pub kind: ChannelKind,
    pub external_hotel_id: String,
    pub primary_credential: CredentialView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_credential: Option<CredentialView>,
    pub endpoints: ChannelEndpoints,
    pub supported_currencies: Vec<SupportedCurrency>,
    pub timeout_ms: u64,
    pub sync_flags: Vec<EventType>,
    pub health: ChannelHealth,
    pub lifecycle: ChannelLifecycle,
    pub updated_at: DateTime<Utc>,
}

impl From<ChannelConfig> for ChannelConfigView {
    fn from(config: ChannelConfig) -> Self {
        Self {
            primary_credential: CredentialView::from(&config.credentials.primary),
            backup_credential: config.credentials.backup.as_ref().map(CredentialView::from),
            hotel_id: config.hotel_id,
            channel_id: config.channel_id,
            kind: config.kind,
            external_hotel_id: config.external_hotel_id,
            endpoints: config.endpoints,
            supported_currencies: config.supported_currencies,
            timeout_ms: config.timeout_ms,
            sync_flags: config.sync_flags,
            health: config.health,
            lifecycle: config.lifecycle,
            updated_at: config.updated_at,
        }
    }
}

/// GET /api/hotels/{hotel_id}/channels
pub async fn list_channel_configs(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
) -> ApiResult<Vec<ChannelConfigView>> {
    let configs = state.registry.list(&hotel_id).await?;
    ok(configs.into_iter().map(ChannelConfigView::from).collect())
}

/// PUT /api/hotels/{hotel_id}/channels/{channel_id}
pub async fn upsert_channel_config(
    State(state): State<AppState>,
    Path((hotel_id, channel_id)): Path<(String, String)>,
    Json(mut input): Json<ChannelConfigInput>,
) -> ApiResult<ChannelConfigView> {
    input.channel_id = channel_id;
    ok(state.registry.upsert(&hotel_id, input).await?.into())
}

/// POST /api/hotels/{hotel_id}/channels/{channel_id}/rotate
pub async fn rotate_channel_credential(
    State(state): State<AppState>,
    Path((hotel_id, channel_id)): Path<(String, String)>,
    Json(rotation): Json<CredentialRotation>,
) -> ApiResult<ChannelConfigView> {
    ok(state
        .registry
        .rotate_credential(&hotel_id, &channel_id, rotation)
        .await?
        .into())
}

/// POST /api/hotels/{hotel_id}/channels/{channel_id}/revoke
pub async fn revoke_channel_credential(
    State(state): State<AppState>,
    Path((hotel_id, channel_id)): Path<(String, String)>,
) -> ApiResult<ChannelConfigView> {
    ok(state.registry.revoke_credential(&hotel_id, &channel_id).await?.into())
}

/// POST /api/hotels/{hotel_id}/distribute
pub async fn distribute_rates(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
    Json(request): Json<DistributeRatesRequest>,
) -> ApiResult<Vec<EventEnvelope>> {
    ok(state.distributor.distribute_rates(&hotel_id, request).await?)
}

/// POST /api/hotels/{hotel_id}/channels/{channel_id}/webhook
///
/// Normalized booking changes pushed by a channel.
pub async fn channel_webhook(
    State(state): State<AppState>,
    Path((hotel_id, channel_id)): Path<(String, String)>,
    Json(mut inbound): Json<InboundChannelEvent>,
) -> ApiResult<ReconcileResult> {
    inbound.channel = channel_id;
    tracing::info!(
        %hotel_id,
        channel_id = %inbound.channel,
        booking = %inbound.channel_booking_id,
        kind = inbound.kind.as_str(),
        sequence = inbound.sequence,
        "Channel webhook received"
    );
    ok(state.reconciler.on_channel_event(&hotel_id, inbound).await?)
}

/// GET /api/hotels/{hotel_id}/reconciliations/unresolved
pub async fn unresolved_reconciliations(
    State(state): State<AppState>,
    Path(hotel_id): Path<String>,
) -> ApiResult<Vec<ReconciliationRecord>> {
    ok(state.reconciler.unresolved(&hotel_id).await?)
}
