//! Channel configurations: cached lookup, credential lifecycle and health.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{CacheConfig, ChannelDefaults};
use crate::error::{CoreError, CoreResult, StoreResult};
use crate::models::channel::{
    ChannelConfig, ChannelConfigInput, ChannelCredential, ChannelCredentials, ChannelHealth, ChannelLifecycle,
    ConnectionStatus, CredentialRotation, CredentialStatus,
};
use crate::models::event::EventType;
use crate::services::alerts::{Alert, AlertKind, AlertLog};
use crate::services::cache::TtlCache;
use crate::services::channel_adapters::{required_scheme, AuthScheme};
use crate::services::clock::Clock;
use crate::services::currency::validate_code;
use crate::store::Store;

/// Health after a recorded outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    Unchanged,
    /// Was unhealthy or degraded, now active
    Recovered,
    BecameUnhealthy,
}

#[derive(Clone)]
pub struct ChannelRegistry {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    alerts: AlertLog,
    defaults: ChannelDefaults,
    by_channel: TtlCache<(String, String), ChannelConfig>,
    by_hotel: TtlCache<String, Vec<ChannelConfig>>,
    /// Serializes read-modify-write of health and credentials
    write_lock: Arc<Mutex<()>>,
}

impl ChannelRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        alerts: AlertLog,
        defaults: ChannelDefaults,
        cache: &CacheConfig,
    ) -> Self {
        let ttl = Duration::from_secs(cache.channel_config_ttl_secs);
        Self {
            store,
            clock,
            alerts,
            defaults,
            by_channel: TtlCache::new("channel_configs", cache.max_capacity, ttl),
            by_hotel: TtlCache::new("hotel_channels", cache.max_capacity, ttl),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn defaults(&self) -> &ChannelDefaults {
        &self.defaults
    }

    pub async fn get(&self, hotel_id: &str, channel_id: &str) -> StoreResult<Option<ChannelConfig>> {
        let key = (hotel_id.to_string(), channel_id.to_string());
        if let Some(config) = self.by_channel.get(&key).await {
            return Ok(Some(config));
        }
        let config = self.store.get_channel_config(hotel_id, channel_id).await?;
        if let Some(config) = &config {
            self.by_channel.insert(key, config.clone()).await;
        }
        Ok(config)
    }

    pub async fn list(&self, hotel_id: &str) -> StoreResult<Vec<ChannelConfig>> {
        let store = self.store.clone();
        let hotel = hotel_id.to_string();
        self.by_hotel
            .get_or_load(hotel_id.to_string(), false, || async move {
                store.list_channel_configs(&hotel).await
            })
            .await
    }

    /// Uncached read, used before every write
    async fn load(&self, hotel_id: &str, channel_id: &str) -> CoreResult<ChannelConfig> {
        self.store
            .get_channel_config(hotel_id, channel_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("channel {} of hotel {}", channel_id, hotel_id)))
    }

    async fn save(&self, config: ChannelConfig) -> StoreResult<ChannelConfig> {
        let saved = self.store.save_channel_config(config).await?;
        self.by_channel
            .invalidate(&(saved.hotel_id.clone(), saved.channel_id.clone()))
            .await;
        self.by_hotel.invalidate(&saved.hotel_id).await;
        Ok(saved)
    }

    pub async fn upsert(&self, hotel_id: &str, input: ChannelConfigInput) -> CoreResult<ChannelConfig> {
        validate_input(&input, self.defaults.max_timeout_ms)?;
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let existing = self.store.get_channel_config(hotel_id, &input.channel_id).await?;

        let (health, lifecycle) = match &existing {
            Some(current) if current.lifecycle != ChannelLifecycle::Revoked => {
                (current.health.clone(), current.lifecycle)
            }
            _ => (ChannelHealth::default(), ChannelLifecycle::Created),
        };

        let config = ChannelConfig {
            hotel_id: hotel_id.to_string(),
            channel_id: input.channel_id,
            kind: input.kind,
            external_hotel_id: input.external_hotel_id,
            credentials: ChannelCredentials {
                primary: ChannelCredential::new(input.primary_auth, input.primary_expires_at),
                backup: input
                    .backup_auth
                    .map(|auth| ChannelCredential::new(auth, input.backup_expires_at)),
            },
            endpoints: input.endpoints,
            supported_currencies: input.supported_currencies,
            timeout_ms: input.timeout_ms.unwrap_or(self.defaults.timeout_ms),
            retry_policy: input.retry_policy.unwrap_or_default(),
            sync_flags: input.sync_flags,
            room_mappings: input.room_mappings,
            health,
            lifecycle,
            updated_at: now,
        };

        let saved = self.save(config).await?;
        tracing::info!(
            hotel_id,
            channel_id = %saved.channel_id,
            kind = saved.kind.as_str(),
            created = existing.is_none(),
            "Channel config saved"
        );
        Ok(saved)
    }

    /// Install a new primary credential. A degraded channel gets another
    /// chance.
    pub async fn rotate_credential(
        &self,
        hotel_id: &str,
        channel_id: &str,
        rotation: CredentialRotation,
    ) -> CoreResult<ChannelConfig> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        if config.lifecycle == ChannelLifecycle::Revoked {
            return Err(CoreError::Conflict(format!("channel {} is revoked", channel_id)));
        }

        let previous = config.credentials.primary.id;
        config.credentials.primary = ChannelCredential::new(rotation.auth, rotation.expires_at);
        config.lifecycle = ChannelLifecycle::Rotated;
        if config.health.connection_status == ConnectionStatus::Degraded {
            config.health.connection_status = ConnectionStatus::Active;
            config.health.consecutive_failures = 0;
        }
        config.updated_at = self.clock.now();

        let saved = self.save(config).await?;
        tracing::info!(
            hotel_id,
            channel_id,
            %previous,
            current = %saved.credentials.primary.id,
            "Channel credential rotated"
        );
        Ok(saved)
    }

    /// Revoke every credential; the channel receives nothing afterwards
    pub async fn revoke_credential(&self, hotel_id: &str, channel_id: &str) -> CoreResult<ChannelConfig> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        config.credentials.primary.status = CredentialStatus::Revoked;
        if let Some(backup) = config.credentials.backup.as_mut() {
            backup.status = CredentialStatus::Revoked;
        }
        config.lifecycle = ChannelLifecycle::Revoked;
        config.updated_at = self.clock.now();

        let saved = self.save(config).await?;
        tracing::warn!(hotel_id, channel_id, "Channel credentials revoked");
        Ok(saved)
    }

    /// Swap in the backup credential after an auth rejection. `None` when
    /// there is no usable backup.
    pub async fn promote_backup(&self, hotel_id: &str, channel_id: &str) -> CoreResult<Option<ChannelConfig>> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        let now = self.clock.now();
        let backup = match config.credentials.backup.take() {
            Some(backup) if backup.is_usable(now) => backup,
            _ => return Ok(None),
        };

        config.credentials.primary = backup;
        config.lifecycle = ChannelLifecycle::Rotated;
        config.updated_at = now;

        let saved = self.save(config).await?;
        tracing::warn!(
            hotel_id,
            channel_id,
            credential = %saved.credentials.primary.id,
            "Primary credential rejected, switched to backup"
        );
        Ok(Some(saved))
    }

    pub async fn record_success(
        &self,
        hotel_id: &str,
        channel_id: &str,
        event_type: Option<EventType>,
    ) -> CoreResult<HealthChange> {
        self.record_reachable(hotel_id, channel_id, event_type, None).await
    }

    /// A 4xx the channel will never accept: the channel is reachable, but
    /// nothing synced, so `last_sync` stays put
    pub async fn record_rejection(&self, hotel_id: &str, channel_id: &str, reason: &str) -> CoreResult<HealthChange> {
        self.record_reachable(hotel_id, channel_id, None, Some(reason)).await
    }

    async fn record_reachable(
        &self,
        hotel_id: &str,
        channel_id: &str,
        synced: Option<EventType>,
        rejection: Option<&str>,
    ) -> CoreResult<HealthChange> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        let now = self.clock.now();
        let was = config.health.connection_status;

        config.health.connection_status = ConnectionStatus::Active;
        config.health.consecutive_failures = 0;
        config.health.last_error = rejection.map(|reason| format!("rejected: {}", reason));
        match synced {
            Some(EventType::RateUpdate) => config.health.last_sync.rates = Some(now),
            Some(EventType::AvailabilityUpdate) | Some(EventType::BookingSync) => {
                config.health.last_sync.inventory = Some(now)
            }
            Some(EventType::ChannelModification) => config.health.last_sync.content = Some(now),
            Some(EventType::OverbookingAlert) | None => {}
        }
        if config.lifecycle == ChannelLifecycle::Created {
            config.lifecycle = ChannelLifecycle::Active;
        }
        config.updated_at = now;
        self.save(config).await?;

        if was != ConnectionStatus::Active {
            tracing::info!(hotel_id, channel_id, "Channel recovered");
            return Ok(HealthChange::Recovered);
        }
        Ok(HealthChange::Unchanged)
    }

    /// Count a transport or 5xx failure; unhealthy after `unhealthy_after`
    /// in a row
    pub async fn record_failure(&self, hotel_id: &str, channel_id: &str, error: &str) -> CoreResult<HealthChange> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        let now = self.clock.now();

        config.health.consecutive_failures += 1;
        config.health.last_error = Some(error.to_string());
        let became_unhealthy = config.health.connection_status != ConnectionStatus::Unhealthy
            && config.health.consecutive_failures >= self.defaults.unhealthy_after;
        if became_unhealthy {
            config.health.connection_status = ConnectionStatus::Unhealthy;
        }
        config.updated_at = now;
        let failures = config.health.consecutive_failures;
        self.save(config).await?;

        if became_unhealthy {
            self.alerts.raise(
                Alert::new(
                    AlertKind::ChannelUnhealthy,
                    hotel_id,
                    format!("channel unhealthy after {} consecutive failures: {}", failures, error),
                    now,
                )
                .channel(channel_id),
            );
            return Ok(HealthChange::BecameUnhealthy);
        }
        tracing::warn!(hotel_id, channel_id, failures, error, "Channel call failed");
        Ok(HealthChange::Unchanged)
    }

    /// Auth rejected with no backup to fall back to
    pub async fn mark_degraded(&self, hotel_id: &str, channel_id: &str, error: &str) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load(hotel_id, channel_id).await?;
        if config.health.connection_status == ConnectionStatus::Active {
            config.health.connection_status = ConnectionStatus::Degraded;
        }
        config.health.last_error = Some(error.to_string());
        config.updated_at = self.clock.now();
        self.save(config).await?;
        tracing::warn!(hotel_id, channel_id, error, "Channel degraded");
        Ok(())
    }

    /// Active credentials expiring within `within`, as `(channel, credential)`
    pub async fn expiring_credentials(
        &self,
        hotel_id: &str,
        within: ChronoDuration,
    ) -> StoreResult<Vec<(ChannelConfig, ChannelCredential)>> {
        let now = self.clock.now();
        let limit = now + within;
        let mut expiring = Vec::new();
        for config in self.store.list_channel_configs(hotel_id).await? {
            if !config.lifecycle.can_send() {
                continue;
            }
            let credentials = std::iter::once(&config.credentials.primary).chain(config.credentials.backup.as_ref());
            let soon: Vec<ChannelCredential> = credentials
                .filter(|c| c.status == CredentialStatus::Active)
                .filter(|c| c.expires_at.is_some_and(|exp| exp <= limit))
                .cloned()
                .collect();
            for credential in soon {
                expiring.push((config.clone(), credential));
            }
        }
        Ok(expiring)
    }
}

fn validate_input(input: &ChannelConfigInput, max_timeout_ms: u64) -> CoreResult<()> {
    if input.channel_id.trim().is_empty() {
        return Err(CoreError::Validation("channelId cannot be empty".to_string()));
    }
    let base = &input.endpoints.base_url;
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(CoreError::Validation(format!("baseUrl must be http(s), got {}", base)));
    }
    if input.supported_currencies.is_empty() {
        return Err(CoreError::Validation("at least one supported currency is required".to_string()));
    }
    for currency in &input.supported_currencies {
        validate_code(&currency.code)?;
        if currency.markup < rust_decimal::Decimal::ZERO {
            return Err(CoreError::Validation(format!("markup for {} cannot be negative", currency.code)));
        }
    }
    if input.sync_flags.contains(&EventType::OverbookingAlert) {
        return Err(CoreError::Validation("overbooking_alert is not a channel sync flag".to_string()));
    }
    if let Some(required) = required_scheme(input.kind) {
        let schemes = std::iter::once(&input.primary_auth).chain(input.backup_auth.as_ref());
        for auth in schemes {
            if AuthScheme::of(auth) != required {
                return Err(CoreError::Validation(format!(
                    "{} requires {:?} authentication",
                    input.kind.as_str(),
                    required
                )));
            }
        }
    }
    match input.timeout_ms {
        Some(0) => return Err(CoreError::Validation("timeoutMs must be positive".to_string())),
        Some(ms) if ms > max_timeout_ms => {
            return Err(CoreError::Validation(format!(
                "timeoutMs {} exceeds the maximum of {}",
                ms, max_timeout_ms
            )));
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::channel::{
        ChannelAuth, ChannelEndpoints, ChannelKind, ConversionMethod, RoundingPolicy, SupportedCurrency,
    };
    use crate::services::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    pub(crate) fn auth_for(kind: ChannelKind, secret: &str) -> ChannelAuth {
        match kind {
            ChannelKind::BookingCom | ChannelKind::Agoda => ChannelAuth::Basic {
                username: "hotel".to_string(),
                password: secret.to_string(),
            },
            _ => ChannelAuth::Bearer {
                token: secret.to_string(),
            },
        }
    }

    pub(crate) fn input(channel_id: &str, kind: ChannelKind, base_url: &str) -> ChannelConfigInput {
        ChannelConfigInput {
            channel_id: channel_id.to_string(),
            kind,
            external_hotel_id: format!("ext-{}", channel_id),
            primary_auth: auth_for(kind, "primary-token"),
            primary_expires_at: None,
            backup_auth: None,
            backup_expires_at: None,
            endpoints: ChannelEndpoints {
                base_url: base_url.to_string(),
                rates_path: "/rates".to_string(),
                inventory_path: "/inventory".to_string(),
                content_path: None,
                health_path: Some("/health".to_string()),
            },
            supported_currencies: vec![SupportedCurrency {
                code: "USD".to_string(),
                markup: Decimal::ZERO,
                rounding: RoundingPolicy::Nearest,
                precision: 2,
                conversion_method: ConversionMethod::DailyCached,
                fixed_rate: None,
                market: None,
                channel_currency: None,
            }],
            timeout_ms: None,
            retry_policy: None,
            sync_flags: vec![EventType::RateUpdate, EventType::AvailabilityUpdate],
            room_mappings: HashMap::new(),
        }
    }

    fn registry() -> ChannelRegistry {
        let config = AppConfig::default();
        ChannelRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            AlertLog::new(10),
            config.channel,
            &config.cache,
        )
    }

    #[tokio::test]
    async fn test_timeout_above_cap_is_rejected() {
        let registry = registry();
        let cap = registry.defaults().max_timeout_ms;

        let mut slow = input("booking", ChannelKind::BookingCom, "https://ota.test");
        slow.timeout_ms = Some(cap + 1);
        assert!(matches!(registry.upsert("H1", slow).await, Err(CoreError::Validation(_))));

        let mut at_cap = input("booking", ChannelKind::BookingCom, "https://ota.test");
        at_cap.timeout_ms = Some(cap);
        assert_eq!(registry.upsert("H1", at_cap).await.unwrap().timeout_ms, cap);
    }

    #[tokio::test]
    async fn test_upsert_then_cached_get_sees_writes() {
        let registry = registry();
        let saved = registry
            .upsert("H1", input("booking", ChannelKind::BookingCom, "https://ota.test"))
            .await
            .unwrap();
        assert_eq!(saved.lifecycle, ChannelLifecycle::Created);
        assert_eq!(saved.timeout_ms, 10_000);

        assert!(registry.get("H1", "booking").await.unwrap().is_some());
        registry.revoke_credential("H1", "booking").await.unwrap();
        let cached = registry.get("H1", "booking").await.unwrap().unwrap();
        assert_eq!(cached.lifecycle, ChannelLifecycle::Revoked);
        assert_eq!(registry.list("H1").await.unwrap()[0].lifecycle, ChannelLifecycle::Revoked);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let registry = registry();
        let mut bad = input("booking", ChannelKind::BookingCom, "ftp://ota.test");
        assert!(registry.upsert("H1", bad.clone()).await.is_err());

        bad.endpoints.base_url = "https://ota.test".to_string();
        bad.sync_flags.push(EventType::OverbookingAlert);
        assert!(registry.upsert("H1", bad).await.is_err());

        let mut wrong_scheme = input("booking", ChannelKind::BookingCom, "https://ota.test");
        wrong_scheme.primary_auth = ChannelAuth::Bearer {
            token: "t".to_string(),
        };
        assert!(registry.upsert("H1", wrong_scheme).await.is_err());
    }

    #[tokio::test]
    async fn test_three_failures_make_channel_unhealthy_and_success_recovers() {
        let registry = registry();
        registry
            .upsert("H1", input("expedia", ChannelKind::Expedia, "https://ota.test"))
            .await
            .unwrap();

        assert_eq!(registry.record_failure("H1", "expedia", "503").await.unwrap(), HealthChange::Unchanged);
        assert_eq!(registry.record_failure("H1", "expedia", "503").await.unwrap(), HealthChange::Unchanged);
        assert_eq!(
            registry.record_failure("H1", "expedia", "503").await.unwrap(),
            HealthChange::BecameUnhealthy
        );
        assert!(registry.get("H1", "expedia").await.unwrap().unwrap().is_unhealthy());
        assert_eq!(registry.alerts.recent(None, 5)[0].kind, AlertKind::ChannelUnhealthy);

        let change = registry
            .record_success("H1", "expedia", Some(EventType::RateUpdate))
            .await
            .unwrap();
        assert_eq!(change, HealthChange::Recovered);
        let config = registry.get("H1", "expedia").await.unwrap().unwrap();
        assert_eq!(config.health.consecutive_failures, 0);
        assert!(config.health.last_sync.rates.is_some());
        assert_eq!(config.lifecycle, ChannelLifecycle::Active);
    }

    #[tokio::test]
    async fn test_backup_promotion_only_when_present() {
        let registry = registry();
        registry
            .upsert("H1", input("airbnb", ChannelKind::Airbnb, "https://ota.test"))
            .await
            .unwrap();
        assert!(registry.promote_backup("H1", "airbnb").await.unwrap().is_none());

        let mut with_backup = input("airbnb", ChannelKind::Airbnb, "https://ota.test");
        with_backup.backup_auth = Some(ChannelAuth::Bearer {
            token: "backup-token".to_string(),
        });
        registry.upsert("H1", with_backup).await.unwrap();
        let promoted = registry.promote_backup("H1", "airbnb").await.unwrap().unwrap();
        assert_eq!(
            promoted.credentials.primary.auth,
            ChannelAuth::Bearer {
                token: "backup-token".to_string()
            }
        );
        assert!(promoted.credentials.backup.is_none());
        assert_eq!(promoted.lifecycle, ChannelLifecycle::Rotated);
    }

    #[tokio::test]
    async fn test_expiring_credentials_within_window() {
        let registry = registry();
        let mut soon = input("agoda", ChannelKind::Agoda, "https://ota.test");
        soon.primary_expires_at = Some(Utc::now() + ChronoDuration::days(10));
        registry.upsert("H1", soon).await.unwrap();
        let mut later = input("expedia", ChannelKind::Expedia, "https://ota.test");
        later.primary_expires_at = Some(Utc::now() + ChronoDuration::days(90));
        registry.upsert("H1", later).await.unwrap();

        let expiring = registry
            .expiring_credentials("H1", ChronoDuration::days(30))
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].0.channel_id, "agoda");
    }
}
