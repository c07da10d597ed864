//! Error types shared across the distribution core.
//!
//! Every core operation returns [`CoreResult`]. The ingress maps the
//! [`ResultKind`] discriminant onto its own status codes; background work
//! never surfaces these to request callers.

use serde::Serialize;
use thiserror::Error;

use crate::models::availability::InvariantViolation;

/// Discriminant of a core response, as seen by the ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultKind {
    Ok,
    ValidationError,
    NotFound,
    Conflict,
    RateLimited,
    Unavailable,
    Internal,
}

/// Structured error returned by core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity is absent
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Disallowed state transition or invariant violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Per-token or downstream rate limit reached
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Transient dependency failure (store contention, FX provider down)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Corrupt state or a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn kind(&self) -> ResultKind {
        match self {
            CoreError::Validation(_) => ResultKind::ValidationError,
            CoreError::NotFound(_) => ResultKind::NotFound,
            CoreError::Conflict(_) => ResultKind::Conflict,
            CoreError::RateLimited { .. } => ResultKind::RateLimited,
            CoreError::Unavailable(_) => ResultKind::Unavailable,
            CoreError::Internal(_) => ResultKind::Internal,
        }
    }

    /// HTTP status code the ingress should use for this error
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ResultKind::Ok => 200,
            ResultKind::ValidationError => 400,
            ResultKind::NotFound => 404,
            ResultKind::Conflict => 409,
            ResultKind::RateLimited => 429,
            ResultKind::Unavailable => 503,
            ResultKind::Internal => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Unavailable(_) | CoreError::RateLimited { .. })
    }
}

/// Store-level failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Insert hit an existing key
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Uniqueness or state rule broken by the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Row invariant would be broken; the transaction was aborted
    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Sub-batch exceeded its deadline")]
    Timeout,

    /// Database driver or connection error
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => StoreError::DuplicateKey(msg),
            Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(msg)) => StoreError::Conflict(msg),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::DuplicateKey(msg) => CoreError::Conflict(format!("Duplicate: {}", msg)),
            StoreError::Conflict(msg) => CoreError::Conflict(msg),
            StoreError::Invariant(v) => CoreError::Conflict(v.to_string()),
            StoreError::Timeout => CoreError::Unavailable("store operation timed out".to_string()),
            StoreError::Backend(msg) => CoreError::Unavailable(msg),
            StoreError::Serialization(e) => CoreError::Internal(e.to_string()),
        }
    }
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Currency service failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("Invalid currency code '{0}'")]
    InvalidCode(String),

    #[error("No fixed rate configured for {from}/{to}")]
    NoFixedRate { from: String, to: String },

    /// Provider down and no usable stale rate
    #[error("Exchange rate unavailable for {from}/{to}")]
    ExchangeRateUnavailable { from: String, to: String },

    #[error("Rate provider error: {0}")]
    Provider(String),
}

impl From<CurrencyError> for CoreError {
    fn from(err: CurrencyError) -> Self {
        match err {
            CurrencyError::InvalidCode(_) | CurrencyError::NoFixedRate { .. } => {
                CoreError::Validation(err.to_string())
            }
            CurrencyError::ExchangeRateUnavailable { .. } | CurrencyError::Provider(_) => {
                CoreError::Unavailable(err.to_string())
            }
        }
    }
}

/// Pricing failures, tagged so callers can branch on them
#[derive(Error, Debug)]
pub enum PricingError {
    #[error("NoRatePlan: no active rate plan for {room_type_id} on {date}")]
    NoRatePlan { room_type_id: String, date: chrono::NaiveDate },

    #[error("PlanExpired: rate plan {plan} does not cover {date}")]
    PlanExpired { plan: String, date: chrono::NaiveDate },

    #[error("ExceedsOccupancy: {guests} guests exceed max occupancy {max}")]
    ExceedsOccupancy { guests: u32, max: u32 },

    #[error("BlackedOut: {room_type_id} is closed on {date}")]
    BlackedOut { room_type_id: String, date: chrono::NaiveDate },

    #[error("UnknownCurrency: {0}")]
    UnknownCurrency(String),

    #[error("PromoInvalid: {0}")]
    PromoInvalid(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Room type {0} not found")]
    RoomTypeNotFound(String),

    #[error(transparent)]
    Currency(#[from] CurrencyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PricingError {
    /// Stable tag exposed to callers
    pub fn tag(&self) -> &'static str {
        match self {
            PricingError::NoRatePlan { .. } => "NoRatePlan",
            PricingError::PlanExpired { .. } => "PlanExpired",
            PricingError::ExceedsOccupancy { .. } => "ExceedsOccupancy",
            PricingError::BlackedOut { .. } => "BlackedOut",
            PricingError::UnknownCurrency(_) => "UnknownCurrency",
            PricingError::PromoInvalid(_) => "PromoInvalid",
            PricingError::InvalidQuery(_) => "InvalidQuery",
            PricingError::RoomTypeNotFound(_) => "RoomTypeNotFound",
            PricingError::Currency(_) => "Currency",
            PricingError::Store(_) => "Store",
        }
    }
}

impl From<PricingError> for CoreError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::NoRatePlan { .. } | PricingError::RoomTypeNotFound(_) => CoreError::NotFound(err.to_string()),
            PricingError::PlanExpired { .. } | PricingError::BlackedOut { .. } => CoreError::Conflict(err.to_string()),
            PricingError::ExceedsOccupancy { .. }
            | PricingError::UnknownCurrency(_)
            | PricingError::PromoInvalid(_)
            | PricingError::InvalidQuery(_) => CoreError::Validation(err.to_string()),
            PricingError::Currency(e) => e.into(),
            PricingError::Store(e) => e.into(),
        }
    }
}

/// Channel call failures below the HTTP status level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel call timed out after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Channel call cancelled")]
    Cancelled,

    /// Request could not be built (bad URL, unsigned body)
    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Invalid(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_kind() {
        assert_eq!(CoreError::Validation("x".into()).status_code(), 400);
        assert_eq!(CoreError::NotFound("x".into()).status_code(), 404);
        assert_eq!(CoreError::Conflict("x".into()).status_code(), 409);
        assert_eq!(CoreError::RateLimited { retry_after_secs: 5 }.status_code(), 429);
        assert_eq!(CoreError::Unavailable("x".into()).status_code(), 503);
        assert_eq!(CoreError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_store_errors_map_to_core_kinds() {
        let err: CoreError = StoreError::DuplicateKey("availability".into()).into();
        assert_eq!(err.kind(), ResultKind::Conflict);

        let err: CoreError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(err.kind(), ResultKind::Unavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_result_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ResultKind::ValidationError).unwrap();
        assert_eq!(json, "\"validationError\"");
    }

    #[test]
    fn test_pricing_errors_keep_their_tag() {
        let err = PricingError::ExceedsOccupancy { guests: 5, max: 2 };
        assert_eq!(err.tag(), "ExceedsOccupancy");
        let core: CoreError = err.into();
        assert_eq!(core.kind(), ResultKind::ValidationError);
        assert!(core.to_string().contains("ExceedsOccupancy"));

        let core: CoreError = PricingError::Currency(CurrencyError::ExchangeRateUnavailable {
            from: "USD".into(),
            to: "EUR".into(),
        })
        .into();
        assert_eq!(core.kind(), ResultKind::Unavailable);
    }
}
