pub use super::availability_rows::Entity as AvailabilityRows;
pub use super::bookings::Entity as Bookings;
pub use super::channel_configs::Entity as ChannelConfigs;
pub use super::dynamic_rules::Entity as DynamicRules;
pub use super::event_envelopes::Entity as EventEnvelopes;
pub use super::hotels::Entity as Hotels;
pub use super::job_status::Entity as JobStatus;
pub use super::promo_codes::Entity as PromoCodes;
pub use super::rate_overrides::Entity as RateOverrides;
pub use super::rate_plans::Entity as RatePlans;
pub use super::reconciliation_records::Entity as ReconciliationRecords;
pub use super::room_types::Entity as RoomTypes;
pub use super::seasonal_rates::Entity as SeasonalRates;
