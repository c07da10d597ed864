pub mod availability;
pub mod booking;
pub mod channel;
pub mod currency;
pub mod event;
pub mod hotel;
pub mod job;
pub mod quote;
pub mod rate_plan;
