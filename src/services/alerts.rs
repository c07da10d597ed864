//! Supervision alerts: dead events, overbookings, expiring credentials.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    EventDead,
    EventFailed,
    Overbooking,
    CredentialExpiring,
    ChannelUnhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub at: DateTime<Utc>,
    pub kind: AlertKind,
    pub hotel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, hotel_id: &str, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind,
            hotel_id: hotel_id.to_string(),
            channel_id: None,
            event_id: None,
            message: message.into(),
        }
    }

    pub fn channel(mut self, channel_id: &str) -> Self {
        self.channel_id = Some(channel_id.to_string());
        self
    }

    pub fn event(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }
}

/// Bounded log of recent alerts, newest last
#[derive(Clone)]
pub struct AlertLog {
    entries: Arc<Mutex<VecDeque<Alert>>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn raise(&self, alert: Alert) {
        tracing::error!(
            kind = ?alert.kind,
            hotel_id = %alert.hotel_id,
            channel_id = alert.channel_id.as_deref().unwrap_or("-"),
            event_id = ?alert.event_id,
            "{}",
            alert.message
        );
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(alert);
    }

    /// Most recent first
    pub fn recent(&self, hotel_id: Option<&str>, limit: usize) -> Vec<Alert> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|a| hotel_id.map_or(true, |h| a.hotel_id == h))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded_and_newest_first() {
        let log = AlertLog::new(2);
        let now = Utc::now();
        log.raise(Alert::new(AlertKind::EventDead, "H1", "first", now));
        log.raise(Alert::new(AlertKind::Overbooking, "H2", "second", now));
        log.raise(Alert::new(AlertKind::EventFailed, "H1", "third", now));

        let all = log.recent(None, 10);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "third");
        assert_eq!(log.recent(Some("H2"), 10)[0].kind, AlertKind::Overbooking);
    }
}
