//! The bounded change history and its query filter.

use crate::subscription::ChangeNotification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded change: `{eventType, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub event_type: String,
    pub data: ChangeNotification,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub(crate) fn of(notification: &ChangeNotification) -> Self {
        Self {
            event_type: notification.event_type.clone(),
            data: notification.clone(),
            timestamp: notification.timestamp,
        }
    }
}

/// History query; predicates compose conjunctively. `limit` keeps the
/// most recent entries.
#[derive(Debug, Default, Clone)]
pub struct HistoryFilter {
    pub entity_id: Option<String>,
    pub attribute_name: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub(crate) fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(entity_id) = &self.entity_id {
            if record.data.entity_id.as_deref() != Some(entity_id.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.attribute_name {
            if record.data.attribute_name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &record.event_type != event_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        true
    }
}
