use serde::{Deserialize, Serialize};

use crate::model::{LogisticsId, ServiceKind};

/// Kind of scheduled queue event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Truck should collect the load.
    CollectionScheduled,
    /// Truck should deliver the load.
    DeliveryScheduled,
}

impl EventType {
    /// Leg the event drives.
    #[must_use]
    pub const fn service_kind(self) -> ServiceKind {
        match self {
            Self::CollectionScheduled => ServiceKind::Collection,
            Self::DeliveryScheduled => ServiceKind::Delivery,
        }
    }
}

/// Queue message body: `{"eventType": "...", "logisticsDetailsId": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogisticsEvent {
    /// What to do.
    pub event_type: EventType,
    /// Detail to act on.
    pub logistics_details_id: LogisticsId,
}

impl LogisticsEvent {
    /// Collection event.
    #[must_use]
    pub const fn collection(id: LogisticsId) -> Self {
        Self {
            event_type: EventType::CollectionScheduled,
            logistics_details_id: id,
        }
    }

    /// Delivery event.
    #[must_use]
    pub const fn delivery(id: LogisticsId) -> Self {
        Self {
            event_type: EventType::DeliveryScheduled,
            logistics_details_id: id,
        }
    }

    /// Event for the given leg.
    #[must_use]
    pub const fn for_kind(kind: ServiceKind, id: LogisticsId) -> Self {
        match kind {
            ServiceKind::Collection => Self::collection(id),
            ServiceKind::Delivery => Self::delivery(id),
        }
    }

    /// Parses a raw body; any shape mismatch is an error.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// JSON body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
