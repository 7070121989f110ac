use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::order::{Destination, RideOrder};
use crate::models::participant::{GeoPoint, Position, Role};

/// Frames a client sends over its socket: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    RegisterDriver {
        driver_id: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    RegisterPassenger {
        passenger_id: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    CreateOrder(CreateOrderRequest),
    AcceptOrder {
        order_id: String,
        driver_id: String,
    },
    Chat {
        to: String,
        from: String,
        text: String,
    },
    UpdateLocation {
        role: Role,
        pos: GeoPoint,
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterDriver { .. } => "registerDriver",
            ClientEvent::RegisterPassenger { .. } => "registerPassenger",
            ClientEvent::CreateOrder(_) => "createOrder",
            ClientEvent::AcceptOrder { .. } => "acceptOrder",
            ClientEvent::Chat { .. } => "chat",
            ClientEvent::UpdateLocation { .. } => "updateLocation",
        }
    }
}

/// Payload of `createOrder`. `status` is accepted for wire compatibility and ignored;
/// new orders always start pending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub passenger_id: String,
    #[serde(default)]
    pub driver_id: String,
    #[serde(default)]
    pub destination: Option<Destination>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationSnapshot {
    pub drivers: Vec<Position>,
    pub passengers: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Locations(LocationSnapshot),
    NewOrder(RideOrder),
    OrderAccepted {
        order: RideOrder,
        driver: Option<Position>,
        driver_name: String,
    },
    Chat(ChatMessage),
    Error {
        kind: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Locations(_) => "locations",
            ServerEvent::NewOrder(_) => "newOrder",
            ServerEvent::OrderAccepted { .. } => "orderAccepted",
            ServerEvent::Chat(_) => "chat",
            ServerEvent::Error { .. } => "error",
        }
    }
}
