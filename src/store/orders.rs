use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Destination, OrderStatus, RideOrder};
use crate::models::participant::Position;

#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    /// Client-proposed id; a UUID is generated when absent.
    pub order_id: Option<String>,
    pub passenger_id: String,
    pub driver_id: String,
    pub origin: Option<Position>,
    pub destination: Option<Destination>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// The order moved from pending to accepted with this call.
    Accepted(RideOrder),
    /// The order had already been accepted by the same driver.
    AlreadyAccepted(RideOrder),
}

impl AcceptOutcome {
    pub fn order(&self) -> &RideOrder {
        match self {
            AcceptOutcome::Accepted(order) | AcceptOutcome::AlreadyAccepted(order) => order,
        }
    }

    pub fn into_order(self) -> RideOrder {
        match self {
            AcceptOutcome::Accepted(order) | AcceptOutcome::AlreadyAccepted(order) => order,
        }
    }
}

#[derive(Debug, Default)]
pub struct OrderLedger {
    orders: DashMap<String, RideOrder>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, new_order: NewOrder) -> Result<RideOrder, AppError> {
        if new_order.passenger_id.trim().is_empty() {
            return Err(AppError::Validation("passengerId is required".to_string()));
        }
        if new_order.driver_id.trim().is_empty() {
            return Err(AppError::Validation("driverId is required".to_string()));
        }
        let destination = new_order
            .destination
            .ok_or_else(|| AppError::Validation("destination is required".to_string()))?;
        destination.validate()?;

        let order_id = match new_order.order_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };

        match self.orders.entry(order_id.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "order {order_id} already exists"
            ))),
            Entry::Vacant(slot) => {
                let order = RideOrder {
                    order_id,
                    passenger_id: new_order.passenger_id,
                    driver_id: new_order.driver_id,
                    origin: new_order.origin,
                    destination,
                    status: OrderStatus::Pending,
                    created_at: Utc::now(),
                    accepted_at: None,
                };
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    /// Moves `order_id` to accepted on behalf of `driver_id`. The check and the write
    /// happen under the same entry lock.
    pub fn accept(&self, order_id: &str, driver_id: &str) -> Result<AcceptOutcome, AppError> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.driver_id != driver_id {
            return Err(AppError::Conflict(format!(
                "order {order_id} is assigned to another driver"
            )));
        }

        match order.status {
            OrderStatus::Accepted => Ok(AcceptOutcome::AlreadyAccepted(order.clone())),
            OrderStatus::Pending => {
                order.status = OrderStatus::Accepted;
                order.accepted_at = Some(Utc::now());
                Ok(AcceptOutcome::Accepted(order.clone()))
            }
        }
    }

    pub fn find(&self, order_id: &str) -> Option<RideOrder> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
