use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::nearby::{rank_by_distance, NearbyDriver};
use crate::error::AppError;
use crate::models::event::{ChatMessage, ClientEvent, CreateOrderRequest, ServerEvent};
use crate::models::order::RideOrder;
use crate::models::participant::{GeoPoint, Position, Role};
use crate::observability::metrics::Metrics;
use crate::store::connections::{ConnectionHandle, ConnectionRegistry};
use crate::store::locations::LocationStore;
use crate::store::orders::{AcceptOutcome, NewOrder, OrderLedger};
use crate::store::pending::PendingDeliveries;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub event_buffer_size: usize,
    pub queue_undelivered: bool,
    pub pending_queue_limit: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            queue_undelivered: false,
            pending_queue_limit: 64,
        }
    }
}

impl From<&Config> for DispatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            event_buffer_size: config.event_buffer_size,
            queue_undelivered: config.queue_undelivered,
            pending_queue_limit: config.pending_queue_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Recipient had no live binding.
    Offline,
    /// Recipient was bound but its connection refused the event.
    Failed,
    /// Held in the pending queue until the recipient registers again.
    Queued,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Offline => "offline",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Queued => "queued",
        }
    }
}

/// One socket's view of the service: its outbound handle plus the identity it registered.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    participant: Option<(String, Role)>,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            participant: None,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn role(&self) -> Option<Role> {
        self.participant.as_ref().map(|(_, role)| *role)
    }

    fn bind(&mut self, participant_id: String, role: Role) {
        self.participant = Some((participant_id, role));
    }
}

/// Owns the connection registry, location store and order ledger, and routes every
/// inbound event to them.
pub struct DispatchService {
    connections: ConnectionRegistry,
    locations: LocationStore,
    orders: OrderLedger,
    pending: Option<PendingDeliveries>,
    metrics: Metrics,
}

impl DispatchService {
    pub fn new(options: DispatchOptions, metrics: Metrics) -> Self {
        let pending = options
            .queue_undelivered
            .then(|| PendingDeliveries::new(options.pending_queue_limit));

        Self {
            connections: ConnectionRegistry::new(),
            locations: LocationStore::new(options.event_buffer_size),
            orders: OrderLedger::new(),
            pending,
            metrics,
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn locations(&self) -> &LocationStore {
        &self.locations
    }

    pub fn orders(&self) -> &OrderLedger {
        &self.orders
    }

    pub fn pending(&self) -> Option<&PendingDeliveries> {
        self.pending.as_ref()
    }

    pub fn register_driver(
        &self,
        driver_id: &str,
        display_name: Option<String>,
        handle: &ConnectionHandle,
    ) -> Result<(), AppError> {
        self.register(driver_id, Role::Driver, display_name, handle)
    }

    pub fn register_passenger(
        &self,
        passenger_id: &str,
        display_name: Option<String>,
        handle: &ConnectionHandle,
    ) -> Result<(), AppError> {
        self.register(passenger_id, Role::Passenger, display_name, handle)
    }

    fn register(
        &self,
        participant_id: &str,
        role: Role,
        display_name: Option<String>,
        handle: &ConnectionHandle,
    ) -> Result<(), AppError> {
        if participant_id.trim().is_empty() {
            return Err(AppError::Validation(
                "participant id cannot be empty".to_string(),
            ));
        }

        let display_name = display_name.filter(|name| !name.trim().is_empty());
        let replaced = self
            .connections
            .register(participant_id, role, display_name, handle.clone());

        if let Some(previous) = replaced {
            if previous.handle.id() != handle.id() {
                info!(
                    participant_id,
                    old_connection_id = %previous.handle.id(),
                    connection_id = %handle.id(),
                    "participant rebound to a new connection"
                );
            }
        }

        self.metrics
            .connected_participants
            .set(self.connections.len() as i64);
        info!(participant_id, ?role, connection_id = %handle.id(), "participant registered");

        self.flush_pending(participant_id, handle);
        Ok(())
    }

    /// Drops every binding held by `handle`. Stored positions are left in place.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> Vec<String> {
        let removed = self.connections.unregister(handle.id());
        self.metrics
            .connected_participants
            .set(self.connections.len() as i64);

        for participant_id in &removed {
            info!(participant_id = %participant_id, connection_id = %handle.id(), "participant unregistered");
        }
        removed
    }

    pub fn create_order(&self, request: CreateOrderRequest) -> Result<RideOrder, AppError> {
        let origin = self.locations.get(&request.passenger_id);
        let created = self.orders.create(NewOrder {
            order_id: request.order_id,
            passenger_id: request.passenger_id,
            driver_id: request.driver_id,
            origin,
            destination: request.destination,
        });

        let order = match created {
            Ok(order) => order,
            Err(err) => {
                self.metrics
                    .orders_total
                    .with_label_values(&["rejected"])
                    .inc();
                return Err(err);
            }
        };

        self.metrics
            .orders_total
            .with_label_values(&["created"])
            .inc();
        info!(
            order_id = %order.order_id,
            passenger_id = %order.passenger_id,
            driver_id = %order.driver_id,
            "order created"
        );

        let outcome = self.deliver(&order.driver_id, ServerEvent::NewOrder(order.clone()));
        if outcome != DeliveryOutcome::Delivered {
            warn!(
                order_id = %order.order_id,
                driver_id = %order.driver_id,
                outcome = outcome.as_str(),
                "order recorded but not dispatched to driver"
            );
        }

        Ok(order)
    }

    /// Accepts `order_id` for `driver_id`. The passenger is notified only on the pending to
    /// accepted transition; a repeated accept returns the current order silently.
    pub fn accept_order(&self, order_id: &str, driver_id: &str) -> Result<RideOrder, AppError> {
        let outcome = match self.orders.accept(order_id, driver_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.metrics
                    .order_accepts_total
                    .with_label_values(&["rejected"])
                    .inc();
                return Err(err);
            }
        };

        match outcome {
            AcceptOutcome::AlreadyAccepted(order) => {
                self.metrics
                    .order_accepts_total
                    .with_label_values(&["duplicate"])
                    .inc();
                debug!(order_id, driver_id, "duplicate accept ignored");
                Ok(order)
            }
            AcceptOutcome::Accepted(order) => {
                self.metrics
                    .order_accepts_total
                    .with_label_values(&["accepted"])
                    .inc();
                info!(
                    order_id,
                    driver_id,
                    passenger_id = %order.passenger_id,
                    "order accepted"
                );

                let driver = self.locations.get(driver_id);
                let driver_name = driver
                    .as_ref()
                    .map(|position| position.display_name.clone())
                    .or_else(|| self.registered_name(driver_id))
                    .unwrap_or_else(|| driver_id.to_string());
                self.deliver(
                    &order.passenger_id,
                    ServerEvent::OrderAccepted {
                        order: order.clone(),
                        driver,
                        driver_name,
                    },
                );

                Ok(order)
            }
        }
    }

    /// Relays `text` to `to`. Nothing is kept when `to` is not connected unless the
    /// pending queue is enabled.
    pub fn chat(&self, to: &str, from: &str, text: &str) -> Result<DeliveryOutcome, AppError> {
        if to.trim().is_empty() || from.trim().is_empty() {
            self.metrics
                .chat_messages_total
                .with_label_values(&["rejected"])
                .inc();
            return Err(AppError::Validation(
                "chat requires both to and from".to_string(),
            ));
        }
        if text.trim().is_empty() {
            self.metrics
                .chat_messages_total
                .with_label_values(&["rejected"])
                .inc();
            return Err(AppError::Validation("chat text cannot be empty".to_string()));
        }

        let outcome = self.deliver(
            to,
            ServerEvent::Chat(ChatMessage {
                from: from.to_string(),
                text: text.to_string(),
                timestamp: Utc::now(),
            }),
        );

        let label = match outcome {
            DeliveryOutcome::Delivered => "relayed",
            DeliveryOutcome::Queued => "queued",
            DeliveryOutcome::Offline | DeliveryOutcome::Failed => "dropped",
        };
        self.metrics
            .chat_messages_total
            .with_label_values(&[label])
            .inc();

        Ok(outcome)
    }

    pub fn update_location(
        &self,
        participant_id: &str,
        role: Role,
        point: GeoPoint,
        address: Option<String>,
        display_name: Option<String>,
    ) -> Result<Position, AppError> {
        let display_name = match display_name.filter(|name| !name.trim().is_empty()) {
            Some(name) => name,
            None => self
                .registered_name(participant_id)
                .or_else(|| {
                    self.locations
                        .get(participant_id)
                        .map(|previous| previous.display_name)
                })
                .unwrap_or_else(|| participant_id.to_string()),
        };

        let position = Position {
            participant_id: participant_id.to_string(),
            role,
            display_name,
            location: point,
            address,
            timestamp: Utc::now(),
        };

        match self.locations.upsert(position.clone()) {
            Ok(()) => {
                self.metrics
                    .location_updates_total
                    .with_label_values(&["stored"])
                    .inc();
                debug!(participant_id, ?role, lat = point.lat, lng = point.lng, "location updated");
                Ok(position)
            }
            Err(err) => {
                self.metrics
                    .location_updates_total
                    .with_label_values(&["rejected"])
                    .inc();
                Err(err)
            }
        }
    }

    pub fn nearby_drivers(
        &self,
        origin: GeoPoint,
        limit: Option<usize>,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        origin.validate()?;
        Ok(rank_by_distance(
            &origin,
            self.locations.list_by_role(Role::Driver),
            limit,
        ))
    }

    /// Parses one raw socket frame and handles it. Malformed frames are answered with an
    /// `error` event on the same connection.
    pub fn handle_frame(&self, session: &mut Session, raw: &str) {
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => self.handle(session, event),
            Err(err) => self.reject(
                session,
                "unknown",
                AppError::Validation(format!("malformed event: {err}")),
            ),
        }
    }

    pub fn handle(&self, session: &mut Session, event: ClientEvent) {
        let event_name = event.name();

        let result = match event {
            ClientEvent::RegisterDriver {
                driver_id,
                display_name,
            } => self
                .register_driver(&driver_id, display_name, session.handle())
                .map(|()| session.bind(driver_id, Role::Driver)),
            ClientEvent::RegisterPassenger {
                passenger_id,
                display_name,
            } => self
                .register_passenger(&passenger_id, display_name, session.handle())
                .map(|()| session.bind(passenger_id, Role::Passenger)),
            ClientEvent::CreateOrder(request) => self.create_order(request).map(|_| ()),
            ClientEvent::AcceptOrder {
                order_id,
                driver_id,
            } => self.accept_order(&order_id, &driver_id).map(|_| ()),
            ClientEvent::Chat { to, from, text } => self.chat(&to, &from, &text).map(|_| ()),
            ClientEvent::UpdateLocation {
                role,
                pos,
                address,
                display_name,
            } => match session.participant_id() {
                Some(participant_id) => self
                    .update_location(participant_id, role, pos, address, display_name)
                    .map(|_| ()),
                None => Err(AppError::Validation(
                    "register before reporting a location".to_string(),
                )),
            },
        };

        if let Err(err) = result {
            self.reject(session, event_name, err);
        }
    }

    fn reject(&self, session: &Session, event_name: &str, err: AppError) {
        warn!(
            connection_id = %session.handle().id(),
            participant_id = session.participant_id().unwrap_or("-"),
            event = event_name,
            error = %err,
            "request rejected"
        );

        let reply = ServerEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        };
        if let Err(delivery_err) = session.handle().deliver(reply) {
            warn!(error = %delivery_err, "failed to report error to caller");
        }
    }

    /// Fire-and-forget delivery to whichever connection `participant_id` is bound to.
    fn deliver(&self, participant_id: &str, event: ServerEvent) -> DeliveryOutcome {
        let event_name = event.name();

        let outcome = match self.connections.resolve(participant_id) {
            None => {
                debug!(participant_id, event = event_name, "recipient not connected");
                self.hold(participant_id, event, DeliveryOutcome::Offline)
            }
            Some(handle) => {
                let backup = self.pending.as_ref().map(|_| event.clone());
                match handle.deliver(event) {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(err) => {
                        warn!(participant_id, event = event_name, error = %err, "delivery failed");
                        match backup {
                            Some(event) => self.hold(participant_id, event, DeliveryOutcome::Failed),
                            None => DeliveryOutcome::Failed,
                        }
                    }
                }
            }
        };

        self.metrics
            .deliveries_total
            .with_label_values(&[event_name, outcome.as_str()])
            .inc();
        outcome
    }

    fn hold(
        &self,
        participant_id: &str,
        event: ServerEvent,
        otherwise: DeliveryOutcome,
    ) -> DeliveryOutcome {
        let Some(pending) = &self.pending else {
            return otherwise;
        };

        if pending.push(participant_id, event) {
            warn!(participant_id, "pending queue full, oldest event dropped");
        }
        DeliveryOutcome::Queued
    }

    fn flush_pending(&self, participant_id: &str, handle: &ConnectionHandle) {
        let Some(pending) = &self.pending else {
            return;
        };

        let backlog = pending.drain(participant_id);
        if backlog.is_empty() {
            return;
        }

        info!(participant_id, count = backlog.len(), "flushing pending events");
        for event in backlog {
            let event_name = event.name();
            let outcome = match handle.deliver(event) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(err) => {
                    warn!(participant_id, event = event_name, error = %err, "pending delivery failed");
                    DeliveryOutcome::Failed
                }
            };
            self.metrics
                .deliveries_total
                .with_label_values(&[event_name, outcome.as_str()])
                .inc();
        }
    }

    fn registered_name(&self, participant_id: &str) -> Option<String> {
        self.connections
            .binding(participant_id)
            .and_then(|binding| binding.display_name)
    }
}
