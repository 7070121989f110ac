use std::sync::Arc;

use ride_dispatch::engine::dispatch::{DeliveryOutcome, DispatchOptions, DispatchService, Session};
use ride_dispatch::models::event::{CreateOrderRequest, ServerEvent};
use ride_dispatch::models::order::{Destination, OrderStatus};
use ride_dispatch::models::participant::{GeoPoint, Role};
use ride_dispatch::observability::metrics::Metrics;
use ride_dispatch::store::connections::ConnectionHandle;
use serde_json::json;
use tokio::sync::mpsc;

fn service() -> DispatchService {
    DispatchService::new(DispatchOptions::default(), Metrics::new())
}

fn queueing_service() -> DispatchService {
    DispatchService::new(
        DispatchOptions {
            queue_undelivered: true,
            pending_queue_limit: 8,
            ..DispatchOptions::default()
        },
        Metrics::new(),
    )
}

fn connect() -> (Session, mpsc::Receiver<ServerEvent>) {
    let (handle, rx) = ConnectionHandle::channel(32);
    (Session::new(handle), rx)
}

fn send(service: &DispatchService, session: &mut Session, frame: serde_json::Value) {
    service.handle_frame(session, &frame.to_string());
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn error_kinds(events: &[ServerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Error { kind, .. } => Some(kind.clone()),
            _ => None,
        })
        .collect()
}

/// Driver d1 and passenger p1 registered and placed, both inboxes empty.
fn matched_pair(
    service: &DispatchService,
) -> (
    Session,
    mpsc::Receiver<ServerEvent>,
    Session,
    mpsc::Receiver<ServerEvent>,
) {
    let (mut driver, mut driver_rx) = connect();
    let (mut passenger, mut passenger_rx) = connect();

    send(
        service,
        &mut driver,
        json!({"event": "registerDriver", "data": {"driverId": "d1", "displayName": "Budi"}}),
    );
    send(
        service,
        &mut driver,
        json!({"event": "updateLocation", "data": {"role": "driver", "pos": {"lat": -7.5680, "lng": 110.8180}}}),
    );
    send(
        service,
        &mut passenger,
        json!({"event": "registerPassenger", "data": {"passengerId": "p1"}}),
    );
    send(
        service,
        &mut passenger,
        json!({"event": "updateLocation", "data": {"role": "passenger", "pos": {"lat": -7.5666, "lng": 110.8166}, "address": "Jl. Slamet Riyadi"}}),
    );

    drain(&mut driver_rx);
    drain(&mut passenger_rx);
    (driver, driver_rx, passenger, passenger_rx)
}

fn create_o1() -> serde_json::Value {
    json!({
        "event": "createOrder",
        "data": {
            "orderId": "O1",
            "passengerId": "p1",
            "driverId": "d1",
            "destination": {"lat": -7.5700, "lng": 110.8200, "address": "Solo Balapan"},
            "status": "pending"
        }
    })
}

#[tokio::test]
async fn order_is_dispatched_and_accepted_end_to_end() {
    let service = service();
    let (mut driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);

    send(&service, &mut passenger, create_o1());

    let driver_events = drain(&mut driver_rx);
    assert_eq!(driver_events.len(), 1);
    match &driver_events[0] {
        ServerEvent::NewOrder(order) => {
            assert_eq!(order.order_id, "O1");
            assert_eq!(order.passenger_id, "p1");
            assert_eq!(order.status, OrderStatus::Pending);
            let origin = order.origin.as_ref().unwrap();
            assert_eq!(origin.location, GeoPoint { lat: -7.5666, lng: 110.8166 });
            assert_eq!(origin.address.as_deref(), Some("Jl. Slamet Riyadi"));
        }
        other => panic!("expected newOrder, got {other:?}"),
    }
    assert!(drain(&mut passenger_rx).is_empty());

    send(
        &service,
        &mut driver,
        json!({"event": "acceptOrder", "data": {"orderId": "O1", "driverId": "d1"}}),
    );

    let passenger_events = drain(&mut passenger_rx);
    assert_eq!(passenger_events.len(), 1);
    match &passenger_events[0] {
        ServerEvent::OrderAccepted {
            order,
            driver,
            driver_name,
        } => {
            assert_eq!(order.order_id, "O1");
            assert_eq!(order.status, OrderStatus::Accepted);
            let driver = driver.as_ref().unwrap();
            assert_eq!(driver.participant_id, "d1");
            assert_eq!(driver.location, GeoPoint { lat: -7.5680, lng: 110.8180 });
            assert_eq!(driver_name, "Budi");
        }
        other => panic!("expected orderAccepted, got {other:?}"),
    }
    assert!(drain(&mut driver_rx).is_empty());
    assert_eq!(
        service.orders().find("O1").unwrap().status,
        OrderStatus::Accepted
    );
}

#[tokio::test]
async fn duplicate_accept_does_not_renotify_or_fail() {
    let service = service();
    let (mut driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);
    send(&service, &mut passenger, create_o1());
    drain(&mut driver_rx);

    let accept = json!({"event": "acceptOrder", "data": {"orderId": "O1", "driverId": "d1"}});
    send(&service, &mut driver, accept.clone());
    send(&service, &mut driver, accept);

    assert_eq!(drain(&mut passenger_rx).len(), 1);
    assert!(error_kinds(&drain(&mut driver_rx)).is_empty());

    let again = service.accept_order("O1", "d1").unwrap();
    assert_eq!(again.status, OrderStatus::Accepted);
}

#[tokio::test]
async fn accept_by_wrong_driver_is_reported_only_to_caller() {
    let service = service();
    let (_driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);
    let (mut intruder, mut intruder_rx) = connect();
    send(
        &service,
        &mut intruder,
        json!({"event": "registerDriver", "data": {"driverId": "d2"}}),
    );
    send(&service, &mut passenger, create_o1());
    drain(&mut driver_rx);

    send(
        &service,
        &mut intruder,
        json!({"event": "acceptOrder", "data": {"orderId": "O1", "driverId": "d2"}}),
    );

    assert_eq!(error_kinds(&drain(&mut intruder_rx)), vec!["conflict"]);
    assert!(drain(&mut passenger_rx).is_empty());
    assert!(drain(&mut driver_rx).is_empty());
    assert_eq!(service.orders().find("O1").unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn accept_of_unknown_order_is_not_found() {
    let service = service();
    let (mut driver, mut driver_rx, _passenger, mut passenger_rx) = matched_pair(&service);

    send(
        &service,
        &mut driver,
        json!({"event": "acceptOrder", "data": {"orderId": "missing", "driverId": "d1"}}),
    );

    assert_eq!(error_kinds(&drain(&mut driver_rx)), vec!["notFound"]);
    assert!(drain(&mut passenger_rx).is_empty());
}

#[tokio::test]
async fn order_for_offline_driver_is_recorded_silently() {
    let service = service();
    let (mut passenger, mut passenger_rx) = connect();
    send(
        &service,
        &mut passenger,
        json!({"event": "registerPassenger", "data": {"passengerId": "p1"}}),
    );

    send(&service, &mut passenger, create_o1());

    assert!(drain(&mut passenger_rx).is_empty());
    let order = service.orders().find("O1").unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.origin.is_none());
}

#[tokio::test]
async fn order_without_destination_is_rejected() {
    let service = service();
    let (_driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);

    send(
        &service,
        &mut passenger,
        json!({"event": "createOrder", "data": {"orderId": "O1", "passengerId": "p1", "driverId": "d1", "status": "pending"}}),
    );

    assert_eq!(error_kinds(&drain(&mut passenger_rx)), vec!["validation"]);
    assert!(drain(&mut driver_rx).is_empty());
    assert_eq!(service.orders().len(), 0);
}

#[tokio::test]
async fn generated_order_ids_are_unique() {
    let service = service();
    let request = || CreateOrderRequest {
        passenger_id: "p1".to_string(),
        driver_id: "d1".to_string(),
        destination: Some(Destination {
            lat: -7.5700,
            lng: 110.8200,
            address: None,
        }),
        ..Default::default()
    };

    let first = service.create_order(request()).unwrap();
    let second = service.create_order(request()).unwrap();

    assert_ne!(first.order_id, second.order_id);
    assert_eq!(service.orders().len(), 2);
}

#[tokio::test]
async fn chat_is_relayed_to_recipient() {
    let service = service();
    let (_driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);

    send(
        &service,
        &mut passenger,
        json!({"event": "chat", "data": {"to": "d1", "from": "p1", "text": "hi"}}),
    );

    let events = drain(&mut driver_rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerEvent::Chat(message) => {
            assert_eq!(message.from, "p1");
            assert_eq!(message.text, "hi");
        }
        other => panic!("expected chat, got {other:?}"),
    }
    assert!(drain(&mut passenger_rx).is_empty());
}

#[tokio::test]
async fn chat_to_offline_participant_is_dropped() {
    let service = service();
    let (mut passenger, mut passenger_rx) = connect();
    send(
        &service,
        &mut passenger,
        json!({"event": "registerPassenger", "data": {"passengerId": "p1"}}),
    );

    let outcome = service.chat("d1", "p1", "hi").unwrap();
    assert_eq!(outcome, DeliveryOutcome::Offline);
    assert!(drain(&mut passenger_rx).is_empty());

    // Registering afterwards does not surface the dropped message.
    let (mut driver, mut driver_rx) = connect();
    send(
        &service,
        &mut driver,
        json!({"event": "registerDriver", "data": {"driverId": "d1"}}),
    );
    assert!(drain(&mut driver_rx).is_empty());
}

#[tokio::test]
async fn empty_chat_text_is_rejected() {
    let service = service();
    let (_driver, mut driver_rx, mut passenger, mut passenger_rx) = matched_pair(&service);

    send(
        &service,
        &mut passenger,
        json!({"event": "chat", "data": {"to": "d1", "from": "p1", "text": "  "}}),
    );

    assert_eq!(error_kinds(&drain(&mut passenger_rx)), vec!["validation"]);
    assert!(drain(&mut driver_rx).is_empty());
}

#[tokio::test]
async fn disconnect_stops_deliveries() {
    let service = service();
    let (driver, mut driver_rx, _passenger, _passenger_rx) = matched_pair(&service);

    assert_eq!(service.disconnect(driver.handle()), vec!["d1".to_string()]);

    assert_eq!(service.chat("d1", "p1", "still there?").unwrap(), DeliveryOutcome::Offline);
    assert!(drain(&mut driver_rx).is_empty());
    assert!(service.connections().resolve("d1").is_none());
    assert!(service.locations().get("d1").is_some());
}

#[tokio::test]
async fn closed_connection_is_a_delivery_failure_not_an_error() {
    let service = service();
    let (driver, driver_rx, _passenger, _passenger_rx) = matched_pair(&service);
    drop(driver_rx);

    let outcome = service.chat("d1", "p1", "hello?").unwrap();

    assert_eq!(outcome, DeliveryOutcome::Failed);
    assert!(driver.handle().is_closed());
}

#[tokio::test]
async fn reregistration_moves_deliveries_to_new_connection() {
    let service = service();
    let (_old, mut old_rx, _passenger, _passenger_rx) = matched_pair(&service);
    let (mut new, mut new_rx) = connect();
    send(
        &service,
        &mut new,
        json!({"event": "registerDriver", "data": {"driverId": "d1"}}),
    );

    service.chat("d1", "p1", "hi").unwrap();

    assert!(drain(&mut old_rx).is_empty());
    assert_eq!(drain(&mut new_rx).len(), 1);
}

#[tokio::test]
async fn location_update_requires_registration() {
    let service = service();
    let (mut anonymous, mut rx) = connect();

    send(
        &service,
        &mut anonymous,
        json!({"event": "updateLocation", "data": {"role": "driver", "pos": {"lat": 0.0, "lng": 0.0}}}),
    );

    assert_eq!(error_kinds(&drain(&mut rx)), vec!["validation"]);
    assert!(service.locations().is_empty());
}

#[tokio::test]
async fn out_of_range_location_is_rejected_to_caller() {
    let service = service();
    let (mut driver, mut driver_rx, _passenger, _passenger_rx) = matched_pair(&service);

    send(
        &service,
        &mut driver,
        json!({"event": "updateLocation", "data": {"role": "driver", "pos": {"lat": 100.0, "lng": 110.8}}}),
    );

    assert_eq!(error_kinds(&drain(&mut driver_rx)), vec!["validation"]);
    assert_eq!(
        service.locations().get("d1").unwrap().location,
        GeoPoint { lat: -7.5680, lng: 110.8180 }
    );
}

#[tokio::test]
async fn location_update_broadcasts_snapshot() {
    let service = service();
    let mut snapshots = service.locations().subscribe();
    let (_driver, _driver_rx, _passenger, _passenger_rx) = matched_pair(&service);

    let mut last = None;
    while let Ok(snapshot) = snapshots.try_recv() {
        last = Some(snapshot);
    }
    let last = last.unwrap();

    assert_eq!(last.drivers.len(), 1);
    assert_eq!(last.passengers.len(), 1);
    assert_eq!(last.drivers[0].display_name, "Budi");
    assert_eq!(last.passengers[0].display_name, "p1");
}

#[tokio::test]
async fn malformed_frame_is_answered_with_error() {
    let service = service();
    let (mut session, mut rx) = connect();

    service.handle_frame(&mut session, "{not json");
    service.handle_frame(&mut session, r#"{"event": "teleport", "data": {}}"#);

    assert_eq!(error_kinds(&drain(&mut rx)), vec!["validation", "validation"]);
}

#[tokio::test]
async fn nearby_drivers_use_distance_then_id() {
    let service = service();
    for id in ["d3", "d1", "d2"] {
        service
            .update_location(id, Role::Driver, GeoPoint { lat: 0.01, lng: 0.0 }, None, None)
            .unwrap();
    }
    service
        .update_location("d0", Role::Driver, GeoPoint { lat: 0.05, lng: 0.0 }, None, None)
        .unwrap();

    let ranked: Vec<String> = service
        .nearby_drivers(GeoPoint { lat: 0.0, lng: 0.0 }, None)
        .unwrap()
        .into_iter()
        .map(|nearby| nearby.position.participant_id)
        .collect();

    assert_eq!(ranked, vec!["d1", "d2", "d3", "d0"]);
}

#[tokio::test]
async fn queued_events_flush_on_registration_when_enabled() {
    let service = queueing_service();

    assert_eq!(service.chat("d1", "p1", "first").unwrap(), DeliveryOutcome::Queued);
    assert_eq!(service.chat("d1", "p1", "second").unwrap(), DeliveryOutcome::Queued);
    assert_eq!(service.pending().unwrap().queued_for("d1"), 2);

    let (mut driver, mut driver_rx) = connect();
    send(
        &service,
        &mut driver,
        json!({"event": "registerDriver", "data": {"driverId": "d1"}}),
    );

    let texts: Vec<String> = drain(&mut driver_rx)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Chat(message) => Some(message.text),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert_eq!(service.pending().unwrap().queued_for("d1"), 0);
}

#[tokio::test]
async fn concurrent_location_updates_keep_every_participant() {
    let service = Arc::new(service());

    let tasks: Vec<_> = (0..16)
        .map(|worker| {
            let service = service.clone();
            tokio::spawn(async move {
                let id = format!("p{worker}");
                for step in 0..50 {
                    service
                        .update_location(
                            &id,
                            Role::Passenger,
                            GeoPoint {
                                lat: worker as f64,
                                lng: step as f64,
                            },
                            None,
                            None,
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(service.locations().len(), 16);
    for worker in 0..16 {
        let stored = service.locations().get(&format!("p{worker}")).unwrap();
        assert_eq!(stored.location, GeoPoint { lat: worker as f64, lng: 49.0 });
    }
}
