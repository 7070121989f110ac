use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub connected_participants: IntGauge,
    pub orders_total: IntCounterVec,
    pub order_accepts_total: IntCounterVec,
    pub deliveries_total: IntCounterVec,
    pub location_updates_total: IntCounterVec,
    pub chat_messages_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connected_participants = IntGauge::new(
            "connected_participants",
            "Participants currently bound to a live connection",
        )
        .expect("valid connected_participants metric");

        let orders_total = IntCounterVec::new(
            Opts::new("orders_total", "Order creation requests by outcome"),
            &["outcome"],
        )
        .expect("valid orders_total metric");

        let order_accepts_total = IntCounterVec::new(
            Opts::new("order_accepts_total", "Order accept requests by outcome"),
            &["outcome"],
        )
        .expect("valid order_accepts_total metric");

        let deliveries_total = IntCounterVec::new(
            Opts::new("deliveries_total", "Targeted event deliveries by outcome"),
            &["event", "outcome"],
        )
        .expect("valid deliveries_total metric");

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Location updates by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let chat_messages_total = IntCounterVec::new(
            Opts::new("chat_messages_total", "Chat messages by outcome"),
            &["outcome"],
        )
        .expect("valid chat_messages_total metric");

        registry
            .register(Box::new(connected_participants.clone()))
            .expect("register connected_participants");
        registry
            .register(Box::new(orders_total.clone()))
            .expect("register orders_total");
        registry
            .register(Box::new(order_accepts_total.clone()))
            .expect("register order_accepts_total");
        registry
            .register(Box::new(deliveries_total.clone()))
            .expect("register deliveries_total");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(chat_messages_total.clone()))
            .expect("register chat_messages_total");

        Self {
            registry,
            connected_participants,
            orders_total,
            order_accepts_total,
            deliveries_total,
            location_updates_total,
            chat_messages_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
