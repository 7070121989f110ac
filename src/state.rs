use crate::config::Config;
use crate::engine::dispatch::{DispatchOptions, DispatchService};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub dispatch: DispatchService,
    pub metrics: Metrics,
    pub outbound_buffer_size: usize,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let metrics = Metrics::new();

        Self {
            dispatch: DispatchService::new(DispatchOptions::from(config), metrics.clone()),
            metrics,
            outbound_buffer_size: config.outbound_buffer_size,
        }
    }
}
