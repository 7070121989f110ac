use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::engine::nearby::NearbyDriver;
use crate::error::AppError;
use crate::models::event::LocationSnapshot;
use crate::models::participant::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/locations", get(list_locations))
        .route("/drivers/nearby", get(nearby_drivers))
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub limit: Option<usize>,
}

async fn list_locations(State(state): State<Arc<AppState>>) -> Json<LocationSnapshot> {
    Json(state.dispatch.locations().snapshot())
}

async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyDriver>>, AppError> {
    let origin = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    let drivers = state.dispatch.nearby_drivers(origin, query.limit)?;
    Ok(Json(drivers))
}
