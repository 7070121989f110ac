use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Json;
use axum::Router;

use crate::error::AppError;
use crate::models::order::RideOrder;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/orders/:id", get(get_order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RideOrder>, AppError> {
    let order = state
        .dispatch
        .orders()
        .find(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order))
}
