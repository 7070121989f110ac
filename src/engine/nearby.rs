use serde::Serialize;

use crate::geo::haversine_km;
use crate::models::participant::{GeoPoint, Position};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDriver {
    #[serde(flatten)]
    pub position: Position,
    pub distance_km: f64,
}

/// Orders `drivers` by straight-line distance from `origin`, closest first. Equal distances
/// fall back to ascending participant id so the result is deterministic.
pub fn rank_by_distance(
    origin: &GeoPoint,
    drivers: Vec<Position>,
    limit: Option<usize>,
) -> Vec<NearbyDriver> {
    let mut ranked: Vec<NearbyDriver> = drivers
        .into_iter()
        .map(|position| NearbyDriver {
            distance_km: haversine_km(origin, &position.location),
            position,
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.position.participant_id.cmp(&b.position.participant_id))
    });

    if let Some(limit) = limit {
        ranked.truncate(limit);
    }
    ranked
}
