//! REST API route handlers.
//!
//! Aircraft lists are incremental: a client passes back the `last_dv` it was
//! given as `since`, and each aircraft then carries only the fields whose
//! version moved past it. Every aircraft in the list is always present with
//! its `id` so clients can drop the ones that disappear.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use feedhub_core::aircraft::{Aircraft, Coordinate, Versioned};

use crate::web::AppState;

// ---------------------------------------------------------------------------
// Query param types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AircraftParams {
    since: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn put<T: Serialize + PartialEq>(out: &mut Map<String, Value>, key: &str, field: &Versioned<T>, since: i64) {
    if field.changed_since(since) {
        out.insert(
            key.to_string(),
            serde_json::to_value(&field.value).unwrap_or(Value::Null),
        );
    }
}

fn trail_json(trail: &[Coordinate]) -> Value {
    Value::Array(
        trail
            .iter()
            .map(|c| json!([c.latitude, c.longitude, c.altitude, c.track]))
            .collect(),
    )
}

/// The fields of one aircraft that changed after `since`.
fn aircraft_json(ac: &Aircraft, since: i64) -> Value {
    let mut out = Map::new();
    out.insert("id".into(), json!(ac.unique_id));
    put(&mut out, "icao", &ac.icao24, since);
    put(&mut out, "receiver_id", &ac.receiver_id, since);
    put(&mut out, "messages", &ac.count_messages_received, since);
    put(&mut out, "callsign", &ac.callsign, since);
    put(&mut out, "transponder", &ac.transponder_type, since);
    put(&mut out, "lat", &ac.latitude, since);
    put(&mut out, "lon", &ac.longitude, since);
    put(&mut out, "mlat", &ac.position_is_mlat, since);
    put(&mut out, "altitude", &ac.altitude, since);
    put(&mut out, "geometric_altitude", &ac.geometric_altitude, since);
    put(&mut out, "altitude_type", &ac.altitude_type, since);
    put(&mut out, "air_pressure_inhg", &ac.air_pressure_inhg, since);
    put(&mut out, "ground_speed", &ac.ground_speed, since);
    put(&mut out, "vertical_rate", &ac.vertical_rate, since);
    put(&mut out, "track", &ac.track, since);
    put(&mut out, "track_is_transmitted", &ac.is_transmitting_track, since);
    if ac.squawk.changed_since(since) {
        out.insert(
            "squawk".into(),
            json!(ac.squawk.value.map(|s| format!("{s:04}"))),
        );
    }
    put(&mut out, "emergency", &ac.emergency, since);
    put(&mut out, "on_ground", &ac.on_ground, since);
    put(&mut out, "registration", &ac.registration, since);
    put(&mut out, "manufacturer", &ac.manufacturer, since);
    put(&mut out, "model", &ac.model, since);
    put(&mut out, "model_icao", &ac.model_icao, since);
    put(&mut out, "operator", &ac.operator, since);
    put(&mut out, "operator_icao", &ac.operator_icao, since);
    put(&mut out, "serial", &ac.serial, since);
    put(&mut out, "year_built", &ac.year_built, since);
    if ac.full_coordinates_version > since {
        out.insert("trail".into(), trail_json(&ac.full_coordinates));
    }
    if ac.short_coordinates_version > since {
        out.insert("short_trail".into(), trail_json(&ac.short_coordinates));
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Feed endpoints
// ---------------------------------------------------------------------------

/// GET /api/feeds: visible feeds with status and aircraft counts.
pub async fn api_feeds(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feeds: Vec<Value> = state
        .manager
        .visible_feeds()
        .iter()
        .map(|feed| {
            json!({
                "id": feed.unique_id(),
                "name": feed.name(),
                "kind": feed.kind(),
                "status": feed.connection_status(),
                "aircraft": feed.store().map(|s| s.count()).unwrap_or(0),
            })
        })
        .collect();
    Json(json!({ "feeds": feeds }))
}

/// GET /api/feeds/:id/aircraft?since=N: aircraft list for one feed.
pub async fn api_feed_aircraft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(params): Query<AircraftParams>,
) -> Response {
    let Some(feed) = state.manager.get_by_unique_id(id, true) else {
        return not_found(format!("feed {id} not found"));
    };
    let Some(store) = feed.store() else {
        return not_found(format!("feed {id} has no aircraft list"));
    };

    let since = params.since.unwrap_or(-1);
    let snapshot = store.snapshot();
    let aircraft: Vec<Value> = snapshot
        .aircraft
        .iter()
        .map(|ac| aircraft_json(ac, since))
        .collect();

    Json(json!({
        "feed": id,
        "server_time": snapshot.timestamp.timestamp_millis(),
        "last_dv": snapshot.max_version,
        "aircraft": aircraft,
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
