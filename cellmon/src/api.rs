//! JSON HTTP surface over the reading store and the live modem.

use crate::{
    modem::{ModemSession, ModemStatus},
    parser::{RegistrationState, QUALITY_CEILING_DBM, QUALITY_FLOOR_DBM},
    reading::{unknown_as_str, Observation, Reading},
    store::{Operator, OperatorsCatalog, ReadingStore, StoreError},
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

pub const DEFAULT_HISTORY_DAYS: u32 = 7;

const REQUIRED_FIELDS: [&str; 5] = [
    "operator",
    "signal_strength",
    "network_type",
    "latitude",
    "longitude",
];

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReadingStore>,
    pub operators: Arc<OperatorsCatalog>,
    pub modem: Arc<ModemSession>,
}

/// Build an `axum::Router` with all routes for the service.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/record", post(record_reading))
        .route("/api/latest", get(latest_reading))
        .route("/api/history", get(history))
        .route("/api/operators", get(operators))
        .route("/api/status", get(modem_status))
        .with_state(state)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON payload")]
    InvalidJson,

    #[error("Missing required fields")]
    MissingFields,

    #[error("Signal strength must be a number")]
    SignalNotNumeric,

    #[error("Invalid signal strength range")]
    SignalOutOfRange,

    #[error("Invalid latitude or longitude")]
    InvalidCoordinates,

    #[error("Availability must be a boolean")]
    InvalidAvailability,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to access reading store")]
    Store(#[from] StoreError),

    #[error("No data available")]
    NotFound,

    #[error("Modem task failed")]
    Modem,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMessage {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl ApiMessage {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
            id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(e) => {
                error!(error = %e, "store failure while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Modem => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (code, Json(ApiMessage::error(self.to_string()))).into_response()
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    n.filter(|v| v.is_finite())
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validates an ingestion payload and turns it into an [`Observation`].
pub fn validate_record(payload: &Value) -> Result<Observation, ValidationError> {
    let Some(fields) = payload.as_object() else {
        return Err(ValidationError::InvalidJson);
    };
    if !REQUIRED_FIELDS.iter().all(|f| fields.contains_key(*f)) {
        return Err(ValidationError::MissingFields);
    }

    let signal = number(&fields["signal_strength"]).ok_or(ValidationError::SignalNotNumeric)?;
    if !(f64::from(QUALITY_FLOOR_DBM)..=f64::from(QUALITY_CEILING_DBM)).contains(&signal) {
        return Err(ValidationError::SignalOutOfRange);
    }

    let (Some(latitude), Some(longitude)) =
        (number(&fields["latitude"]), number(&fields["longitude"]))
    else {
        return Err(ValidationError::InvalidCoordinates);
    };

    let availability = match fields.get("availability") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ValidationError::InvalidAvailability),
    };

    let network_type = text(&fields["network_type"])
        .parse::<RegistrationState>()
        .unwrap_or_default();

    Ok(Observation {
        operator: text(&fields["operator"]),
        signal_strength: Some(signal.round() as i32),
        network_type,
        availability,
        latitude: Some(latitude),
        longitude: Some(longitude),
    })
}

async fn record_reading(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiMessage>), ApiError> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|_| ValidationError::InvalidJson)?;
    let observation = validate_record(&payload).inspect_err(|e| {
        warn!(error = %e, "rejected reading");
    })?;

    let reading = state.store.save(observation).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiMessage {
            status: "success".into(),
            message: "Reading recorded successfully".into(),
            id: Some(reading.id),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct LiveView {
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(with = "unknown_as_str")]
    pub signal_quality: Option<u8>,
    /// e.g. "February 03, 2025"
    pub date: String,
    /// e.g. "02:30:45 PM"
    pub time: String,
}

impl From<Reading> for LiveView {
    fn from(reading: Reading) -> Self {
        Self {
            signal_quality: reading.observation.signal_quality(),
            date: reading.timestamp.format("%B %d, %Y").to_string(),
            time: reading.timestamp.format("%I:%M:%S %p").to_string(),
            reading,
        }
    }
}

async fn latest_reading(State(state): State<AppState>) -> Result<Json<LiveView>, ApiError> {
    let reading = state.store.latest().await?.ok_or(ApiError::NotFound)?;

    Ok(Json(reading.into()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub date: String,
    pub network_operator: String,
    pub network_type: RegistrationState,
    #[serde(with = "unknown_as_str")]
    pub signal_strength: Option<i32>,
    #[serde(with = "unknown_as_str")]
    pub signal_quality: Option<u8>,
    pub availability: &'static str,
}

impl From<Reading> for HistoryEntry {
    fn from(reading: Reading) -> Self {
        let Reading {
            id,
            timestamp,
            observation,
        } = reading;

        Self {
            id,
            date: timestamp.format(crate::reading::TIMESTAMP_FORMAT).to_string(),
            signal_quality: observation.signal_quality(),
            network_operator: observation.operator,
            network_type: observation.network_type,
            signal_strength: observation.signal_strength,
            availability: if observation.availability {
                "Available"
            } else {
                "Unavailable"
            },
        }
    }
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    let readings = state.store.since(days).await?;

    Ok(Json(readings.into_iter().map(HistoryEntry::from).collect()))
}

async fn operators(State(state): State<AppState>) -> Result<Json<Vec<Operator>>, ApiError> {
    Ok(Json(state.operators.list().await?))
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub modem: ModemStatus,
    /// Operator of the most recent stored reading.
    pub network_operator: Option<String>,
}

async fn modem_status(State(state): State<AppState>) -> Result<Json<StatusView>, ApiError> {
    let modem = Arc::clone(&state.modem);
    let status = tokio::task::spawn_blocking(move || {
        modem.connect();
        modem.status()
    })
    .await
    .map_err(|e| {
        error!(error = %e, "modem probe task failed");
        ApiError::Modem
    })?;

    let network_operator = state
        .store
        .latest()
        .await?
        .map(|r| r.observation.operator);

    Ok(Json(StatusView {
        modem: status,
        network_operator,
    }))
}
