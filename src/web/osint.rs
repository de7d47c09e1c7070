use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::catalog::{OsintTool, ProviderKind, ToolFilter};
use crate::runner::ScanEvent;
use crate::scan::{ScanRecord, ScanRequest, ScanStatus};

use super::error::ApiError;
use super::state::{AppState, HistoryQuery};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/:id", get(get_tool))
        .route("/scan", post(start_scan))
        .route("/scan/:id", get(get_scan).delete(cancel_scan))
        .route("/scan/:id/events", get(scan_events))
        .route("/history", get(history))
        .route("/github", post(github_lookup))
        .route("/email", post(email_lookup))
        .route("/geolocation", post(geolocation_lookup))
        .route("/phone", post(phone_lookup))
}

async fn list_tools(
    State(state): State<AppState>,
    Query(filter): Query<ToolFilter>,
) -> Json<Vec<OsintTool>> {
    Json(state.catalog().filter(&filter))
}

async fn get_tool(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OsintTool>, ApiError> {
    state
        .catalog()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Tool not found".to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanStarted {
    success: bool,
    scan_id: String,
    status: ScanStatus,
    message: &'static str,
    estimated_time: Option<u64>,
}

async fn start_scan(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanStarted>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let record = state.start_scan(request).await?;
    let estimated_time = state
        .catalog()
        .get(&record.tool)
        .map(|tool| tool.estimated_time);

    Ok(Json(ScanStarted {
        success: true,
        scan_id: record.id,
        status: record.status,
        message: "Scan started successfully",
        estimated_time,
    }))
}

async fn get_scan(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ScanRecord>, ApiError> {
    state
        .get_scan(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Scan not found".to_string()))
}

async fn cancel_scan(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let scan = state.cancel_scan(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Scan cancelled successfully",
        "scan": scan,
    })))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ScanRecord>> {
    Json(state.history(&query).await)
}

/// Streams one scan as server-sent events: a `snapshot` of the record, then
/// its output lines until a `complete` or `cancelled` event.
async fn scan_events(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Sse<BoxStream<'static, Result<Event, Infallible>>>, ApiError> {
    // subscribe first so nothing between the lookup and the stream is lost
    let receiver = state.subscribe();
    let record = state
        .get_scan(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("Scan not found".to_string()))?;
    let finished = record.is_finished();
    let snapshot = stream::once(async move { Ok::<_, Infallible>(json_event("snapshot", &record)) });

    if finished {
        return Ok(Sse::new(snapshot.boxed()));
    }

    debug!(scan_id = %id, "client subscribed to scan events");
    let updates = scan_updates(state, id, receiver).map(|update| {
        Ok::<_, Infallible>(match update {
            Update::Event(event) => json_event(event.kind.as_str(), &event),
            Update::Final(record) => json_event("snapshot", &record),
        })
    });

    Ok(Sse::new(snapshot.chain(updates).boxed()).keep_alive(KeepAlive::default()))
}

#[derive(Debug)]
enum Update {
    Event(ScanEvent),
    /// Sent instead of the terminal event when it may have been skipped.
    Final(ScanRecord),
}

enum Step {
    Forward(Update),
    Skip,
    Stop,
}

/// Events for one scan, ending after its terminal event. A subscriber that
/// falls behind re-reads the scan and, once it is finished, ends with the
/// final record so the stream never waits for an event it already missed.
fn scan_updates(
    state: AppState,
    id: String,
    receiver: broadcast::Receiver<ScanEvent>,
) -> BoxStream<'static, Update> {
    BroadcastStream::new(receiver)
        .then(move |message| {
            let state = state.clone();
            let id = id.clone();
            async move {
                match message {
                    Ok(event) if event.scan_id == id => Step::Forward(Update::Event(event)),
                    Ok(_) => Step::Skip,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(scan_id = %id, skipped, "scan event subscriber fell behind");
                        match state.get_scan(&id).await {
                            Some(record) if record.is_finished() => {
                                Step::Forward(Update::Final(record))
                            }
                            Some(_) => Step::Skip,
                            None => Step::Stop,
                        }
                    }
                }
            }
        })
        .scan(false, |done, next| {
            let item = match next {
                _ if *done => None,
                Step::Stop => None,
                Step::Skip => Some(None),
                Step::Forward(update) => {
                    *done = match &update {
                        Update::Event(event) => event.kind.is_terminal(),
                        Update::Final(_) => true,
                    };
                    Some(Some(update))
                }
            };
            async move { item }
        })
        .filter_map(|update| async move { update })
        .boxed()
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    Event::default().event(name).data(data)
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct LookupRequest {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

async fn provider_lookup(
    state: &AppState,
    kind: ProviderKind,
    value: Option<String>,
    field: &str,
) -> Result<Json<Value>, ApiError> {
    let value = value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{field} is required")))?;
    info!(provider = %kind, target = %value, "direct provider lookup");
    let data = state.engine().providers().lookup(kind, &value).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

fn lookup_body(payload: Result<Json<LookupRequest>, JsonRejection>) -> Result<LookupRequest, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

async fn github_lookup(
    State(state): State<AppState>,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = lookup_body(payload)?;
    provider_lookup(&state, ProviderKind::Github, body.target, "target").await
}

async fn email_lookup(
    State(state): State<AppState>,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = lookup_body(payload)?;
    provider_lookup(&state, ProviderKind::Hunter, body.domain.or(body.target), "domain").await
}

async fn geolocation_lookup(
    State(state): State<AppState>,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = lookup_body(payload)?;
    provider_lookup(&state, ProviderKind::Ipinfo, body.target, "target").await
}

async fn phone_lookup(
    State(state): State<AppState>,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = lookup_body(payload)?;
    provider_lookup(&state, ProviderKind::Veriphone, body.phone.or(body.target), "phone").await
}

pub(super) async fn crypto_lookup(
    State(state): State<AppState>,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = lookup_body(payload)?;
    provider_lookup(&state, ProviderKind::Moralis, body.address.or(body.target), "address").await
}
