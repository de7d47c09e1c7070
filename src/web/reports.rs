use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::reporting::{self, Report, ReportDocument, ReportRequest};

use super::error::ApiError;
use super::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/list", get(list))
        .route("/download/:id", get(download))
        .route("/:id", get(show).delete(remove))
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let report = state.generate_report(request).await?;
    Ok(Json(json!({
        "success": true,
        "reportId": report.id,
        "format": report.format,
        "downloadUrl": report.download_url,
        "report": report,
    })))
}

async fn list(State(state): State<AppState>) -> Json<Vec<Report>> {
    Json(state.list_reports().await)
}

async fn find(state: &AppState, id: &str) -> Result<ReportDocument, ApiError> {
    state
        .get_report(id)
        .await
        .ok_or_else(|| ApiError::NotFound("Report not found".to_string()))
}

async fn show(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ReportDocument>, ApiError> {
    find(&state, &id).await.map(Json)
}

async fn download(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let document = find(&state, &id).await?;
    let rendered = reporting::render(&document)?;
    let disposition = format!("attachment; filename=\"{}\"", rendered.filename);

    Ok((
        [
            (header::CONTENT_TYPE, rendered.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.body,
    )
        .into_response())
}

async fn remove(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    if !state.delete_report(&id).await? {
        return Err(ApiError::NotFound("Report not found".to_string()));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Report deleted successfully",
    })))
}
