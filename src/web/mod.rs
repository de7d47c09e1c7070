pub mod error;
pub mod osint;
pub mod rate_limit;
pub mod reports;
pub mod state;
pub mod stats;

use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::ApiError;
pub use rate_limit::RateLimiter;
pub use state::{AppState, HistoryQuery};

pub const SERVICE_NAME: &str = "reconboard";

pub fn router(state: AppState) -> Router {
    let limits = &state.settings().rate_limit;
    let limiter = RateLimiter::new(limits.max_requests, limits.window);
    let cors = cors_layer(&state.settings().allowed_origins);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .nest("/api/osint", osint::routes())
        .nest("/api/reports", reports::routes())
        .nest("/api/stats", stats::routes())
        .route("/api/crypto/analyze", post(osint::crypto_lookup))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|origin| origin == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, ?err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "OSINT reconnaissance API",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "toolsAvailable": state.catalog().len(),
        "endpoints": {
            "health": "/api/health",
            "tools": "/api/osint/tools",
            "scan": "/api/osint/scan",
            "history": "/api/osint/history",
            "reports": "/api/reports",
            "stats": "/api/stats",
        },
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "uptime": state.uptime().as_secs_f64(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": SERVICE_NAME,
        "mode": state.engine().mode(),
        "toolsCount": state.catalog().len(),
        "activeScans": state.active_scans().await.len(),
    }))
}

async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Not Found",
            "message": format!("Cannot {} {}", method, uri.path()),
        })),
    )
}
