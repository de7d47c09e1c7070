use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::scan::ScanRecord;
use crate::stats::{
    self, ActivityEntry, Overview, Realtime, TargetStats, TimelineBucket, ToolStats,
    DEFAULT_TIMELINE_HOURS,
};

use super::state::AppState;

const DEFAULT_TARGETS: usize = 10;
const DEFAULT_ACTIVITY: usize = 20;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/tools", get(tools))
        .route("/timeline", get(timeline))
        .route("/realtime", get(realtime))
        .route("/targets", get(targets))
        .route("/activity", get(activity))
}

/// Lenient numeric query parameters; anything unparseable falls back to the default.
#[derive(Debug, Default, Deserialize)]
struct StatsQuery {
    hours: Option<String>,
    limit: Option<String>,
}

fn parse_or<T: std::str::FromStr>(value: &Option<String>, default: T) -> T {
    value
        .as_deref()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

async fn all_scans(state: &AppState) -> Vec<ScanRecord> {
    let mut scans = state.history_snapshot().await;
    scans.extend(state.active_scans().await);
    scans
}

async fn overview(State(state): State<AppState>) -> Json<Overview> {
    let history = state.history_snapshot().await;
    let active = state.active_scans().await;
    Json(stats::overview(&history, &active))
}

async fn tools(State(state): State<AppState>) -> Json<Vec<ToolStats>> {
    Json(stats::tool_stats(&state.history_snapshot().await))
}

async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<Vec<TimelineBucket>> {
    let hours = parse_or(&query.hours, DEFAULT_TIMELINE_HOURS);
    Json(stats::timeline(&all_scans(&state).await, Utc::now(), hours))
}

async fn realtime(State(state): State<AppState>) -> Json<Realtime> {
    let active = state.active_scans().await;
    let history_size = state.history_snapshot().await.len();
    Json(stats::realtime(
        &active,
        history_size,
        state.uptime(),
        Utc::now(),
    ))
}

async fn targets(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<Vec<TargetStats>> {
    let limit = parse_or(&query.limit, DEFAULT_TARGETS);
    Json(stats::top_targets(&all_scans(&state).await, limit))
}

async fn activity(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<Vec<ActivityEntry>> {
    let limit = parse_or(&query.limit, DEFAULT_ACTIVITY);
    Json(state.recent_activity(limit).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_numbers_use_defaults() {
        assert_eq!(parse_or(&Some("48".to_string()), 24u32), 48);
        assert_eq!(parse_or(&Some("lots".to_string()), 24u32), 24);
        assert_eq!(parse_or::<usize>(&None, 10), 10);
    }
}
