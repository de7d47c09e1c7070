use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use reconboard::catalog::ToolCatalog;
use reconboard::config::{ExecutionMode, ProviderSettings, RateLimitSettings, Settings};
use reconboard::store::ScanStore;
use reconboard::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_settings() -> Settings {
    Settings {
        mode: ExecutionMode::Simulated,
        simulated_delay: Duration::from_millis(20),
        rate_limit: RateLimitSettings {
            max_requests: 10_000,
            window: Duration::from_secs(60),
        },
        ..Settings::default()
    }
}

async fn app_with(settings: Settings) -> Router {
    app_with_store(settings, None).await
}

async fn app_with_store(settings: Settings, store: Option<ScanStore>) -> Router {
    let catalog = ToolCatalog::from_embedded().unwrap();
    let state = AppState::with_parts(settings, catalog, store).await.unwrap();
    router(state)
}

async fn app() -> Router {
    app_with(test_settings()).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, body).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn send_raw(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn start(app: &Router, tool: &str, target: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/osint/scan",
        Some(json!({ "tool": tool, "target": target })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["scanId"].as_str().unwrap().to_string()
}

async fn wait_finished(app: &Router, id: &str) -> Value {
    for _ in 0..200 {
        let (status, scan) = send(app, Method::GET, &format!("/api/osint/scan/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if scan["status"] == "completed" || scan["status"] == "error" {
            return scan;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {id} did not finish");
}

#[tokio::test]
async fn health_reports_service_state() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "reconboard");
    assert_eq!(body["mode"], "simulated");
    assert_eq!(body["toolsCount"], 18);
    assert_eq!(body["activeScans"], 0);

    let (status, root) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(root["status"], "running");
    assert_eq!(root["endpoints"]["tools"], "/api/osint/tools");
}

#[tokio::test]
async fn lists_and_filters_tools() {
    let app = app().await;
    let (_, all) = send(&app, Method::GET, "/api/osint/tools", None).await;
    assert_eq!(all.as_array().unwrap().len(), 18);

    let (_, network) = send(&app, Method::GET, "/api/osint/tools?category=network&risk=high", None).await;
    let ids: Vec<&str> = network
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["port-scanner"]);

    let (_, search) = send(&app, Method::GET, "/api/osint/tools?search=WHOIS", None).await;
    assert!(search
        .as_array()
        .unwrap()
        .iter()
        .any(|tool| tool["id"] == "whois"));

    let (status, tool) = send(&app, Method::GET, "/api/osint/tools/whois", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tool["flag"], "-w");
    assert_eq!(tool["riskLevel"], "low");

    let (status, body) = send(&app, Method::GET, "/api/osint/tools/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Tool not found" }));
}

#[tokio::test]
async fn rejects_invalid_scan_requests() {
    let app = app().await;
    let (status, body) = send(&app, Method::POST, "/api/osint/scan", Some(json!({ "tool": "whois" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Tool and target are required");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/osint/scan",
        Some(json!({ "tool": "nmap", "target": "example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid tool 'nmap'");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/osint/scan",
        Some(json!({ "tool": "whois", "target": "--output=/etc/passwd" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Target must not start with '-'");

    let (status, body) = send(&app, Method::GET, "/api/osint/scan/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Scan not found");
}

#[tokio::test]
async fn scan_runs_to_completion_and_lands_in_history() {
    let app = app().await;
    let (status, started) = send(
        &app,
        Method::POST,
        "/api/osint/scan",
        Some(json!({ "tool": "whois", "target": " example.com " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["success"], true);
    assert_eq!(started["message"], "Scan started successfully");
    assert!(started["estimatedTime"].as_u64().is_some());
    let id = started["scanId"].as_str().unwrap().to_string();

    let scan = wait_finished(&app, &id).await;
    assert_eq!(scan["status"], "completed");
    assert_eq!(scan["target"], "example.com");
    assert_eq!(scan["toolName"], "Whois Lookup");
    assert_eq!(scan["results"]["simulated"], true);
    assert!(scan["duration"].as_u64().is_some());

    let (_, history) = send(&app, Method::GET, "/api/osint/history?tool=whois", None).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], id.as_str());
}

#[tokio::test]
async fn cancelling_moves_scan_to_history_with_error() {
    let app = app_with(Settings {
        simulated_delay: Duration::from_secs(30),
        ..test_settings()
    })
    .await;
    let id = start(&app, "dns-lookup", "example.com").await;

    let (status, body) = send(&app, Method::DELETE, &format!("/api/osint/scan/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Scan cancelled successfully");
    assert_eq!(body["scan"]["status"], "error");
    assert_eq!(body["scan"]["error"], "Cancelled by user");

    let (status, _) = send(&app, Method::DELETE, &format!("/api/osint/scan/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, scan) = send(&app, Method::GET, &format!("/api/osint/scan/{id}"), None).await;
    assert_eq!(scan["error"], "Cancelled by user");
}

#[tokio::test]
async fn finished_scan_events_stream_the_snapshot() {
    let app = app().await;
    let id = start(&app, "whois", "example.com").await;
    wait_finished(&app, &id).await;

    let (status, bytes) = send_raw(&app, Method::GET, &format!("/api/osint/scan/{id}/events"), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("event: snapshot"));
    assert!(text.contains(&id));
}

#[tokio::test]
async fn running_scan_events_stream_output_then_complete() {
    let app = app_with(Settings {
        simulated_delay: Duration::from_millis(300),
        ..test_settings()
    })
    .await;
    let id = start(&app, "whois", "example.com").await;

    let (status, bytes) = tokio::time::timeout(
        Duration::from_secs(5),
        send_raw(&app, Method::GET, &format!("/api/osint/scan/{id}/events"), None),
    )
    .await
    .expect("event stream closes after the scan finishes");
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(bytes).unwrap();
    let snapshot = text.find("event: snapshot").expect("snapshot event");
    let output = text.find("event: stdout").expect("output event");
    let complete = text.find("event: complete").expect("complete event");
    assert!(snapshot < output && output < complete, "{text}");
    assert!(text.contains("Simulated Whois Lookup run against example.com"));
    assert!(text.contains(&id));
}

#[tokio::test]
async fn cancelled_scan_events_end_with_cancelled() {
    let app = app_with(Settings {
        simulated_delay: Duration::from_secs(30),
        ..test_settings()
    })
    .await;
    let id = start(&app, "dns-lookup", "example.com").await;

    let listener = {
        let app = app.clone();
        let uri = format!("/api/osint/scan/{id}/events");
        tokio::spawn(async move { send_raw(&app, Method::GET, &uri, None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, _) = send(&app, Method::DELETE, &format!("/api/osint/scan/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, bytes) = tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("event stream closes after cancellation")
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("event: snapshot"));
    assert!(text.contains("event: cancelled"));
    assert!(!text.contains("event: complete"));
}

#[tokio::test]
async fn capped_history_survives_restart() {
    let store = ScanStore::in_memory().await.unwrap();
    let settings = || Settings {
        simulated_delay: Duration::from_millis(1),
        history_limit: 2,
        ..test_settings()
    };

    let app = app_with_store(settings(), Some(store.clone())).await;
    let mut ids = Vec::new();
    for target in ["a.example", "b.example", "c.example"] {
        let id = start(&app, "whois", target).await;
        wait_finished(&app, &id).await;
        ids.push(id);
    }
    let (_, before) = send(&app, Method::GET, "/api/osint/history", None).await;
    let before_ids: Vec<&str> = before
        .as_array()
        .unwrap()
        .iter()
        .map(|scan| scan["id"].as_str().unwrap())
        .collect();
    assert_eq!(before_ids, [ids[2].as_str(), ids[1].as_str()]);

    let restarted = app_with_store(settings(), Some(store)).await;
    let (_, after) = send(&restarted, Method::GET, "/api/osint/history", None).await;
    assert_eq!(after, before);
    let (status, _) = send(&restarted, Method::GET, &format!("/api/osint/scan/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_reflect_history() {
    let app = app().await;
    let first = start(&app, "whois", "example.com").await;
    let second = start(&app, "dns-lookup", "example.com").await;
    wait_finished(&app, &first).await;
    wait_finished(&app, &second).await;

    let (_, overview) = send(&app, Method::GET, "/api/stats/overview", None).await;
    assert_eq!(overview["totalScans"], 2);
    assert_eq!(overview["successfulScans"], 2);
    assert_eq!(overview["successRate"], 100.0);

    let (_, tools) = send(&app, Method::GET, "/api/stats/tools", None).await;
    assert_eq!(tools.as_array().unwrap().len(), 2);

    let (_, timeline) = send(&app, Method::GET, "/api/stats/timeline?hours=6", None).await;
    let buckets = timeline.as_array().unwrap();
    assert_eq!(buckets.len(), 6);
    let counted: u64 = buckets
        .iter()
        .map(|bucket| bucket["scans"].as_u64().unwrap())
        .sum();
    assert_eq!(counted, 2);

    let (_, targets) = send(&app, Method::GET, "/api/stats/targets", None).await;
    assert_eq!(targets[0]["target"], "example.com");
    assert_eq!(targets[0]["count"], 2);

    let (_, realtime) = send(&app, Method::GET, "/api/stats/realtime", None).await;
    assert_eq!(realtime["historySize"], 2);
    assert_eq!(realtime["activeScans"], 0);

    let (_, activity) = send(&app, Method::GET, "/api/stats/activity?limit=1", None).await;
    assert_eq!(activity.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn reports_generate_download_and_delete() {
    let app = app().await;
    let id = start(&app, "whois", "example.com").await;
    wait_finished(&app, &id).await;

    let (status, body) = send(&app, Method::POST, "/api/reports/generate", Some(json!({ "scanIds": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "At least one scan ID is required");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/reports/generate",
        Some(json!({ "scanIds": [id.as_str()], "format": "pdf" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/reports/generate",
        Some(json!({ "scanIds": ["unknown"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, generated) = send(
        &app,
        Method::POST,
        "/api/reports/generate",
        Some(json!({ "scanIds": [id.as_str(), "unknown"], "format": "csv" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["format"], "csv");
    assert_eq!(generated["report"]["missingScanIds"], json!(["unknown"]));
    let report_id = generated["reportId"].as_str().unwrap().to_string();
    assert_eq!(
        generated["downloadUrl"],
        format!("/api/reports/download/{report_id}")
    );

    let (_, list) = send(&app, Method::GET, "/api/reports/list", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/reports/download/{report_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(&format!("osint-report-{report_id}.csv")));
    let csv = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(csv.to_vec()).unwrap();
    assert!(csv.starts_with("id,tool,target,status,startTime,endTime,durationMs,error"));
    assert!(csv.contains(&id));

    let (status, document) = send(&app, Method::GET, &format!("/api/reports/{report_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["summary"]["totalScans"], 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/reports/{report_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, &format!("/api/reports/download/{report_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_lookups_require_their_field() {
    let app = app().await;
    let (status, body) = send(&app, Method::POST, "/api/osint/email", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "domain is required");

    let (status, body) = send(&app, Method::POST, "/api/crypto/analyze", Some(json!({ "address": "0xabc" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn phone_lookup_goes_through_veriphone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/verify"))
        .and(query_param("phone", "+442079460958"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "phone_valid": true,
            "phone_type": "fixed_line",
            "country": "United Kingdom",
            "country_code": "GB",
            "country_prefix": "44",
        })))
        .mount(&server)
        .await;
    let app = app_with(Settings {
        providers: ProviderSettings {
            veriphone_api_key: Some("test-key".to_string()),
            veriphone_url: server.uri(),
            ..ProviderSettings::default()
        },
        ..test_settings()
    })
    .await;

    let (status, body) = send(&app, Method::POST, "/api/osint/phone", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "phone is required");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/osint/phone",
        Some(json!({ "phone": "+44 20 7946 0958" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["phone"], "+442079460958");
    assert_eq!(body["data"]["location"]["country"], "United Kingdom");
    assert_eq!(body["data"]["isMobile"], false);

    let (status, _) = send(&app, Method::POST, "/api/osint/phone", Some(json!({ "phone": "12" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn phone_lookup_without_key_is_unavailable() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/osint/phone",
        Some(json!({ "phone": "+14155550132" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_routes_return_json_404() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["message"], "Cannot GET /api/unknown");
}

#[tokio::test]
async fn rate_limit_rejects_excess_requests() {
    let app = app_with(Settings {
        rate_limit: RateLimitSettings {
            max_requests: 2,
            window: Duration::from_secs(60),
        },
        ..test_settings()
    })
    .await;

    for _ in 0..2 {
        let (status, _) = send(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body["error"],
        "Too many requests from this IP, please try again later."
    );
}
