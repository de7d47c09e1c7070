use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use itertools::Itertools;
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::catalog::{OsintTool, ToolCatalog};
use crate::config::Settings;
use crate::engine::{ScanEngine, ScanError};
use crate::reporting::{build_report, Report, ReportDocument, ReportRequest};
use crate::runner::{EventSink, ScanEvent, ScanEventKind};
use crate::scan::{is_option_like, ScanId, ScanRecord, ScanRequest, CANCELLED_MESSAGE};
use crate::stats::{self, ActivityEntry};
use crate::store::ScanStore;

use super::error::ApiError;

const EVENT_CAPACITY: usize = 1024;
const DEFAULT_HISTORY_PAGE: usize = 50;
const MAX_HISTORY_PAGE: usize = 1000;

/// Query string of `GET /api/osint/history`. Unparseable numbers fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub tool: Option<String>,
}

impl HistoryQuery {
    fn positive(value: &Option<String>) -> Option<usize> {
        value
            .as_deref()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
    }

    pub fn limit(&self) -> usize {
        Self::positive(&self.limit)
            .unwrap_or(DEFAULT_HISTORY_PAGE)
            .min(MAX_HISTORY_PAGE)
    }

    pub fn page(&self) -> usize {
        Self::positive(&self.page).unwrap_or(1)
    }
}

struct ActiveScan {
    record: ScanRecord,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    catalog: Arc<ToolCatalog>,
    engine: Arc<ScanEngine>,
    active: Arc<RwLock<HashMap<ScanId, ActiveScan>>>,
    history: Arc<RwLock<VecDeque<ScanRecord>>>,
    reports: Arc<RwLock<Vec<ReportDocument>>>,
    store: Option<ScanStore>,
    events: broadcast::Sender<ScanEvent>,
    started_at: Instant,
}

impl AppState {
    /// Loads the catalog, opens the database and restores persisted history.
    pub async fn bootstrap(settings: Settings) -> Result<Self> {
        let catalog = match &settings.tools_config {
            Some(path) => ToolCatalog::from_path(path)?,
            None => ToolCatalog::from_embedded()?,
        };
        let store = match &settings.database_url {
            Some(url) => Some(ScanStore::connect(url, 5).await?),
            None => None,
        };
        Self::with_parts(settings, catalog, store).await
    }

    pub async fn with_parts(
        settings: Settings,
        catalog: ToolCatalog,
        store: Option<ScanStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let engine = ScanEngine::new(&settings)?;

        let (history, reports) = match &store {
            Some(store) => (
                store.load_scans(settings.history_limit).await?,
                store.load_reports().await?,
            ),
            None => (Vec::new(), Vec::new()),
        };
        if !history.is_empty() || !reports.is_empty() {
            info!(
                scans = history.len(),
                reports = reports.len(),
                "restored persisted state"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            settings: Arc::new(settings),
            catalog: Arc::new(catalog),
            engine: Arc::new(engine),
            active: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::from(history))),
            reports: Arc::new(RwLock::new(reports)),
            store,
            events,
            started_at: Instant::now(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn engine(&self) -> &ScanEngine {
        &self.engine
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub async fn start_scan(&self, request: ScanRequest) -> Result<ScanRecord, ApiError> {
        let tool_id = request.tool.as_deref().map(str::trim).unwrap_or_default();
        let target = request.target.as_deref().map(str::trim).unwrap_or_default();
        if tool_id.is_empty() || target.is_empty() {
            return Err(ApiError::BadRequest("Tool and target are required".to_string()));
        }
        if is_option_like(target) {
            return Err(ApiError::BadRequest("Target must not start with '-'".to_string()));
        }
        let tool = self
            .catalog
            .get(tool_id)
            .cloned()
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid tool '{tool_id}'")))?;

        let record = ScanRecord::new(&tool, target.to_string(), request.options);
        let cancel = CancellationToken::new();
        self.active.write().await.insert(
            record.id.clone(),
            ActiveScan {
                record: record.clone(),
                cancel: cancel.clone(),
            },
        );
        info!(scan_id = %record.id, tool = %tool.id, target = %record.target, "scan queued");

        tokio::spawn(
            self.clone()
                .run_scan(record.id.clone(), tool, record.target.clone(), cancel),
        );
        Ok(record)
    }

    async fn run_scan(self, id: ScanId, tool: OsintTool, target: String, cancel: CancellationToken) {
        if !self.mark_running(&id).await {
            debug!(scan_id = %id, "scan removed before it started");
            return;
        }
        let sink = EventSink::new(id.clone(), self.events.clone());
        sink.emit(ScanEventKind::Status, "running");

        let outcome = self.engine.execute(&tool, &target, &cancel, Some(&sink)).await;

        let record = {
            let mut active = self.active.write().await;
            // a cancelled scan was already archived by cancel_scan
            let Some(mut entry) = active.remove(&id) else {
                debug!(scan_id = %id, "scan finished after cancellation");
                return;
            };
            match outcome {
                Ok(outcome) => {
                    let output_file = outcome
                        .output_file
                        .map(|path| path.display().to_string());
                    entry.record.mark_completed(outcome.results, output_file);
                    info!(scan_id = %id, tool = %tool.id, target = %target, "scan completed");
                }
                Err(ScanError::Cancelled) => entry.record.mark_failed(CANCELLED_MESSAGE),
                Err(err) => {
                    error!(scan_id = %id, tool = %tool.id, target = %target, %err, "scan failed");
                    entry.record.mark_failed(err.to_string());
                }
            }
            entry.record
        };

        // archive before announcing, so subscribers that re-read the scan see it finished
        let status = record.status;
        self.archive(record).await;
        sink.emit(ScanEventKind::Complete, status.as_str());
    }

    async fn mark_running(&self, id: &str) -> bool {
        match self.active.write().await.get_mut(id) {
            Some(entry) => {
                entry.record.mark_running();
                true
            }
            None => false,
        }
    }

    async fn archive(&self, record: ScanRecord) {
        let limit = self.settings.history_limit;
        {
            let mut history = self.history.write().await;
            history.push_back(record.clone());
            while history.len() > limit {
                history.pop_front();
            }
        }

        if let Some(store) = &self.store {
            if let Err(err) = store.save_scan(&record).await {
                error!(scan_id = %record.id, ?err, "failed to persist scan");
            } else if let Err(err) = store.prune_scans(limit).await {
                error!(?err, "failed to prune persisted history");
            }
        }
    }

    /// Active scans are checked before history.
    pub async fn get_scan(&self, id: &str) -> Option<ScanRecord> {
        if let Some(entry) = self.active.read().await.get(id) {
            return Some(entry.record.clone());
        }
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|scan| scan.id == id)
            .cloned()
    }

    pub async fn cancel_scan(&self, id: &str) -> Result<ScanRecord, ApiError> {
        let entry = self
            .active
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ApiError::NotFound("Scan not found or already completed".to_string()))?;
        entry.cancel.cancel();

        let mut record = entry.record;
        record.mark_failed(CANCELLED_MESSAGE);
        info!(scan_id = %record.id, tool = %record.tool, "scan cancelled");
        self.archive(record.clone()).await;
        EventSink::new(record.id.clone(), self.events.clone())
            .emit(ScanEventKind::Cancelled, CANCELLED_MESSAGE);
        Ok(record)
    }

    /// Finished scans, newest start time first.
    pub async fn history(&self, query: &HistoryQuery) -> Vec<ScanRecord> {
        let tool = query
            .tool
            .as_deref()
            .map(str::trim)
            .filter(|tool| !tool.is_empty());
        let limit = query.limit();
        let skip = (query.page() - 1).saturating_mul(limit);

        self.history
            .read()
            .await
            .iter()
            .filter(|scan| tool.map_or(true, |tool| scan.tool == tool))
            .sorted_by(|a, b| b.start_time.cmp(&a.start_time))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    /// History oldest first.
    pub async fn history_snapshot(&self) -> Vec<ScanRecord> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Latest `limit` scans across history and active scans, most recent first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        let mut scans = self.history_snapshot().await;
        scans.extend(self.active_scans().await);
        stats::recent_activity(&scans, limit)
    }

    pub async fn active_scans(&self) -> Vec<ScanRecord> {
        self.active
            .read()
            .await
            .values()
            .map(|entry| entry.record.clone())
            .sorted_by(|a, b| a.start_time.cmp(&b.start_time))
            .collect()
    }

    pub async fn generate_report(&self, request: ReportRequest) -> Result<Report, ApiError> {
        let mut available = self.history_snapshot().await;
        available.extend(self.active_scans().await);
        let document = build_report(&request, &available, Utc::now())?;

        if let Some(store) = &self.store {
            store.save_report(&document).await?;
        }
        let report = document.report.clone();
        info!(
            report_id = %report.id,
            scans = report.scans_count,
            format = %report.format,
            "report generated"
        );
        self.reports.write().await.push(document);
        Ok(report)
    }

    /// Report metadata, newest first.
    pub async fn list_reports(&self) -> Vec<Report> {
        self.reports
            .read()
            .await
            .iter()
            .map(|document| document.report.clone())
            .sorted_by(|a, b| b.created_at.cmp(&a.created_at))
            .collect()
    }

    pub async fn get_report(&self, id: &str) -> Option<ReportDocument> {
        self.reports
            .read()
            .await
            .iter()
            .find(|document| document.report.id == id)
            .cloned()
    }

    pub async fn delete_report(&self, id: &str) -> Result<bool, ApiError> {
        // the row goes first so a failed delete leaves the report listed
        if let Some(store) = &self.store {
            store.delete_report(id).await?;
        }
        let removed = {
            let mut reports = self.reports.write().await;
            let before = reports.len();
            reports.retain(|document| document.report.id != id);
            reports.len() != before
        };
        if removed {
            info!(report_id = %id, "report deleted");
        }
        Ok(removed)
    }
}
