use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use csv::Writer;
use itertools::Itertools;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{ScanRecord, ScanStatus};

/// A digit-count change in `sizeBytes` settles within a couple of renders.
const MAX_SIZE_PASSES: usize = 4;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("At least one scan ID is required")]
    EmptySelection,
    #[error("Unsupported report format '{0}' (expected json or csv)")]
    UnsupportedFormat(String),
    #[error("None of the requested scans were found")]
    NoMatchingScans,
    #[error("failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode JSON report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to finalize report: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(ReportError::UnsupportedFormat(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Completed,
}

/// Body of `POST /api/reports/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(default)]
    pub scan_ids: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_include_raw_data")]
    pub include_raw_data: bool,
}

fn default_include_raw_data() -> bool {
    true
}

impl ReportRequest {
    pub fn for_scans<I, S>(scan_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scan_ids: scan_ids.into_iter().map(Into::into).collect(),
            format: None,
            title: None,
            description: None,
            include_raw_data: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub format: ReportFormat,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub scans_count: usize,
    pub scan_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_scan_ids: Vec<String>,
    pub tool_names: Vec<String>,
    pub include_raw_data: bool,
    /// Size of the rendered download.
    pub size_bytes: usize,
    pub download_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_scans: usize,
    pub successful_scans: usize,
    pub failed_scans: usize,
    pub total_targets: usize,
    pub tools_used: Vec<String>,
    /// Mean duration in milliseconds of scans that finished.
    pub avg_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub report: Report,
    pub summary: ReportSummary,
    pub scans: Vec<ScanRecord>,
}

pub struct RenderedReport {
    pub content_type: &'static str,
    pub filename: String,
    pub body: Vec<u8>,
}

/// Snapshots the requested scans into a report document.
pub fn build_report(
    request: &ReportRequest,
    available: &[ScanRecord],
    now: DateTime<Utc>,
) -> Result<ReportDocument, ReportError> {
    let format = match request.format.as_deref().map(str::trim) {
        Some(format) if !format.is_empty() => format.parse()?,
        _ => ReportFormat::default(),
    };
    let requested: Vec<&str> = request
        .scan_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .unique()
        .collect();
    if requested.is_empty() {
        return Err(ReportError::EmptySelection);
    }

    let mut scans = Vec::new();
    let mut missing = Vec::new();
    for id in &requested {
        match available.iter().find(|scan| scan.id == *id) {
            Some(scan) => {
                let mut scan = scan.clone();
                if !request.include_raw_data {
                    scan.results = None;
                }
                scans.push(scan);
            }
            None => missing.push(id.to_string()),
        }
    }
    if scans.is_empty() {
        return Err(ReportError::NoMatchingScans);
    }

    let id = generate_report_id(now);
    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("OSINT Report - {}", now.format("%Y-%m-%d")));

    let mut document = ReportDocument {
        report: Report {
            download_url: format!("/api/reports/download/{id}"),
            id,
            title,
            description: request
                .description
                .as_deref()
                .map(str::trim)
                .filter(|description| !description.is_empty())
                .map(str::to_string),
            format,
            status: ReportStatus::Completed,
            created_at: now,
            scans_count: scans.len(),
            scan_ids: scans.iter().map(|scan| scan.id.clone()).collect(),
            missing_scan_ids: missing,
            tool_names: scans
                .iter()
                .map(|scan| scan.tool_name.clone())
                .unique()
                .sorted()
                .collect(),
            include_raw_data: request.include_raw_data,
            size_bytes: 0,
        },
        summary: summarize(&scans),
        scans,
    };
    measure_size(&mut document)?;
    Ok(document)
}

/// Stores the rendered length in the report. The size is part of the rendered
/// body, so re-render until the recorded value matches.
fn measure_size(document: &mut ReportDocument) -> Result<(), ReportError> {
    for _ in 0..MAX_SIZE_PASSES {
        let size = render(document)?.body.len();
        if size == document.report.size_bytes {
            return Ok(());
        }
        document.report.size_bytes = size;
    }
    Ok(())
}

pub fn summarize(scans: &[ScanRecord]) -> ReportSummary {
    let durations: Vec<u64> = scans.iter().filter_map(|scan| scan.duration).collect();
    let avg_duration = if durations.is_empty() {
        0
    } else {
        let total: u64 = durations.iter().sum();
        (total as f64 / durations.len() as f64).round() as u64
    };

    ReportSummary {
        total_scans: scans.len(),
        successful_scans: scans
            .iter()
            .filter(|scan| scan.status == ScanStatus::Completed)
            .count(),
        failed_scans: scans
            .iter()
            .filter(|scan| scan.status == ScanStatus::Error)
            .count(),
        total_targets: scans
            .iter()
            .map(|scan| scan.target.as_str())
            .collect::<HashSet<_>>()
            .len(),
        tools_used: scans
            .iter()
            .map(|scan| scan.tool.clone())
            .unique()
            .sorted()
            .collect(),
        avg_duration,
    }
}

pub fn render(document: &ReportDocument) -> Result<RenderedReport, ReportError> {
    let format = document.report.format;
    let body = match format {
        ReportFormat::Json => serde_json::to_vec_pretty(document)?,
        ReportFormat::Csv => render_csv(&document.scans)?,
    };
    Ok(RenderedReport {
        content_type: format.content_type(),
        filename: format!("osint-report-{}.{}", document.report.id, format.extension()),
        body,
    })
}

fn render_csv(scans: &[ScanRecord]) -> Result<Vec<u8>, ReportError> {
    let mut wtr = Writer::from_writer(Vec::new());
    wtr.write_record([
        "id",
        "tool",
        "target",
        "status",
        "startTime",
        "endTime",
        "durationMs",
        "error",
    ])?;

    for scan in scans {
        let end_time = scan
            .end_time
            .map(|end| end.to_rfc3339())
            .unwrap_or_default();
        let duration = scan
            .duration
            .map(|duration| duration.to_string())
            .unwrap_or_default();
        wtr.write_record([
            scan.id.as_str(),
            scan.tool.as_str(),
            scan.target.as_str(),
            scan.status.as_str(),
            scan.start_time.to_rfc3339().as_str(),
            end_time.as_str(),
            duration.as_str(),
            scan.error.as_deref().unwrap_or_default(),
        ])?;
    }

    wtr.into_inner()
        .map_err(|err| ReportError::Io(err.into_error()))
}

fn generate_report_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("report_{}_{}", now.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use serde_json::{json, Map};

    fn scan(tool_id: &str, target: &str, ok: bool) -> ScanRecord {
        let catalog = ToolCatalog::from_embedded().expect("catalog");
        let tool = catalog.get(tool_id).expect("tool");
        let mut record = ScanRecord::new(tool, target.to_string(), Map::new());
        if ok {
            record.mark_completed(json!({"stdout": "ok"}), None);
        } else {
            record.mark_failed("command failed with code 1. Error: boom");
        }
        record
    }

    #[test]
    fn requires_scan_ids_and_known_format() {
        let scans = vec![scan("whois", "example.com", true)];
        let empty = ReportRequest::for_scans(Vec::<String>::new());
        assert!(matches!(
            build_report(&empty, &scans, Utc::now()),
            Err(ReportError::EmptySelection)
        ));

        let mut pdf = ReportRequest::for_scans([scans[0].id.clone()]);
        pdf.format = Some("pdf".to_string());
        assert!(matches!(
            build_report(&pdf, &scans, Utc::now()),
            Err(ReportError::UnsupportedFormat(format)) if format == "pdf"
        ));
    }

    #[test]
    fn lists_missing_ids_and_fails_when_none_resolve() {
        let scans = vec![
            scan("whois", "example.com", true),
            scan("dns-lookup", "example.com", false),
        ];
        let request = ReportRequest::for_scans([
            scans[0].id.clone(),
            "missing".to_string(),
            scans[0].id.clone(),
            scans[1].id.clone(),
        ]);
        let document = build_report(&request, &scans, Utc::now()).expect("report");

        assert_eq!(document.report.scans_count, 2);
        assert_eq!(document.report.missing_scan_ids, vec!["missing"]);
        assert_eq!(document.summary.successful_scans, 1);
        assert_eq!(document.summary.failed_scans, 1);
        assert_eq!(document.summary.total_targets, 1);
        assert_eq!(document.summary.tools_used, vec!["dns-lookup", "whois"]);
        assert!(document.report.id.starts_with("report_"));
        assert_eq!(
            document.report.download_url,
            format!("/api/reports/download/{}", document.report.id)
        );
        assert!(document.report.size_bytes > 0);

        let none = ReportRequest::for_scans(["nope"]);
        assert!(matches!(
            build_report(&none, &scans, Utc::now()),
            Err(ReportError::NoMatchingScans)
        ));
    }

    #[test]
    fn can_strip_raw_results() {
        let scans = vec![scan("whois", "example.com", true)];
        let mut request = ReportRequest::for_scans([scans[0].id.clone()]);
        request.include_raw_data = false;
        let document = build_report(&request, &scans, Utc::now()).expect("report");
        assert!(document.scans[0].results.is_none());
        assert!(scans[0].results.is_some());
    }

    #[test]
    fn recorded_size_matches_rendered_body() {
        let scans: Vec<_> = (0..40)
            .map(|index| scan("whois", &format!("host{index}.example.com"), index % 3 != 0))
            .collect();
        let request = ReportRequest::for_scans(scans.iter().map(|scan| scan.id.clone()));
        let document = build_report(&request, &scans, Utc::now()).expect("report");

        let rendered = render(&document).expect("render");
        assert_eq!(rendered.body.len(), document.report.size_bytes);
    }

    #[test]
    fn renders_csv_rows() {
        let scans = vec![scan("whois", "example.com", false)];
        let mut request = ReportRequest::for_scans([scans[0].id.clone()]);
        request.format = Some("CSV".to_string());
        let document = build_report(&request, &scans, Utc::now()).expect("report");
        let rendered = render(&document).expect("render");

        assert_eq!(rendered.content_type, "text/csv; charset=utf-8");
        assert!(rendered.filename.ends_with(".csv"));
        let text = String::from_utf8(rendered.body).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,tool,target,status,startTime,endTime,durationMs,error")
        );
        let row = lines.next().expect("row");
        assert!(row.starts_with(&scans[0].id));
        assert!(row.contains(",whois,example.com,error,"));
        assert!(row.ends_with("command failed with code 1. Error: boom"));
    }
}
