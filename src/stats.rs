//! Dashboard statistics derived from scan history and in-flight scans.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::scan::{ScanRecord, ScanStatus};

pub const DEFAULT_TIMELINE_HOURS: u32 = 24;
pub const MAX_TIMELINE_HOURS: u32 = 168;
const POPULAR_TOOLS: usize = 5;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PopularTool {
    pub id: String,
    pub name: String,
    pub uses: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_scans: usize,
    pub successful_scans: usize,
    pub failed_scans: usize,
    pub active_scans: usize,
    /// Seconds.
    pub average_time: f64,
    /// Percent of finished scans that completed.
    pub success_rate: f64,
    pub popular_tools: Vec<PopularTool>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub id: String,
    pub name: String,
    pub total_uses: usize,
    pub success_rate: f64,
    pub average_time: f64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TimelineBucket {
    pub timestamp: DateTime<Utc>,
    pub scans: usize,
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Realtime {
    pub active_scans: usize,
    pub queued_scans: usize,
    pub running_scans: usize,
    /// Seconds since the service started.
    pub uptime: u64,
    pub history_size: usize,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetStats {
    pub target: String,
    pub count: usize,
    pub last_queried: DateTime<Utc>,
    pub tools: Vec<String>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn average_seconds<'a>(scans: impl Iterator<Item = &'a ScanRecord>) -> f64 {
    let durations: Vec<u64> = scans.filter_map(|scan| scan.duration).collect();
    if durations.is_empty() {
        return 0.0;
    }
    let total: u64 = durations.iter().sum();
    round_to(total as f64 / durations.len() as f64 / 1000.0, 2)
}

fn success_rate(successful: usize, finished: usize) -> f64 {
    if finished == 0 {
        0.0
    } else {
        round_to(successful as f64 * 100.0 / finished as f64, 1)
    }
}

pub fn overview(history: &[ScanRecord], active: &[ScanRecord]) -> Overview {
    let successful = history
        .iter()
        .filter(|scan| scan.status == ScanStatus::Completed)
        .count();
    let failed = history
        .iter()
        .filter(|scan| scan.status == ScanStatus::Error)
        .count();

    let mut uses: HashMap<&str, (&str, usize)> = HashMap::new();
    for scan in history.iter().chain(active) {
        uses.entry(scan.tool.as_str())
            .or_insert((scan.tool_name.as_str(), 0))
            .1 += 1;
    }
    let popular_tools = uses
        .into_iter()
        .sorted_by(|(a_id, (_, a)), (b_id, (_, b))| b.cmp(a).then_with(|| a_id.cmp(b_id)))
        .take(POPULAR_TOOLS)
        .map(|(id, (name, uses))| PopularTool {
            id: id.to_string(),
            name: name.to_string(),
            uses,
        })
        .collect();

    Overview {
        total_scans: history.len(),
        successful_scans: successful,
        failed_scans: failed,
        active_scans: active.len(),
        average_time: average_seconds(history.iter()),
        success_rate: success_rate(successful, successful + failed),
        popular_tools,
    }
}

pub fn tool_stats(history: &[ScanRecord]) -> Vec<ToolStats> {
    history
        .iter()
        .into_group_map_by(|scan| scan.tool.as_str())
        .into_iter()
        .filter_map(|(id, scans)| {
            let last_used = scans.iter().map(|scan| scan.start_time).max()?;
            let successful = scans
                .iter()
                .filter(|scan| scan.status == ScanStatus::Completed)
                .count();
            let finished = scans.iter().filter(|scan| scan.is_finished()).count();
            Some(ToolStats {
                id: id.to_string(),
                name: scans[0].tool_name.clone(),
                total_uses: scans.len(),
                success_rate: success_rate(successful, finished),
                average_time: average_seconds(scans.iter().copied()),
                last_used,
            })
        })
        .sorted_by(|a, b| b.total_uses.cmp(&a.total_uses).then_with(|| a.id.cmp(&b.id)))
        .collect()
}

/// Hourly buckets ending with the hour containing `now`, oldest first.
pub fn timeline(scans: &[ScanRecord], now: DateTime<Utc>, hours: u32) -> Vec<TimelineBucket> {
    let hours = hours.clamp(1, MAX_TIMELINE_HOURS);
    let hour = TimeDelta::hours(1);
    let current = now.duration_trunc(hour).unwrap_or(now);

    (0..hours)
        .rev()
        .map(|offset| {
            let start = current - hour * offset as i32;
            let end = start + hour;
            let in_bucket: Vec<&ScanRecord> = scans
                .iter()
                .filter(|scan| scan.start_time >= start && scan.start_time < end)
                .collect();
            TimelineBucket {
                timestamp: start,
                scans: in_bucket.len(),
                success: in_bucket
                    .iter()
                    .filter(|scan| scan.status == ScanStatus::Completed)
                    .count(),
                failed: in_bucket
                    .iter()
                    .filter(|scan| scan.status == ScanStatus::Error)
                    .count(),
            }
        })
        .collect()
}

pub fn realtime(
    active: &[ScanRecord],
    history_size: usize,
    uptime: Duration,
    now: DateTime<Utc>,
) -> Realtime {
    Realtime {
        active_scans: active.len(),
        queued_scans: active
            .iter()
            .filter(|scan| scan.status == ScanStatus::Pending)
            .count(),
        running_scans: active
            .iter()
            .filter(|scan| scan.status == ScanStatus::Running)
            .count(),
        uptime: uptime.as_secs(),
        history_size,
        last_update: now,
    }
}

pub fn top_targets(scans: &[ScanRecord], limit: usize) -> Vec<TargetStats> {
    scans
        .iter()
        .into_group_map_by(|scan| scan.target.as_str())
        .into_iter()
        .filter_map(|(target, scans)| {
            let last_queried = scans.iter().map(|scan| scan.start_time).max()?;
            let tools: BTreeSet<&str> = scans.iter().map(|scan| scan.tool.as_str()).collect();
            Some(TargetStats {
                target: target.to_string(),
                count: scans.len(),
                last_queried,
                tools: tools.into_iter().map(str::to_string).collect(),
            })
        })
        .sorted_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_queried.cmp(&a.last_queried))
                .then_with(|| a.target.cmp(&b.target))
        })
        .take(limit)
        .collect()
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub tool: String,
    pub tool_name: String,
    pub target: String,
    pub status: ScanStatus,
    /// End time for finished scans, start time otherwise.
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

pub fn recent_activity(scans: &[ScanRecord], limit: usize) -> Vec<ActivityEntry> {
    scans
        .iter()
        .map(|scan| ActivityEntry {
            id: scan.id.clone(),
            tool: scan.tool.clone(),
            tool_name: scan.tool_name.clone(),
            target: scan.target.clone(),
            status: scan.status,
            timestamp: scan.end_time.unwrap_or(scan.start_time),
            duration: scan.duration,
        })
        .sorted_by(|a, b| b.timestamp.cmp(&a.timestamp))
        .take(limit)
        .collect()
}
