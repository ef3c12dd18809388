// src/exec/progress.rs

//! Best-effort progress extraction from the wrapped tools' text output.
//!
//! Lines that match nothing yield `None`; a malformed number never aborts the
//! transfer, it just leaves that field unset.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::Progress;
use crate::types::{RecordKind, Status};

/// `      1,238,099  45%  146.38MB/s    0:00:12 (xfr#3, to-chk=7/10)`
static RSYNC_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\S+)\s+(\d{1,3})%\s+(\S+/s)\s+(\d+:\d{2}:\d{2})(?:\s+\((.*)\))?")
        .expect("static regex")
});

static RSYNC_XFR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"xfr#(\d+)").expect("static regex"));

static RSYNC_TO_CHECK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:to|ir)-chk=(\d+)/(\d+)").expect("static regex"));

/// `sent 1,234,567 bytes  received 987 bytes  ...`
static RSYNC_SENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsent\s+([\d,]+)\s+bytes").expect("static regex"));

/// `total size is 9,876,543  speedup is 1.00`
static RSYNC_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"total size is\s+([\d,]+)").expect("static regex"));

/// `Transferred:   10.5M / 100.0M, 10%, 1.2M/s, ETA 1m30s`
/// `Transferred:            3 / 10, 30%`
static RCLONE_TRANSFERRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transferred:\s*(.+?)\s*/\s*(.+?)\s*,\s*(\d{1,3}%|-)(?:\s*,\s*([^,]+?))?(?:\s*,\s*ETA\s*(\S+))?\s*$")
        .expect("static regex")
});

/// Parse one output line for a record of `kind`.
pub fn parse_line(kind: RecordKind, line: &str) -> Option<Progress> {
    let progress = match kind {
        RecordKind::Job => parse_rsync(line),
        RecordKind::Operation => parse_rclone(line),
    };
    (!progress.is_empty()).then_some(progress)
}

fn parse_rsync(line: &str) -> Progress {
    let mut progress = Progress::default();

    if let Some(caps) = RSYNC_PROGRESS.captures(line) {
        let amount = &caps[1];
        match parse_count(amount) {
            Some(bytes) => progress.bytes_transferred = Some(bytes),
            None => progress.transferred_display = Some(amount.to_string()),
        }
        progress.percent = parse_percent(&caps[2]);
        progress.speed = Some(caps[3].to_string());
        progress.eta = Some(caps[4].to_string());

        if let Some(extra) = caps.get(5).map(|m| m.as_str()) {
            if let Some(x) = RSYNC_XFR.captures(extra) {
                progress.files_transferred = parse_count(&x[1]);
            }
            if let Some(c) = RSYNC_TO_CHECK.captures(extra) {
                if let (Some(left), Some(total)) = (parse_count(&c[1]), parse_count(&c[2])) {
                    progress.total_files = Some(total);
                    if progress.files_transferred.is_none() {
                        progress.files_transferred = Some(total.saturating_sub(left));
                    }
                }
            }
        }
        return progress;
    }

    if let Some(caps) = RSYNC_SENT.captures(line) {
        progress.bytes_transferred = parse_count(&caps[1]);
    }
    if let Some(caps) = RSYNC_TOTAL.captures(line) {
        progress.total_bytes = parse_count(&caps[1]);
    }
    if line.to_lowercase().contains("files...") {
        progress.status = Some(Status::Running);
    }

    progress
}

fn parse_rclone(line: &str) -> Progress {
    let mut progress = Progress::default();

    if let Some(caps) = RCLONE_TRANSFERRED.captures(line) {
        let done = caps[1].trim();
        let total = caps[2].trim();
        match (parse_count(done), parse_count(total)) {
            (Some(d), Some(t)) => {
                progress.files_transferred = Some(d);
                progress.total_files = Some(t);
            }
            _ => progress.transferred_display = Some(format!("{done} / {total}")),
        }

        if let Some(pct) = caps[3].strip_suffix('%') {
            progress.percent = parse_percent(pct);
            progress.status = Some(Status::Running);
        }
        if let Some(speed) = caps.get(4) {
            progress.speed = Some(speed.as_str().trim().to_string());
        }
        if let Some(eta) = caps.get(5) {
            progress.eta = Some(eta.as_str().to_string());
        }
    }

    if line.to_lowercase().contains("files...") || line.contains("Checking") {
        progress.status = Some(Status::Scanning);
    }

    progress
}

fn parse_count(s: &str) -> Option<u64> {
    let digits: String = s.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_percent(s: &str) -> Option<u8> {
    s.trim().parse::<u16>().ok().map(|p| p.min(100) as u8)
}
