//! Run-log progress parsing
//!
//! Run logs double as the progress channel: the executor drops a
//! `[PHASE:NAME]` marker at each transition and one `→` line per file,
//! and polling clients read percent and recent activity back out of
//! the text. Only the tail of the log is scanned so long runs stay
//! cheap to poll.

use regex::Regex;
use serde::Serialize;

/// Percent shown for the last-seen phase marker
const PHASE_PROGRESS: [(&str, u8); 5] = [
    ("ACQUIRING", 15),
    ("COMPRESSING", 45),
    ("UPLOADING", 75),
    ("FINALIZING", 95),
    ("COMPLETE", 100),
];

/// Log lines scanned from the end
const MAX_SCANNED_LINES: usize = 1000;
/// File-progress lines kept for display
const MAX_FILE_LINES: usize = 20;

/// Progress derived from a run's log text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunProgress {
    pub percent: u8,
    pub phase: Option<String>,
    pub recent_files: Vec<String>,
}

/// Parse progress out of a run log
///
/// The last recognized phase marker wins; unknown markers are ignored.
/// A log with no marker yet reads as 0 percent.
pub fn parse_run_log(log: &str) -> RunProgress {
    let marker_re = Regex::new(r"\[PHASE:([A-Z]+)\]").expect("valid regex");

    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(MAX_SCANNED_LINES);

    let mut percent = 0u8;
    let mut phase: Option<String> = None;
    let mut recent_files: Vec<String> = Vec::new();

    for line in &lines[start..] {
        if let Some(caps) = marker_re.captures(line) {
            let name = &caps[1];
            if let Some(p) = phase_percent(name) {
                percent = p;
                phase = Some(name.to_string());
            }
            continue;
        }

        for needle in ["→ Processing file: ", "→ Downloading file: "] {
            if let Some(idx) = line.find(needle) {
                recent_files.push(line[idx..].to_string());
                break;
            }
        }
    }

    if recent_files.len() > MAX_FILE_LINES {
        recent_files.drain(..recent_files.len() - MAX_FILE_LINES);
    }

    RunProgress {
        percent,
        phase,
        recent_files,
    }
}

fn phase_percent(marker: &str) -> Option<u8> {
    PHASE_PROGRESS
        .iter()
        .find(|(name, _)| *name == marker)
        .map(|(_, percent)| *percent)
}
