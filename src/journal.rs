//! Append-only JSON-lines journal of refresh cycles, rotated daily.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use pipeline::CycleOutcome;
use serde_json::json;
use tracing::warn;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct CycleJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl CycleJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("cycles-{}.jsonl", day_key)))
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    /// Write one event; failures are logged, never propagated.
    pub fn write_event(&mut self, event: serde_json::Value) {
        let write_result = (|| -> std::io::Result<()> {
            self.rotate_if_needed()?;
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{}", line)?;
            self.file.flush()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            warn!("Cycle journal write failed: {}", e);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Journal event for a cycle outcome.
pub fn cycle_event(outcome: &CycleOutcome) -> serde_json::Value {
    match outcome {
        CycleOutcome::Ready(summary) => json!({
            "ts": now_iso(),
            "kind": "cycle_ready",
            "as_of": summary.as_of.to_string(),
            "fetched_at": summary.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "computed_at": summary.computed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "districts": summary.regions,
            "available": summary.available,
            "rows": summary.report.rows_seen,
            "duplicates_replaced": summary.report.duplicates_replaced,
            "unknown_rows": summary.report.unknown_rows,
            "unknown_regions": summary.report.unknown_regions,
            "invalid_entries": summary.report.invalid_entries,
            "zero_filled": summary.report.zero_filled
        }),
        CycleOutcome::Failed { stage, error } => json!({
            "ts": now_iso(),
            "kind": "cycle_failed",
            "stage": stage,
            "error": error
        }),
        CycleOutcome::Skipped => json!({
            "ts": now_iso(),
            "kind": "cycle_skipped"
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use pipeline::{CycleSummary, NormalizeReport, Stage};

    #[test]
    fn test_failed_cycle_event_names_stage() {
        let event = cycle_event(&CycleOutcome::Failed {
            stage: Stage::Fetch,
            error: "RKI returned 500".into(),
        });
        assert_eq!(event["kind"], "cycle_failed");
        assert_eq!(event["stage"], "fetch");
        assert_eq!(event["error"], "RKI returned 500");
    }

    #[test]
    fn test_ready_cycle_event_carries_fetch_time_and_fill_count() {
        let fetched_at = Utc
            .with_ymd_and_hms(2021, 1, 8, 6, 0, 0)
            .single()
            .expect("timestamp");
        let event = cycle_event(&CycleOutcome::Ready(CycleSummary {
            as_of: NaiveDate::from_ymd_opt(2021, 1, 7).expect("date"),
            fetched_at,
            computed_at: fetched_at,
            regions: 400,
            available: 398,
            report: NormalizeReport {
                zero_filled: 12,
                ..NormalizeReport::default()
            },
        }));

        assert_eq!(event["kind"], "cycle_ready");
        assert_eq!(event["as_of"], "2021-01-07");
        assert_eq!(event["fetched_at"], "2021-01-08T06:00:00Z");
        assert_eq!(event["zero_filled"], 12);
        assert_eq!(event["available"], 398);
    }

    #[test]
    fn test_journal_appends_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut journal = CycleJournal::open(dir.path().join("cycles")).expect("open");
        journal.write_event(cycle_event(&CycleOutcome::Skipped));
        journal.write_event(cycle_event(&CycleOutcome::Skipped));

        let path = journal
            .dir()
            .join(format!("cycles-{}.jsonl", Utc::now().format("%Y-%m-%d")));
        let contents = std::fs::read_to_string(path).expect("journal file");
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("cycle_skipped"));
    }
}
