//! NDJSON / JSON ingestion
//!
//! Parses raw export files into detail records and upserts them into
//! the store. Ingestion is idempotent: the store keys on (user, day),
//! so replaying a file converges to the same state.
//!
//! Malformed records are skipped and counted, never fatal: one bad line
//! must not reject a whole batch.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::db::{Database, UpsertOutcome};
use crate::error::Result;
use crate::types::UsageRecord;

/// Outcome of one ingestion pass.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Records upserted into the store
    pub accepted: usize,
    /// Records skipped as malformed or invalid
    pub rejected: usize,
    /// Newly inserted (vs updated) detail rows
    pub inserted: usize,
    /// Updated (previously seen) detail rows
    pub updated: usize,
    /// One message per rejected record, "line N: cause"
    pub errors: Vec<String>,
}

impl IngestReport {
    /// The first few error messages, for display without flooding the
    /// terminal on a badly broken file.
    pub fn error_sample(&self) -> &[String] {
        let n = self.errors.len().min(10);
        &self.errors[..n]
    }

    fn merge(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.errors.extend(other.errors);
    }
}

/// Ingestion service over a borrowed database handle.
pub struct IngestService<'a> {
    db: &'a Database,
}

impl<'a> IngestService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Ingest one file. Format is sniffed from the first non-whitespace
    /// byte: `[` means a JSON array of records, anything else NDJSON.
    pub fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        tracing::info!(path = %path.display(), "Ingesting file");
        let file = File::open(path)?;
        self.ingest_reader(BufReader::new(file))
    }

    /// Ingest every discoverable file under `dir`, in sorted order.
    pub fn ingest_dir(&self, dir: &Path) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for path in discover_files(dir)? {
            report.merge(self.ingest_path(&path)?);
        }
        Ok(report)
    }

    /// Ingest from an in-memory string (used heavily in tests).
    pub fn ingest_str(&self, content: &str) -> Result<IngestReport> {
        self.ingest_reader(content.as_bytes())
    }

    /// Ingest from any reader.
    pub fn ingest_reader<R: Read>(&self, reader: R) -> Result<IngestReport> {
        let mut reader = BufReader::new(reader);
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let mut report = IngestReport::default();
        for entry in parse_entries(&content) {
            match entry {
                // A failed write rejects that record, not the batch; the
                // upsert runs in its own transaction so nothing partial
                // is left behind
                Ok((line_no, record)) => match self.db.upsert_record(&record) {
                    Ok(UpsertOutcome::Inserted) => {
                        report.inserted += 1;
                        report.accepted += 1;
                    }
                    Ok(UpsertOutcome::Updated) => {
                        report.updated += 1;
                        report.accepted += 1;
                    }
                    Err(e) => reject(&mut report, line_no, &e.to_string()),
                },
                Err((line_no, cause)) => reject(&mut report, line_no, &cause),
            }
        }

        tracing::info!(
            accepted = report.accepted,
            rejected = report.rejected,
            "Ingestion pass complete"
        );
        Ok(report)
    }
}

/// Parse export content into validated records.
///
/// Format is sniffed from the first non-whitespace byte: `[` means a
/// JSON array of records, anything else NDJSON. Each entry comes back
/// tagged with its line (or array index) so callers can report precise
/// errors; bad entries never abort the rest of the batch. This is the
/// single parser shared by ingestion and the direct-scan path.
#[allow(clippy::type_complexity)]
pub fn parse_entries(content: &str) -> Vec<std::result::Result<(usize, UsageRecord), (usize, String)>> {
    let mut entries = Vec::new();

    if content.trim_start().starts_with('[') {
        let values: Vec<serde_json::Value> = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(e) => {
                entries.push(Err((1, format!("invalid JSON array: {}", e))));
                return entries;
            }
        };
        for (i, value) in values.into_iter().enumerate() {
            let index = i + 1;
            match serde_json::from_value::<UsageRecord>(value) {
                Ok(record) => entries.push(validated(index, record)),
                Err(e) => entries.push(Err((index, e.to_string()))),
            }
        }
    } else {
        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageRecord>(line) {
                Ok(record) => entries.push(validated(line_no, record)),
                Err(e) => entries.push(Err((line_no, e.to_string()))),
            }
        }
    }

    entries
}

fn validated(
    line_no: usize,
    record: UsageRecord,
) -> std::result::Result<(usize, UsageRecord), (usize, String)> {
    match record.validate() {
        Ok(()) => Ok((line_no, record)),
        Err(reason) => Err((line_no, reason)),
    }
}

fn reject(report: &mut IngestReport, line_no: usize, cause: &str) {
    let msg = format!("line {}: {}", line_no, cause);
    tracing::warn!(%msg, "Skipping record");
    report.rejected += 1;
    report.errors.push(msg);
}

/// Find ingestable files under `dir`: `*.json`, `*.ndjson`, `*.jsonl`.
/// A missing directory yields an empty list, not an error.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for ext in ["json", "ndjson", "jsonl"] {
        let pattern = dir.join(format!("*.{}", ext));
        if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
            files.extend(paths.flatten());
        }
    }
    files.sort();
    Ok(files)
}

/// Move a fully processed file into `processed_dir`, prefixing the name
/// with today's date so repeated ingests of same-named exports don't
/// collide.
pub fn move_to_processed(path: &Path, processed_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(processed_dir)?;

    let stamp = chrono::Local::now().format("%Y-%m-%d");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export.json".to_string());
    let dest = processed_dir.join(format!("{}-{}", stamp, name));

    std::fs::rename(path, &dest)?;
    tracing::info!(from = %path.display(), to = %dest.display(), "Moved processed file");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_ndjson_ingest_counts() {
        let db = test_db();
        let svc = IngestService::new(&db);

        let report = svc
            .ingest_str(
                r#"{"user_id": 1, "day": "2024-01-01"}
{"user_id": 2, "day": "2024-01-01"}

{"user_id": 3, "day": "2024-01-02"}"#,
            )
            .unwrap();

        assert_eq!(report.accepted, 3);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.inserted, 3);
        assert_eq!(db.detail_count().unwrap(), 3);
    }

    #[test]
    fn test_malformed_lines_skipped_not_fatal() {
        let db = test_db();
        let svc = IngestService::new(&db);

        // 8 good, 2 bad (one unparseable, one missing user_id)
        let mut lines: Vec<String> = (1..=4)
            .map(|u| format!(r#"{{"user_id": {}, "day": "2024-01-01"}}"#, u))
            .collect();
        lines.push("{not json at all".to_string());
        lines.push(r#"{"day": "2024-01-01"}"#.to_string());
        lines.extend((5..=8).map(|u| format!(r#"{{"user_id": {}, "day": "2024-01-01"}}"#, u)));

        let report = svc.ingest_str(&lines.join("\n")).unwrap();
        assert_eq!(report.accepted, 8);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("line 5:"));
        assert!(report.errors[1].starts_with("line 6:"));
        assert_eq!(db.detail_count().unwrap(), 8);
    }

    #[test]
    fn test_json_array_input() {
        let db = test_db();
        let svc = IngestService::new(&db);

        let report = svc
            .ingest_str(
                r#"[
                    {"user_id": 1, "day": "2024-01-01"},
                    {"user_id": 2, "day": "2024-01-01"},
                    {"user_id": 0, "day": "2024-01-01"}
                ]"#,
            )
            .unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
    }

    #[test]
    fn test_reingest_is_idempotent() {
        let db = test_db();
        let svc = IngestService::new(&db);

        let content = r#"{"user_id": 1, "day": "2024-01-01", "code_generation_activity_count": 10}"#;
        let first = svc.ingest_str(content).unwrap();
        assert_eq!(first.inserted, 1);

        let second = svc.ingest_str(content).unwrap();
        assert_eq!(second.updated, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(db.detail_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_upsert_rejects_record_not_batch() {
        let db = test_db();
        // Sabotage one child table so any record carrying an IDE
        // breakdown fails to write
        db.connection()
            .execute("DROP TABLE usage_by_ide", [])
            .unwrap();

        let svc = IngestService::new(&db);
        let report = svc
            .ingest_str(
                r#"{"user_id": 1, "day": "2024-01-01", "totals_by_ide": [{"ide": "vscode"}]}
{"user_id": 2, "day": "2024-01-01"}"#,
            )
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert!(report.errors[0].starts_with("line 1:"));
        assert_eq!(db.detail_count().unwrap(), 1);
    }

    #[test]
    fn test_error_sample_caps_at_ten() {
        let db = test_db();
        let svc = IngestService::new(&db);

        let lines: Vec<String> = (0..15).map(|_| "{broken".to_string()).collect();
        let report = svc.ingest_str(&lines.join("\n")).unwrap();
        assert_eq!(report.rejected, 15);
        assert_eq!(report.error_sample().len(), 10);
    }

    #[test]
    fn test_discover_files_missing_dir_is_empty() {
        let files = discover_files(Path::new("/nonexistent/raw")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_and_move_to_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        let processed = tmp.path().join("processed");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(raw.join("b.ndjson"), "").unwrap();
        std::fs::write(raw.join("a.json"), "").unwrap();
        std::fs::write(raw.join("notes.txt"), "").unwrap();

        let files = discover_files(&raw).unwrap();
        assert_eq!(files.len(), 2);

        let dest = move_to_processed(&files[0], &processed).unwrap();
        assert!(dest.exists());
        assert!(!files[0].exists());
    }
}
