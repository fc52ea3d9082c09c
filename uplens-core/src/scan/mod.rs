//! Direct-scan fallback path
//!
//! Serves the same rollup shapes as the store path by reading raw
//! export files straight from disk, for deployments that never run an
//! ingest. Parsed records are cached with a short TTL so repeated
//! dashboard queries don't re-read the directory on every call.
//!
//! Both paths funnel through [`crate::rollup::aggregate`], which is
//! what keeps their outputs interchangeable.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::ingest::{discover_files, parse_entries};
use crate::rollup::aggregate::{self, FallbackPolicy};
use crate::types::*;

/// How long a parsed snapshot stays fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedSnapshot {
    records: Vec<UsageRecord>,
    loaded_at: Instant,
}

/// Reads and aggregates raw export files without a database.
pub struct DirectScanner {
    raw_dir: PathBuf,
    policy: FallbackPolicy,
    ttl: Duration,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl DirectScanner {
    pub fn new(raw_dir: PathBuf) -> Self {
        Self::with_policy(raw_dir, FallbackPolicy::default())
    }

    pub fn with_policy(raw_dir: PathBuf, policy: FallbackPolicy) -> Self {
        Self {
            raw_dir,
            policy,
            ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    /// Override the cache TTL (tests use zero to force reloads).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Drop the cached snapshot so the next query re-reads the files.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    /// All records currently on disk, via the cache. A missing raw
    /// directory yields an empty set, not an error.
    pub fn records(&self) -> Result<Vec<UsageRecord>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(snapshot) = cache.as_ref() {
            if snapshot.loaded_at.elapsed() < self.ttl {
                return Ok(snapshot.records.clone());
            }
        }

        let records = self.load_from_disk()?;
        *cache = Some(CachedSnapshot {
            records: records.clone(),
            loaded_at: Instant::now(),
        });
        Ok(records)
    }

    /// Whether any raw records are currently available.
    pub fn has_data(&self) -> Result<bool> {
        Ok(!self.records()?.is_empty())
    }

    /// Records whose day falls inside `[start, end]` inclusive.
    pub fn records_between(&self, start: &str, end: &str) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.day.as_str() >= start && r.day.as_str() <= end)
            .collect())
    }

    fn load_from_disk(&self) -> Result<Vec<UsageRecord>> {
        let files = discover_files(&self.raw_dir)?;
        tracing::debug!(dir = %self.raw_dir.display(), files = files.len(), "Scanning raw files");

        // Overlapping exports repeat (user, day) pairs; the store merges
        // them last-wins, so the scan path must too. Files come back
        // sorted, so "last" is well defined.
        let mut merged: BTreeMap<(i64, String), UsageRecord> = BTreeMap::new();
        for path in files {
            let content = std::fs::read_to_string(&path)?;
            for entry in parse_entries(&content) {
                match entry {
                    Ok((_, record)) => {
                        merged.insert((record.user_id, record.day.clone()), record);
                    }
                    Err((line_no, cause)) => {
                        tracing::warn!(
                            file = %path.display(),
                            line = line_no,
                            %cause,
                            "Skipping record during scan"
                        );
                    }
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    // Aggregate views, same shapes as the stored rollups

    pub fn daily_usage(&self) -> Result<Vec<DailyUsageRow>> {
        Ok(aggregate::daily_usage_rows(&self.records()?))
    }

    pub fn weekly_usage(&self) -> Result<Vec<WeeklyUsageRow>> {
        Ok(aggregate::weekly_usage_rows(&self.records()?))
    }

    pub fn chat_mode_requests(&self) -> Result<Vec<ChatModeRow>> {
        Ok(aggregate::chat_mode_rows(&self.records()?, &self.policy))
    }

    pub fn model_usage(&self) -> Result<Vec<ModelUsageRow>> {
        Ok(aggregate::model_usage_rows(&self.records()?, &self.policy))
    }

    pub fn agent_adoption(&self) -> Result<Vec<AgentAdoptionRow>> {
        Ok(aggregate::agent_adoption_rows(&self.records()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_raw(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_missing_dir_yields_empty() {
        let scanner = DirectScanner::new(PathBuf::from("/nonexistent/raw"));
        assert!(scanner.records().unwrap().is_empty());
        assert!(scanner.daily_usage().unwrap().is_empty());
    }

    #[test]
    fn test_scan_aggregates_across_files() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(
            &raw,
            "a.ndjson",
            r#"{"user_id": 1, "day": "2024-01-01", "code_generation_activity_count": 10}"#,
        );
        write_raw(
            &raw,
            "b.ndjson",
            r#"{"user_id": 2, "day": "2024-01-01", "code_generation_activity_count": 5}
{"user_id": 1, "day": "2024-01-02"}"#,
        );

        let scanner = DirectScanner::new(raw);
        let daily = scanner.daily_usage().unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].active_users, 2);
        assert_eq!(daily[0].total_suggestions, 15);
    }

    #[test]
    fn test_cache_serves_stale_until_invalidated() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(&raw, "a.ndjson", r#"{"user_id": 1, "day": "2024-01-01"}"#);

        let scanner = DirectScanner::new(raw.clone());
        assert_eq!(scanner.records().unwrap().len(), 1);

        write_raw(
            &raw,
            "b.ndjson",
            r#"{"user_id": 2, "day": "2024-01-01"}"#,
        );

        // Within TTL the snapshot is reused
        assert_eq!(scanner.records().unwrap().len(), 1);

        scanner.invalidate();
        assert_eq!(scanner.records().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(&raw, "a.ndjson", r#"{"user_id": 1, "day": "2024-01-01"}"#);

        let scanner = DirectScanner::new(raw.clone()).with_ttl(Duration::ZERO);
        assert_eq!(scanner.records().unwrap().len(), 1);

        write_raw(&raw, "b.ndjson", r#"{"user_id": 2, "day": "2024-01-01"}"#);
        assert_eq!(scanner.records().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_user_day_merges_last_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(
            &raw,
            "a.ndjson",
            r#"{"user_id": 1, "day": "2024-02-01", "code_generation_activity_count": 10}"#,
        );
        write_raw(
            &raw,
            "b.ndjson",
            r#"{"user_id": 1, "day": "2024-02-01", "code_generation_activity_count": 15}"#,
        );

        let scanner = DirectScanner::new(raw);
        let records = scanner.records().unwrap();
        assert_eq!(records.len(), 1);

        let daily = scanner.daily_usage().unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].active_users, 1);
        assert_eq!(daily[0].total_suggestions, 15);
    }

    #[test]
    fn test_records_between_filters_inclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(
            &raw,
            "a.ndjson",
            r#"{"user_id": 1, "day": "2024-01-01"}
{"user_id": 1, "day": "2024-01-02"}
{"user_id": 1, "day": "2024-01-03"}"#,
        );

        let scanner = DirectScanner::new(raw);
        assert!(scanner.has_data().unwrap());
        let hits = scanner.records_between("2024-01-02", "2024-01-03").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].day, "2024-01-02");
    }

    #[test]
    fn test_malformed_records_skipped_during_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = tmp.path().join("raw");
        write_raw(
            &raw,
            "a.ndjson",
            r#"{"user_id": 1, "day": "2024-01-01"}
{broken
{"user_id": 2, "day": "2024-01-01"}"#,
        );

        let scanner = DirectScanner::new(raw);
        assert_eq!(scanner.records().unwrap().len(), 2);
    }
}
