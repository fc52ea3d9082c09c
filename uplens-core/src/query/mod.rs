//! Query façade
//!
//! Serves dashboard-shaped results from whichever path has data: the
//! persisted rollups when anything was ingested, otherwise the
//! direct-scan aggregator. Callers never see which path answered; both
//! produce the same field names, sort order, and units.

use std::collections::BTreeMap;

use chrono::{Duration, Local};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::scan::DirectScanner;
use crate::topk::{self, NamedCount, DEFAULT_TOP_K, OTHER_LANGUAGES_LABEL, OTHER_MODELS_LABEL};
use crate::types::*;

/// Inclusive ISO date range.
#[derive(Debug, Clone)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The last `days` days ending today, local time.
    pub fn last_days(days: i64) -> Self {
        let today = Local::now().date_naive();
        let start = today - Duration::days(days.max(1) - 1);
        Self {
            start: start.to_string(),
            end: today.to_string(),
        }
    }

    fn contains(&self, day: &str) -> bool {
        // ISO dates compare lexicographically
        day >= self.start.as_str() && day <= self.end.as_str()
    }
}

/// One point of a single-metric daily series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: String,
    pub value: i64,
}

/// One point of the chat-mode stacked series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatModeSeriesPoint {
    pub date: String,
    pub edit: i64,
    pub ask: i64,
    pub agent: i64,
    pub custom: i64,
    pub inline: i64,
}

/// One slice of a distribution/donut query. Percentages across a
/// returned set sum to 100, the Other bucket included.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSlice {
    pub name: String,
    pub value: i64,
    pub percentage: f64,
}

/// One row of a per-day breakdown pivoted by category name. Category
/// keys are dynamic, driven by the top-K result for the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRow {
    pub date: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

/// One row of a per-language breakdown pivoted by model bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageModelRow {
    pub language: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, i64>,
}

/// One row of a per-chat-mode breakdown pivoted by model bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelModeRow {
    pub mode: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, i64>,
}

/// Per-IDE activity over the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdeUsageRow {
    pub ide: String,
    pub users: i64,
    pub suggestions: i64,
    pub accepted: i64,
}

/// One point of a fractional daily series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatePoint {
    pub date: String,
    pub value: f64,
}

/// Headline numbers for the dashboard summary card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub active_users: i64,
    pub total_suggestions: i64,
    pub accepted_suggestions: i64,
    pub acceptance_rate: f64,
    pub chat_requests: i64,
    pub agent_requests: i64,
}

/// Code-generation totals including lines-of-code counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeGenStats {
    pub total_suggestions: i64,
    pub accepted_suggestions: i64,
    pub acceptance_rate: f64,
    pub loc_suggested: i64,
    pub loc_added: i64,
}

/// Façade over the store path and the direct-scan path.
pub struct UsageQueries<'a> {
    db: &'a Database,
    scanner: &'a DirectScanner,
}

impl<'a> UsageQueries<'a> {
    pub fn new(db: &'a Database, scanner: &'a DirectScanner) -> Self {
        Self { db, scanner }
    }

    /// Whether queries are being answered from persisted rollups.
    pub fn uses_store(&self) -> Result<bool> {
        Ok(self.db.detail_count()? > 0)
    }

    // ============================================
    // Daily / weekly series
    // ============================================

    pub fn daily_active_users(&self, range: &DateRange) -> Result<Vec<ChartPoint>> {
        let rows = self.daily_rows(range)?;
        Ok(points(rows, |r| (r.date, r.active_users)))
    }

    pub fn daily_suggestions(&self, range: &DateRange) -> Result<Vec<ChartPoint>> {
        let rows = self.daily_rows(range)?;
        Ok(points(rows, |r| (r.date, r.total_suggestions)))
    }

    pub fn daily_accepted_suggestions(&self, range: &DateRange) -> Result<Vec<ChartPoint>> {
        let rows = self.daily_rows(range)?;
        Ok(points(rows, |r| (r.date, r.accepted_suggestions)))
    }

    pub fn weekly_active_users(&self, range: &DateRange) -> Result<Vec<ChartPoint>> {
        let rows = if self.uses_store()? {
            self.db.weekly_usage_between(&range.start, &range.end)?
        } else {
            self.scanner
                .weekly_usage()?
                .into_iter()
                .filter(|r| range.contains(&r.week_start))
                .collect()
        };
        Ok(points(rows, |r| (r.week_start, r.active_users)))
    }

    /// Agent adoption as a percentage of daily active users, rounded to
    /// two decimals.
    pub fn agent_adoption_rate(&self, range: &DateRange) -> Result<Vec<PivotRow>> {
        let rows = if self.uses_store()? {
            self.db.agent_adoption_between(&range.start, &range.end)?
        } else {
            self.scanner
                .agent_adoption()?
                .into_iter()
                .filter(|r| range.contains(&r.date))
                .collect()
        };

        Ok(rows
            .into_iter()
            .map(|r| {
                let rate = if r.total_active_users > 0 {
                    round2(r.agent_users as f64 / r.total_active_users as f64 * 100.0)
                } else {
                    0.0
                };
                let mut values = BTreeMap::new();
                values.insert("adoption_rate".to_string(), rate);
                values.insert("agent_users".to_string(), r.agent_users as f64);
                PivotRow {
                    date: r.date,
                    values,
                }
            })
            .collect())
    }

    /// Headline numbers over the window: distinct active users plus
    /// summed counters.
    pub fn summary(&self, range: &DateRange) -> Result<SummaryStats> {
        let records = self.records_in(range)?;

        let mut users = std::collections::HashSet::new();
        let mut stats = SummaryStats {
            active_users: 0,
            total_suggestions: 0,
            accepted_suggestions: 0,
            acceptance_rate: 0.0,
            chat_requests: 0,
            agent_requests: 0,
        };
        for rec in &records {
            users.insert(rec.user_id);
            stats.total_suggestions += rec.code_generation_activity_count;
            stats.accepted_suggestions += rec.code_acceptance_activity_count;
            stats.chat_requests += rec.user_initiated_interaction_count;
            if rec.used_agent {
                stats.agent_requests += rec.user_initiated_interaction_count;
            }
        }
        stats.active_users = users.len() as i64;
        if stats.total_suggestions > 0 {
            stats.acceptance_rate = round2(
                stats.accepted_suggestions as f64 / stats.total_suggestions as f64 * 100.0,
            );
        }
        Ok(stats)
    }

    /// Code-generation totals with the lines-of-code counters.
    pub fn code_generation_stats(&self, range: &DateRange) -> Result<CodeGenStats> {
        let records = self.records_in(range)?;

        let mut stats = CodeGenStats {
            total_suggestions: 0,
            accepted_suggestions: 0,
            acceptance_rate: 0.0,
            loc_suggested: 0,
            loc_added: 0,
        };
        for rec in &records {
            stats.total_suggestions += rec.code_generation_activity_count;
            stats.accepted_suggestions += rec.code_acceptance_activity_count;
            stats.loc_suggested += rec.loc_suggested_to_add_sum;
            stats.loc_added += rec.loc_added_sum;
        }
        if stats.total_suggestions > 0 {
            stats.acceptance_rate = round2(
                stats.accepted_suggestions as f64 / stats.total_suggestions as f64 * 100.0,
            );
        }
        Ok(stats)
    }

    /// Chat requests per active user per day, rounded to two decimals.
    pub fn average_chat_requests_per_user(&self, range: &DateRange) -> Result<Vec<RatePoint>> {
        let rows = self.daily_rows(range)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let value = if r.active_users > 0 {
                    round2(r.chat_requests as f64 / r.active_users as f64)
                } else {
                    0.0
                };
                RatePoint {
                    date: r.date,
                    value,
                }
            })
            .collect())
    }

    // ============================================
    // Chat modes
    // ============================================

    pub fn chat_mode_series(&self, range: &DateRange) -> Result<Vec<ChatModeSeriesPoint>> {
        let rows = if self.uses_store()? {
            self.db
                .chat_mode_requests_between(&range.start, &range.end)?
        } else {
            self.scanner
                .chat_mode_requests()?
                .into_iter()
                .filter(|r| range.contains(&r.date))
                .collect()
        };

        let mut by_date: BTreeMap<String, ChatModeSeriesPoint> = BTreeMap::new();
        for row in rows {
            let point = by_date
                .entry(row.date.clone())
                .or_insert_with(|| ChatModeSeriesPoint {
                    date: row.date.clone(),
                    edit: 0,
                    ask: 0,
                    agent: 0,
                    custom: 0,
                    inline: 0,
                });
            match row.mode {
                ChatMode::Edit => point.edit += row.requests,
                ChatMode::Ask => point.ask += row.requests,
                ChatMode::Agent => point.agent += row.requests,
                ChatMode::Custom => point.custom += row.requests,
                ChatMode::Inline => point.inline += row.requests,
            }
        }
        Ok(by_date.into_values().collect())
    }

    // ============================================
    // Distributions
    // ============================================

    /// Model share across the window, top-K plus an Other bucket.
    pub fn model_distribution(&self, range: &DateRange) -> Result<Vec<DistributionSlice>> {
        let rows = self.model_rows(range)?;
        let totals = topk::accumulate(rows.into_iter().map(|r| (r.model_name, r.requests)));
        Ok(to_distribution(topk::bucket_top_k(
            totals,
            DEFAULT_TOP_K,
            OTHER_MODELS_LABEL,
        )))
    }

    /// Language share of code-generation activity across the window.
    pub fn language_distribution(&self, range: &DateRange) -> Result<Vec<DistributionSlice>> {
        let records = self.records_in(range)?;
        let totals = topk::accumulate(records.iter().flat_map(|rec| {
            rec.totals_by_language_feature
                .iter()
                .map(|lf| (lf.language.clone(), lf.count))
        }));
        Ok(to_distribution(topk::bucket_top_k(
            totals,
            DEFAULT_TOP_K,
            OTHER_LANGUAGES_LABEL,
        )))
    }

    /// Activity per IDE: distinct users plus code-generation totals,
    /// ordered by user count. Records without an IDE breakdown fall
    /// back to their `primary_ide`.
    pub fn ide_usage(&self, range: &DateRange) -> Result<Vec<IdeUsageRow>> {
        let records = self.records_in(range)?;

        #[derive(Default)]
        struct IdeTotals {
            users: std::collections::HashSet<i64>,
            suggestions: i64,
            accepted: i64,
        }

        let mut by_ide: BTreeMap<String, IdeTotals> = BTreeMap::new();
        for rec in &records {
            if rec.totals_by_ide.is_empty() {
                if let Some(ide) = &rec.primary_ide {
                    let t = by_ide.entry(ide.clone()).or_default();
                    t.users.insert(rec.user_id);
                    t.suggestions += rec.code_generation_activity_count;
                    t.accepted += rec.code_acceptance_activity_count;
                }
                continue;
            }
            for b in &rec.totals_by_ide {
                let t = by_ide.entry(b.ide.clone()).or_default();
                t.users.insert(rec.user_id);
                t.suggestions += b.code_generation_activity_count;
                t.accepted += b.code_acceptance_activity_count;
            }
        }

        let mut rows: Vec<IdeUsageRow> = by_ide
            .into_iter()
            .map(|(ide, t)| IdeUsageRow {
                ide,
                users: t.users.len() as i64,
                suggestions: t.suggestions,
                accepted: t.accepted,
            })
            .collect();
        rows.sort_by(|a, b| b.users.cmp(&a.users).then(a.ide.cmp(&b.ide)));
        Ok(rows)
    }

    /// Per-day model share, pivoted by model bucket, values in percent
    /// of the day's total.
    pub fn model_usage_per_day(&self, range: &DateRange) -> Result<Vec<PivotRow>> {
        let rows = self.model_rows(range)?;

        let totals = topk::accumulate(
            rows.iter()
                .map(|r| (r.model_name.clone(), r.requests)),
        );
        let top = topk::top_names(&totals, DEFAULT_TOP_K);

        let mut bucket_names: Vec<String> = top.clone();
        if totals.len() > top.len() {
            bucket_names.push(OTHER_MODELS_LABEL.to_string());
        }

        let mut by_date: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for row in &rows {
            let bucket = topk::bucket_for(&row.model_name, &top, OTHER_MODELS_LABEL);
            *by_date
                .entry(row.date.clone())
                .or_default()
                .entry(bucket.to_string())
                .or_insert(0) += row.requests;
        }
        // Every day carries every bucket key, zeros included, so chart
        // series stay aligned across dates
        for buckets in by_date.values_mut() {
            for name in &bucket_names {
                buckets.entry(name.clone()).or_insert(0);
            }
        }

        Ok(by_date
            .into_iter()
            .map(|(date, buckets)| {
                let day_total: i64 = buckets.values().sum();
                let values = buckets
                    .into_iter()
                    .map(|(name, count)| {
                        let pct = if day_total > 0 {
                            round2(count as f64 / day_total as f64 * 100.0)
                        } else {
                            0.0
                        };
                        (name, pct)
                    })
                    .collect();
                PivotRow { date, values }
            })
            .collect())
    }

    /// Model usage per language: top languages as rows, top models as
    /// columns, both dimensions bucketed independently before counting.
    pub fn models_per_language(&self, range: &DateRange) -> Result<Vec<LanguageModelRow>> {
        let records = self.records_in(range)?;

        let pairs: Vec<(String, String, i64)> = records
            .iter()
            .flat_map(|rec| {
                rec.totals_by_language_model.iter().map(|lm| {
                    (lm.language.clone(), lm.model.clone(), lm.effective_count())
                })
            })
            .collect();

        let language_totals =
            topk::accumulate(pairs.iter().map(|(l, _, c)| (l.clone(), *c)));
        let model_totals = topk::accumulate(pairs.iter().map(|(_, m, c)| (m.clone(), *c)));
        let top_languages = topk::top_names(&language_totals, DEFAULT_TOP_K);
        let top_models = topk::top_names(&model_totals, DEFAULT_TOP_K);

        let mut by_language: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for (language, model, count) in &pairs {
            let lang_bucket = topk::bucket_for(language, &top_languages, OTHER_LANGUAGES_LABEL);
            let model_bucket = topk::bucket_for(model, &top_models, OTHER_MODELS_LABEL);
            *by_language
                .entry(lang_bucket.to_string())
                .or_default()
                .entry(model_bucket.to_string())
                .or_insert(0) += count;
        }

        // Rows ordered by language total descending, Other last
        let mut ordered: Vec<String> = top_languages
            .iter()
            .filter(|l| by_language.contains_key(*l))
            .cloned()
            .collect();
        if by_language.contains_key(OTHER_LANGUAGES_LABEL) {
            ordered.push(OTHER_LANGUAGES_LABEL.to_string());
        }

        Ok(ordered
            .into_iter()
            .map(|language| {
                let values = by_language.remove(&language).unwrap_or_default();
                LanguageModelRow { language, values }
            })
            .collect())
    }

    /// Per-day language activity, pivoted by language bucket, values in
    /// raw counts.
    pub fn language_usage_per_day(&self, range: &DateRange) -> Result<Vec<PivotRow>> {
        let records = self.records_in(range)?;

        let totals = topk::accumulate(records.iter().flat_map(|rec| {
            rec.totals_by_language_feature
                .iter()
                .map(|lf| (lf.language.clone(), lf.count))
        }));
        let top = topk::top_names(&totals, DEFAULT_TOP_K);

        let mut bucket_names: Vec<String> = top.clone();
        if totals.len() > top.len() {
            bucket_names.push(OTHER_LANGUAGES_LABEL.to_string());
        }

        let mut by_date: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for rec in &records {
            for lf in &rec.totals_by_language_feature {
                let bucket = topk::bucket_for(&lf.language, &top, OTHER_LANGUAGES_LABEL);
                *by_date
                    .entry(rec.day.clone())
                    .or_default()
                    .entry(bucket.to_string())
                    .or_insert(0.0) += lf.count as f64;
            }
        }
        for buckets in by_date.values_mut() {
            for name in &bucket_names {
                buckets.entry(name.clone()).or_insert(0.0);
            }
        }

        Ok(by_date
            .into_iter()
            .map(|(date, values)| PivotRow { date, values })
            .collect())
    }

    /// Model usage per chat mode: each mode's requests split across the
    /// window's top model buckets.
    pub fn model_usage_per_chat_mode(&self, range: &DateRange) -> Result<Vec<ModelModeRow>> {
        let records = self.records_in(range)?;

        let pairs: Vec<(ChatMode, String, i64)> = records
            .iter()
            .flat_map(|rec| {
                rec.totals_by_model_feature.iter().map(|mf| {
                    (
                        ChatMode::from_feature(&mf.feature),
                        mf.model.clone(),
                        mf.interaction_weight(),
                    )
                })
            })
            .collect();

        let model_totals = topk::accumulate(pairs.iter().map(|(_, m, c)| (m.clone(), *c)));
        let top_models = topk::top_names(&model_totals, DEFAULT_TOP_K);

        let mut by_mode: BTreeMap<&'static str, BTreeMap<String, i64>> = BTreeMap::new();
        for (mode, model, count) in &pairs {
            let bucket = topk::bucket_for(model, &top_models, OTHER_MODELS_LABEL);
            *by_mode
                .entry(mode.as_str())
                .or_default()
                .entry(bucket.to_string())
                .or_insert(0) += count;
        }

        // Stacked charts render modes in canonical order
        Ok(ALL_CHAT_MODES
            .iter()
            .filter_map(|mode| {
                by_mode.remove(mode.as_str()).map(|values| ModelModeRow {
                    mode: mode.as_str().to_string(),
                    values,
                })
            })
            .collect())
    }

    // ============================================
    // Path selection helpers
    // ============================================

    fn daily_rows(&self, range: &DateRange) -> Result<Vec<DailyUsageRow>> {
        if self.uses_store()? {
            self.db.daily_usage_between(&range.start, &range.end)
        } else {
            Ok(self
                .scanner
                .daily_usage()?
                .into_iter()
                .filter(|r| range.contains(&r.date))
                .collect())
        }
    }

    fn model_rows(&self, range: &DateRange) -> Result<Vec<ModelUsageRow>> {
        if self.uses_store()? {
            self.db.model_usage_between(&range.start, &range.end)
        } else {
            Ok(self
                .scanner
                .model_usage()?
                .into_iter()
                .filter(|r| range.contains(&r.date))
                .collect())
        }
    }

    fn records_in(&self, range: &DateRange) -> Result<Vec<UsageRecord>> {
        if self.uses_store()? {
            self.db.load_records_between(&range.start, &range.end)
        } else {
            Ok(self
                .scanner
                .records()?
                .into_iter()
                .filter(|r| range.contains(&r.day))
                .collect())
        }
    }
}

fn points<T>(rows: Vec<T>, f: impl Fn(T) -> (String, i64)) -> Vec<ChartPoint> {
    rows.into_iter()
        .map(|r| {
            let (date, value) = f(r);
            ChartPoint { date, value }
        })
        .collect()
}

fn to_distribution(buckets: Vec<NamedCount>) -> Vec<DistributionSlice> {
    let total: i64 = buckets.iter().map(|b| b.count).sum();
    buckets
        .into_iter()
        .map(|b| {
            let percentage = if total > 0 {
                round2(b.count as f64 / total as f64 * 100.0)
            } else {
                0.0
            };
            DistributionSlice {
                name: b.name,
                value: b.count,
                percentage,
            }
        })
        .collect()
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
