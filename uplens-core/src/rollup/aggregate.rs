//! Pure aggregation over detail records
//!
//! Every rollup shape is computed here from an in-memory slice of
//! records. The rollup builder persists these rows; the direct-scan
//! path serves them straight from raw files. Both paths calling the
//! same functions is what makes their outputs interchangeable.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, Weekday};

use crate::types::*;

/// Fractions used to synthesize rollup rows when a breakdown dimension
/// was never ingested. Display placeholders, not business rules; loaded
/// from config in production and normalized to sum to 1.0.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// (model name, share) pairs for the synthetic model distribution.
    pub model_shares: Vec<(String, f64)>,
    /// (mode, share) pairs for the synthetic chat-mode distribution.
    pub mode_shares: Vec<(ChatMode, f64)>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            model_shares: vec![
                ("gpt-4.1".to_string(), 0.45),
                ("claude-sonnet-4".to_string(), 0.25),
                ("gemini-2.5-pro".to_string(), 0.20),
                ("o4-mini".to_string(), 0.10),
            ],
            mode_shares: vec![
                (ChatMode::Inline, 0.40),
                (ChatMode::Ask, 0.30),
                (ChatMode::Agent, 0.15),
                (ChatMode::Edit, 0.10),
                (ChatMode::Custom, 0.05),
            ],
        }
    }
}

impl FallbackPolicy {
    /// Scale shares so they sum to 1.0. Zero or negative totals keep
    /// the defaults instead.
    pub fn normalized(mut self) -> Self {
        let model_total: f64 = self.model_shares.iter().map(|(_, s)| s).sum();
        if model_total > 0.0 {
            for (_, s) in self.model_shares.iter_mut() {
                *s /= model_total;
            }
        } else {
            self.model_shares = Self::default().model_shares;
        }

        let mode_total: f64 = self.mode_shares.iter().map(|(_, s)| s).sum();
        if mode_total > 0.0 {
            for (_, s) in self.mode_shares.iter_mut() {
                *s /= mode_total;
            }
        } else {
            self.mode_shares = Self::default().mode_shares;
        }

        self
    }
}

#[derive(Debug, Default, Clone)]
struct DayTotals {
    users: i64,
    suggestions: i64,
    accepted: i64,
    interactions: i64,
    agent_interactions: i64,
    agent_users: i64,
    chat_users: i64,
}

fn totals_by_day(records: &[UsageRecord]) -> BTreeMap<String, DayTotals> {
    let mut days: BTreeMap<String, DayTotals> = BTreeMap::new();
    for rec in records {
        let t = days.entry(rec.day.clone()).or_default();
        // One record per (user, day): the store keys on the pair and the
        // scanner merges duplicates before aggregating
        t.users += 1;
        t.suggestions += rec.code_generation_activity_count;
        t.accepted += rec.code_acceptance_activity_count;
        t.interactions += rec.user_initiated_interaction_count;
        if rec.used_agent {
            t.agent_interactions += rec.user_initiated_interaction_count;
            t.agent_users += 1;
        }
        if rec.used_chat {
            t.chat_users += 1;
        }
    }
    days
}

/// Daily usage rollup: one row per day, ascending.
pub fn daily_usage_rows(records: &[UsageRecord]) -> Vec<DailyUsageRow> {
    totals_by_day(records)
        .into_iter()
        .map(|(date, t)| DailyUsageRow {
            date,
            active_users: t.users,
            total_suggestions: t.suggestions,
            accepted_suggestions: t.accepted,
            chat_requests: t.interactions,
            agent_requests: t.agent_interactions,
        })
        .collect()
}

/// Weekly usage rollup, grouped by the Monday-aligned week containing
/// each day. Active users are distinct across the week, not summed from
/// daily counts. Days that fail to parse as ISO dates are skipped.
pub fn weekly_usage_rows(records: &[UsageRecord]) -> Vec<WeeklyUsageRow> {
    #[derive(Default)]
    struct WeekTotals {
        users: std::collections::HashSet<i64>,
        suggestions: i64,
        accepted: i64,
        interactions: i64,
        agent_interactions: i64,
    }

    let mut weeks: BTreeMap<String, WeekTotals> = BTreeMap::new();
    for rec in records {
        let date = match NaiveDate::parse_from_str(&rec.day, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                tracing::warn!(day = %rec.day, "Skipping record with unparseable day");
                continue;
            }
        };
        let week_start = date.week(Weekday::Mon).first_day().to_string();
        let t = weeks.entry(week_start).or_default();
        t.users.insert(rec.user_id);
        t.suggestions += rec.code_generation_activity_count;
        t.accepted += rec.code_acceptance_activity_count;
        t.interactions += rec.user_initiated_interaction_count;
        if rec.used_agent {
            t.agent_interactions += rec.user_initiated_interaction_count;
        }
    }

    weeks
        .into_iter()
        .map(|(week_start, t)| WeeklyUsageRow {
            week_start,
            active_users: t.users.len() as i64,
            total_suggestions: t.suggestions,
            accepted_suggestions: t.accepted,
            chat_requests: t.interactions,
            agent_requests: t.agent_interactions,
        })
        .collect()
}

/// Agent adoption rollup: distinct users vs distinct agent users per day.
pub fn agent_adoption_rows(records: &[UsageRecord]) -> Vec<AgentAdoptionRow> {
    totals_by_day(records)
        .into_iter()
        .map(|(date, t)| AgentAdoptionRow {
            date,
            total_active_users: t.users,
            agent_users: t.agent_users,
        })
        .collect()
}

/// Model usage rollup.
///
/// Measured when any record carries a by-(model, feature) breakdown:
/// sums child counts grouped by (day, model). Otherwise synthesizes a
/// deterministic distribution by splitting each day's interaction total
/// across the policy's named models, tagged [`RollupSource::Synthetic`].
pub fn model_usage_rows(records: &[UsageRecord], policy: &FallbackPolicy) -> Vec<ModelUsageRow> {
    let has_measured = records.iter().any(|r| !r.totals_by_model_feature.is_empty());

    if has_measured {
        let mut by_day_model: BTreeMap<(String, String), i64> = BTreeMap::new();
        for rec in records {
            for mf in &rec.totals_by_model_feature {
                *by_day_model
                    .entry((rec.day.clone(), mf.model.clone()))
                    .or_insert(0) += mf.count;
            }
        }
        return by_day_model
            .into_iter()
            .map(|((date, model_name), requests)| ModelUsageRow {
                date,
                model_name,
                requests,
                source: RollupSource::Measured,
            })
            .collect();
    }

    let mut rows = Vec::new();
    for (date, t) in totals_by_day(records) {
        if t.interactions == 0 {
            continue;
        }
        let named: Vec<(String, f64)> = policy.model_shares.clone();
        for (name, amount) in allocate(t.interactions, &named) {
            rows.push(ModelUsageRow {
                date: date.clone(),
                model_name: name,
                requests: amount,
                source: RollupSource::Synthetic,
            });
        }
    }
    // Canonical (date, model) ordering, same as the stored rollup reads
    rows.sort_by(|a, b| (&a.date, &a.model_name).cmp(&(&b.date, &b.model_name)));
    rows
}

/// Chat-mode rollup.
///
/// Measured when any record carries a by-feature breakdown: each
/// feature maps onto a canonical mode and interaction counts sum per
/// (day, mode). Otherwise synthesizes per-day mode splits from the
/// policy shares, reweighted by what the day's users actually touched:
/// a day with no agent users folds the agent share into ask, and a day
/// with no chat users folds the ask share into inline.
pub fn chat_mode_rows(records: &[UsageRecord], policy: &FallbackPolicy) -> Vec<ChatModeRow> {
    let has_measured = records.iter().any(|r| !r.totals_by_feature.is_empty());

    if has_measured {
        let mut by_day_mode: BTreeMap<String, HashMap<ChatMode, i64>> = BTreeMap::new();
        for rec in records {
            for fb in &rec.totals_by_feature {
                let mode = ChatMode::from_feature(&fb.feature);
                *by_day_mode
                    .entry(rec.day.clone())
                    .or_default()
                    .entry(mode)
                    .or_insert(0) += fb.user_initiated_interaction_count;
            }
        }
        let mut rows = Vec::new();
        for (date, modes) in by_day_mode {
            for mode in ALL_CHAT_MODES {
                if let Some(&requests) = modes.get(&mode) {
                    rows.push(ChatModeRow {
                        date: date.clone(),
                        mode,
                        requests,
                        source: RollupSource::Measured,
                    });
                }
            }
        }
        sort_mode_rows(&mut rows);
        return rows;
    }

    let mut rows = Vec::new();
    for (date, t) in totals_by_day(records) {
        if t.interactions == 0 {
            continue;
        }

        let mut shares: HashMap<ChatMode, f64> = policy.mode_shares.iter().cloned().collect();
        if t.agent_users == 0 {
            let moved = shares.remove(&ChatMode::Agent).unwrap_or(0.0);
            *shares.entry(ChatMode::Ask).or_insert(0.0) += moved;
        }
        if t.chat_users == 0 {
            let moved = shares.remove(&ChatMode::Ask).unwrap_or(0.0);
            *shares.entry(ChatMode::Inline).or_insert(0.0) += moved;
        }

        // Keep the policy's declared ordering for determinism
        let ordered: Vec<(String, f64)> = policy
            .mode_shares
            .iter()
            .filter_map(|(mode, _)| {
                shares
                    .get(mode)
                    .filter(|s| **s > 0.0)
                    .map(|s| (mode.as_str().to_string(), *s))
            })
            .collect();

        for (name, amount) in allocate(t.interactions, &ordered) {
            if amount == 0 {
                continue;
            }
            // Names came from ChatMode::as_str, parse cannot fail
            let mode: ChatMode = name.parse().unwrap_or(ChatMode::Custom);
            rows.push(ChatModeRow {
                date: date.clone(),
                mode,
                requests: amount,
                source: RollupSource::Synthetic,
            });
        }
    }
    sort_mode_rows(&mut rows);
    rows
}

// Canonical (date, mode-name) ordering, same as the stored rollup reads
fn sort_mode_rows(rows: &mut [ChatModeRow]) {
    rows.sort_by(|a, b| (&a.date, a.mode.as_str()).cmp(&(&b.date, b.mode.as_str())));
}

/// Split `total` across weighted names so the pieces sum exactly to
/// `total`: every name but the last gets the floor of its share, the
/// last absorbs the remainder.
fn allocate(total: i64, shares: &[(String, f64)]) -> Vec<(String, i64)> {
    if shares.is_empty() {
        return Vec::new();
    }

    let weight_sum: f64 = shares.iter().map(|(_, s)| s).sum();
    if weight_sum <= 0.0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(shares.len());
    let mut allocated: i64 = 0;
    for (i, (name, share)) in shares.iter().enumerate() {
        let amount = if i == shares.len() - 1 {
            total - allocated
        } else {
            ((total as f64) * (share / weight_sum)).floor() as i64
        };
        allocated += amount;
        out.push((name.clone(), amount));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(user_id: i64, day: &str) -> UsageRecord {
        serde_json::from_str(&format!(
            r#"{{"user_id": {}, "day": "{}"}}"#,
            user_id, day
        ))
        .unwrap()
    }

    #[test]
    fn test_daily_rows_group_and_sum() {
        let mut a = rec(1, "2024-01-01");
        a.code_generation_activity_count = 10;
        a.code_acceptance_activity_count = 4;
        a.user_initiated_interaction_count = 6;
        a.used_agent = true;
        let mut b = rec(2, "2024-01-01");
        b.code_generation_activity_count = 5;
        b.user_initiated_interaction_count = 2;
        let c = rec(1, "2024-01-02");

        let rows = daily_usage_rows(&[a, b, c]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "2024-01-01");
        assert_eq!(rows[0].active_users, 2);
        assert_eq!(rows[0].total_suggestions, 15);
        assert_eq!(rows[0].accepted_suggestions, 4);
        assert_eq!(rows[0].chat_requests, 8);
        assert_eq!(rows[0].agent_requests, 6);
        assert_eq!(rows[1].date, "2024-01-02");
        assert_eq!(rows[1].active_users, 1);
    }

    #[test]
    fn test_weekly_rows_monday_aligned_distinct_users() {
        // 2024-01-03 is a Wednesday, 2024-01-08 the following Monday
        let mut a = rec(1, "2024-01-03");
        a.code_generation_activity_count = 3;
        let b = rec(1, "2024-01-05");
        let c = rec(2, "2024-01-08");

        let rows = weekly_usage_rows(&[a, b, c]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].week_start, "2024-01-01");
        assert_eq!(rows[0].active_users, 1); // same user twice in week one
        assert_eq!(rows[0].total_suggestions, 3);
        assert_eq!(rows[1].week_start, "2024-01-08");
        assert_eq!(rows[1].active_users, 1);
    }

    #[test]
    fn test_agent_adoption_counts_distinct_agent_users() {
        let mut a = rec(1, "2024-01-01");
        a.used_agent = true;
        let b = rec(2, "2024-01-01");
        let rows = agent_adoption_rows(&[a, b]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_active_users, 2);
        assert_eq!(rows[0].agent_users, 1);
    }

    #[test]
    fn test_model_usage_measured_path() {
        let mut a = rec(1, "2024-01-01");
        a.totals_by_model_feature = vec![
            ModelFeatureBreakdown {
                model: "gpt-4.1".into(),
                feature: "chat".into(),
                count: 7,
                user_initiated_interaction_count: 0,
                code_generation_activity_count: 0,
            },
            ModelFeatureBreakdown {
                model: "gpt-4.1".into(),
                feature: "edit".into(),
                count: 3,
                user_initiated_interaction_count: 0,
                code_generation_activity_count: 0,
            },
        ];
        let mut b = rec(2, "2024-01-01");
        b.user_initiated_interaction_count = 100; // must not leak into measured path

        let rows = model_usage_rows(&[a, b], &FallbackPolicy::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_name, "gpt-4.1");
        assert_eq!(rows[0].requests, 10);
        assert_eq!(rows[0].source, RollupSource::Measured);
    }

    #[test]
    fn test_model_usage_synthetic_fallback_sums_exactly() {
        let mut a = rec(1, "2024-01-01");
        a.user_initiated_interaction_count = 103;

        let rows = model_usage_rows(&[a], &FallbackPolicy::default());
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.source == RollupSource::Synthetic));
        let total: i64 = rows.iter().map(|r| r.requests).sum();
        assert_eq!(total, 103);
    }

    #[test]
    fn test_model_usage_fallback_skips_zero_days() {
        let a = rec(1, "2024-01-01"); // zero interactions
        let rows = model_usage_rows(&[a], &FallbackPolicy::default());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_chat_mode_measured_path_maps_features() {
        let mut a = rec(1, "2024-01-01");
        a.totals_by_feature = vec![
            FeatureBreakdown {
                feature: "code_completion".into(),
                user_initiated_interaction_count: 50,
                code_generation_activity_count: 0,
                code_acceptance_activity_count: 0,
            },
            FeatureBreakdown {
                feature: "chat_panel_ask_mode".into(),
                user_initiated_interaction_count: 20,
                code_generation_activity_count: 0,
                code_acceptance_activity_count: 0,
            },
            FeatureBreakdown {
                feature: "mystery_feature".into(),
                user_initiated_interaction_count: 5,
                code_generation_activity_count: 0,
                code_acceptance_activity_count: 0,
            },
        ];

        let rows = chat_mode_rows(&[a], &FallbackPolicy::default());
        assert!(rows.iter().all(|r| r.source == RollupSource::Measured));

        let inline = rows.iter().find(|r| r.mode == ChatMode::Inline).unwrap();
        assert_eq!(inline.requests, 50);
        let ask = rows.iter().find(|r| r.mode == ChatMode::Ask).unwrap();
        assert_eq!(ask.requests, 20);
        let custom = rows.iter().find(|r| r.mode == ChatMode::Custom).unwrap();
        assert_eq!(custom.requests, 5);
    }

    #[test]
    fn test_chat_mode_fallback_reweights_by_flags() {
        // No agent or chat usage: agent share folds into ask, ask into inline
        let mut a = rec(1, "2024-01-01");
        a.user_initiated_interaction_count = 100;

        let rows = chat_mode_rows(&[a], &FallbackPolicy::default());
        assert!(rows.iter().all(|r| r.source == RollupSource::Synthetic));
        assert!(rows.iter().all(|r| r.mode != ChatMode::Agent));
        assert!(rows.iter().all(|r| r.mode != ChatMode::Ask));
        let total: i64 = rows.iter().map(|r| r.requests).sum();
        assert_eq!(total, 100);

        // With an agent user the agent mode appears
        let mut b = rec(1, "2024-01-01");
        b.user_initiated_interaction_count = 100;
        b.used_agent = true;
        b.used_chat = true;
        let rows = chat_mode_rows(&[b], &FallbackPolicy::default());
        assert!(rows.iter().any(|r| r.mode == ChatMode::Agent));
        assert!(rows.iter().any(|r| r.mode == ChatMode::Ask));
        let total: i64 = rows.iter().map(|r| r.requests).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_allocate_exact_sum() {
        let shares = vec![
            ("a".to_string(), 0.45),
            ("b".to_string(), 0.25),
            ("c".to_string(), 0.20),
            ("d".to_string(), 0.10),
        ];
        let parts = allocate(997, &shares);
        let total: i64 = parts.iter().map(|(_, n)| n).sum();
        assert_eq!(total, 997);
        assert_eq!(parts[0].0, "a");
        assert!(parts[0].1 >= parts[1].1);
    }

    #[test]
    fn test_policy_normalized() {
        let policy = FallbackPolicy {
            model_shares: vec![("x".into(), 2.0), ("y".into(), 2.0)],
            mode_shares: vec![(ChatMode::Inline, 3.0)],
        }
        .normalized();
        assert!((policy.model_shares[0].1 - 0.5).abs() < 1e-9);
        assert!((policy.mode_shares[0].1 - 1.0).abs() < 1e-9);
    }
}
