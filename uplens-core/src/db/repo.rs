//! Database repository layer
//!
//! Provides the detail-record upsert path used by ingestion, bulk
//! loaders used by the rollup builder, and wholesale rollup writers.

use crate::error::{Error, Result};
use crate::types::*;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

/// Outcome of a single detail-record upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Row counts per table, for status displays.
#[derive(Debug, Clone, Default)]
pub struct StoreCounts {
    pub details: i64,
    pub daily_usage: i64,
    pub weekly_usage: i64,
    pub chat_mode_requests: i64,
    pub model_usage: i64,
    pub agent_adoption: i64,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Detail record operations
    // ============================================

    /// Insert or update a detail record keyed on (user_id, day).
    ///
    /// On update the scalar columns are overwritten and every breakdown
    /// child set is deleted and reinserted from the incoming record, so
    /// stale children can never survive a re-ingest. The whole upsert
    /// runs in one transaction.
    pub fn upsert_record(&self, record: &UsageRecord) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM usage_details WHERE user_id = ?1 AND day = ?2",
                params![record.user_id, record.day],
                |r| r.get(0),
            )
            .optional()?;

        let (usage_id, outcome) = match existing_id {
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE usage_details SET
                        report_start_day = ?1,
                        report_end_day = ?2,
                        enterprise_id = ?3,
                        user_login = ?4,
                        user_initiated_interaction_count = ?5,
                        code_generation_activity_count = ?6,
                        code_acceptance_activity_count = ?7,
                        used_agent = ?8,
                        used_chat = ?9,
                        loc_suggested_to_add_sum = ?10,
                        loc_suggested_to_delete_sum = ?11,
                        loc_added_sum = ?12,
                        loc_deleted_sum = ?13,
                        primary_ide = ?14,
                        primary_ide_version = ?15,
                        primary_plugin_version = ?16
                    WHERE id = ?17
                    "#,
                    params![
                        record.report_start_day,
                        record.report_end_day,
                        record.enterprise_id,
                        record.user_login,
                        record.user_initiated_interaction_count,
                        record.code_generation_activity_count,
                        record.code_acceptance_activity_count,
                        record.used_agent as i64,
                        record.used_chat as i64,
                        record.loc_suggested_to_add_sum,
                        record.loc_suggested_to_delete_sum,
                        record.loc_added_sum,
                        record.loc_deleted_sum,
                        record.primary_ide,
                        record.primary_ide_version,
                        record.primary_plugin_version,
                        id,
                    ],
                )?;
                Self::delete_children(&tx, id)?;
                (id, UpsertOutcome::Updated)
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO usage_details (
                        report_start_day, report_end_day, day, enterprise_id,
                        user_id, user_login,
                        user_initiated_interaction_count,
                        code_generation_activity_count,
                        code_acceptance_activity_count,
                        used_agent, used_chat,
                        loc_suggested_to_add_sum, loc_suggested_to_delete_sum,
                        loc_added_sum, loc_deleted_sum,
                        primary_ide, primary_ide_version, primary_plugin_version
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                    "#,
                    params![
                        record.report_start_day,
                        record.report_end_day,
                        record.day,
                        record.enterprise_id,
                        record.user_id,
                        record.user_login,
                        record.user_initiated_interaction_count,
                        record.code_generation_activity_count,
                        record.code_acceptance_activity_count,
                        record.used_agent as i64,
                        record.used_chat as i64,
                        record.loc_suggested_to_add_sum,
                        record.loc_suggested_to_delete_sum,
                        record.loc_added_sum,
                        record.loc_deleted_sum,
                        record.primary_ide,
                        record.primary_ide_version,
                        record.primary_plugin_version,
                    ],
                )?;
                (tx.last_insert_rowid(), UpsertOutcome::Inserted)
            }
        };

        Self::insert_children(&tx, usage_id, record)?;

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_children(tx: &Transaction, usage_id: i64) -> Result<()> {
        for table in [
            "usage_by_ide",
            "usage_by_feature",
            "usage_by_language_feature",
            "usage_by_language_model",
            "usage_by_model_feature",
        ] {
            tx.execute(
                &format!("DELETE FROM {} WHERE usage_id = ?1", table),
                [usage_id],
            )?;
        }
        Ok(())
    }

    fn insert_children(tx: &Transaction, usage_id: i64, record: &UsageRecord) -> Result<()> {
        for b in &record.totals_by_ide {
            tx.execute(
                r#"
                INSERT INTO usage_by_ide (usage_id, ide, code_gen_count, acceptance_count, loc_suggested, loc_added)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    usage_id,
                    b.ide,
                    b.code_generation_activity_count,
                    b.code_acceptance_activity_count,
                    b.loc_suggested_to_add_sum,
                    b.loc_added_sum,
                ],
            )?;
        }

        for b in &record.totals_by_feature {
            tx.execute(
                r#"
                INSERT INTO usage_by_feature (usage_id, feature, interaction_count, code_gen_count, acceptance_count)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    usage_id,
                    b.feature,
                    b.user_initiated_interaction_count,
                    b.code_generation_activity_count,
                    b.code_acceptance_activity_count,
                ],
            )?;
        }

        for b in &record.totals_by_language_feature {
            tx.execute(
                "INSERT INTO usage_by_language_feature (usage_id, language, feature, count) VALUES (?1, ?2, ?3, ?4)",
                params![usage_id, b.language, b.feature, b.count],
            )?;
        }

        for b in &record.totals_by_language_model {
            tx.execute(
                "INSERT INTO usage_by_language_model (usage_id, language, model, count) VALUES (?1, ?2, ?3, ?4)",
                params![usage_id, b.language, b.model, b.effective_count()],
            )?;
        }

        for b in &record.totals_by_model_feature {
            tx.execute(
                r#"
                INSERT INTO usage_by_model_feature (usage_id, model, feature, count, interaction_count)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    usage_id,
                    b.model,
                    b.feature,
                    b.count,
                    b.interaction_weight(),
                ],
            )?;
        }

        Ok(())
    }

    /// Load every detail record with its breakdown children.
    pub fn load_all_records(&self) -> Result<Vec<UsageRecord>> {
        self.load_records_where("", &[])
    }

    /// Load detail records whose day falls in `[start, end]` (inclusive,
    /// ISO strings compare lexicographically).
    pub fn load_records_between(&self, start: &str, end: &str) -> Result<Vec<UsageRecord>> {
        self.load_records_where(
            "WHERE day >= ?1 AND day <= ?2",
            &[&start as &dyn rusqlite::ToSql, &end as &dyn rusqlite::ToSql],
        )
    }

    fn load_records_where(
        &self,
        clause: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<UsageRecord>> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT * FROM usage_details {} ORDER BY day ASC, user_id ASC",
            clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows: Vec<(i64, UsageRecord)> = stmt
            .query_map(bind, |row| {
                let id: i64 = row.get("id")?;
                Ok((id, Self::row_to_record(row)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        for (id, record) in rows.iter_mut() {
            Self::load_children(&conn, *id, record)?;
        }

        Ok(rows.into_iter().map(|(_, r)| r).collect())
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<UsageRecord> {
        let used_agent: i64 = row.get("used_agent")?;
        let used_chat: i64 = row.get("used_chat")?;
        Ok(UsageRecord {
            report_start_day: row.get("report_start_day")?,
            report_end_day: row.get("report_end_day")?,
            day: row.get("day")?,
            enterprise_id: row.get("enterprise_id")?,
            user_id: row.get("user_id")?,
            user_login: row.get("user_login")?,
            user_initiated_interaction_count: row.get("user_initiated_interaction_count")?,
            code_generation_activity_count: row.get("code_generation_activity_count")?,
            code_acceptance_activity_count: row.get("code_acceptance_activity_count")?,
            used_agent: used_agent != 0,
            used_chat: used_chat != 0,
            loc_suggested_to_add_sum: row.get("loc_suggested_to_add_sum")?,
            loc_suggested_to_delete_sum: row.get("loc_suggested_to_delete_sum")?,
            loc_added_sum: row.get("loc_added_sum")?,
            loc_deleted_sum: row.get("loc_deleted_sum")?,
            primary_ide: row.get("primary_ide")?,
            primary_ide_version: row.get("primary_ide_version")?,
            primary_plugin_version: row.get("primary_plugin_version")?,
            totals_by_ide: Vec::new(),
            totals_by_feature: Vec::new(),
            totals_by_language_feature: Vec::new(),
            totals_by_language_model: Vec::new(),
            totals_by_model_feature: Vec::new(),
        })
    }

    fn load_children(conn: &Connection, usage_id: i64, record: &mut UsageRecord) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT ide, code_gen_count, acceptance_count, loc_suggested, loc_added
             FROM usage_by_ide WHERE usage_id = ?1 ORDER BY id ASC",
        )?;
        record.totals_by_ide = stmt
            .query_map([usage_id], |row| {
                Ok(IdeBreakdown {
                    ide: row.get(0)?,
                    code_generation_activity_count: row.get(1)?,
                    code_acceptance_activity_count: row.get(2)?,
                    loc_suggested_to_add_sum: row.get(3)?,
                    loc_added_sum: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT feature, interaction_count, code_gen_count, acceptance_count
             FROM usage_by_feature WHERE usage_id = ?1 ORDER BY id ASC",
        )?;
        record.totals_by_feature = stmt
            .query_map([usage_id], |row| {
                Ok(FeatureBreakdown {
                    feature: row.get(0)?,
                    user_initiated_interaction_count: row.get(1)?,
                    code_generation_activity_count: row.get(2)?,
                    code_acceptance_activity_count: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT language, feature, count
             FROM usage_by_language_feature WHERE usage_id = ?1 ORDER BY id ASC",
        )?;
        record.totals_by_language_feature = stmt
            .query_map([usage_id], |row| {
                Ok(LanguageFeatureBreakdown {
                    language: row.get(0)?,
                    feature: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT language, model, count
             FROM usage_by_language_model WHERE usage_id = ?1 ORDER BY id ASC",
        )?;
        record.totals_by_language_model = stmt
            .query_map([usage_id], |row| {
                Ok(LanguageModelBreakdown {
                    language: row.get(0)?,
                    model: row.get(1)?,
                    count: row.get(2)?,
                    code_generation_activity_count: 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut stmt = conn.prepare(
            "SELECT model, feature, count, interaction_count
             FROM usage_by_model_feature WHERE usage_id = ?1 ORDER BY id ASC",
        )?;
        record.totals_by_model_feature = stmt
            .query_map([usage_id], |row| {
                Ok(ModelFeatureBreakdown {
                    model: row.get(0)?,
                    feature: row.get(1)?,
                    count: row.get(2)?,
                    user_initiated_interaction_count: row.get(3)?,
                    code_generation_activity_count: 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        Ok(())
    }

    /// Number of detail records in the store.
    pub fn detail_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM usage_details", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Distinct days present in the store, ascending.
    pub fn distinct_days(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT day FROM usage_details ORDER BY day ASC")?;
        let days = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(days)
    }

    // ============================================
    // Rollup writers (wholesale replace, one tx per table)
    // ============================================

    /// Replace the daily usage rollup with the given rows.
    pub fn replace_daily_usage(&self, rows: &[DailyUsageRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM daily_usage", [])?;
        for row in rows {
            tx.execute(
                r#"
                INSERT INTO daily_usage (date, active_users, total_suggestions, accepted_suggestions, chat_requests, agent_requests)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    row.date,
                    row.active_users,
                    row.total_suggestions,
                    row.accepted_suggestions,
                    row.chat_requests,
                    row.agent_requests,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the weekly usage rollup with the given rows.
    pub fn replace_weekly_usage(&self, rows: &[WeeklyUsageRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM weekly_usage", [])?;
        for row in rows {
            tx.execute(
                r#"
                INSERT INTO weekly_usage (week_start, active_users, total_suggestions, accepted_suggestions, chat_requests, agent_requests)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    row.week_start,
                    row.active_users,
                    row.total_suggestions,
                    row.accepted_suggestions,
                    row.chat_requests,
                    row.agent_requests,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the chat-mode rollup with the given rows.
    pub fn replace_chat_mode_requests(&self, rows: &[ChatModeRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chat_mode_requests", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO chat_mode_requests (date, mode, requests, source) VALUES (?1, ?2, ?3, ?4)",
                params![row.date, row.mode.as_str(), row.requests, row.source.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the model usage rollup with the given rows.
    pub fn replace_model_usage(&self, rows: &[ModelUsageRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM model_usage", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO model_usage (date, model_name, requests, source) VALUES (?1, ?2, ?3, ?4)",
                params![row.date, row.model_name, row.requests, row.source.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace the agent adoption rollup with the given rows.
    pub fn replace_agent_adoption(&self, rows: &[AgentAdoptionRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM agent_adoption", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO agent_adoption (date, total_active_users, agent_users) VALUES (?1, ?2, ?3)",
                params![row.date, row.total_active_users, row.agent_users],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ============================================
    // Rollup readers
    // ============================================

    /// Daily usage rows in `[start, end]`, ascending by date.
    pub fn daily_usage_between(&self, start: &str, end: &str) -> Result<Vec<DailyUsageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, active_users, total_suggestions, accepted_suggestions, chat_requests, agent_requests
             FROM daily_usage WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(DailyUsageRow {
                    date: row.get(0)?,
                    active_users: row.get(1)?,
                    total_suggestions: row.get(2)?,
                    accepted_suggestions: row.get(3)?,
                    chat_requests: row.get(4)?,
                    agent_requests: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Weekly usage rows with week_start in `[start, end]`, ascending.
    pub fn weekly_usage_between(&self, start: &str, end: &str) -> Result<Vec<WeeklyUsageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT week_start, active_users, total_suggestions, accepted_suggestions, chat_requests, agent_requests
             FROM weekly_usage WHERE week_start >= ?1 AND week_start <= ?2 ORDER BY week_start ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(WeeklyUsageRow {
                    week_start: row.get(0)?,
                    active_users: row.get(1)?,
                    total_suggestions: row.get(2)?,
                    accepted_suggestions: row.get(3)?,
                    chat_requests: row.get(4)?,
                    agent_requests: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Chat-mode rows in `[start, end]`, ascending by date then mode.
    pub fn chat_mode_requests_between(&self, start: &str, end: &str) -> Result<Vec<ChatModeRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, mode, requests, source FROM chat_mode_requests
             WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC, mode ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                let mode: String = row.get(1)?;
                let source: String = row.get(3)?;
                Ok(ChatModeRow {
                    date: row.get(0)?,
                    mode: ChatMode::from_str(&mode).unwrap_or(ChatMode::Custom),
                    requests: row.get(2)?,
                    source: RollupSource::from_str(&source).unwrap_or(RollupSource::Measured),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Model usage rows in `[start, end]`, ascending by date then model.
    pub fn model_usage_between(&self, start: &str, end: &str) -> Result<Vec<ModelUsageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, model_name, requests, source FROM model_usage
             WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC, model_name ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                let source: String = row.get(3)?;
                Ok(ModelUsageRow {
                    date: row.get(0)?,
                    model_name: row.get(1)?,
                    requests: row.get(2)?,
                    source: RollupSource::from_str(&source).unwrap_or(RollupSource::Measured),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Agent adoption rows in `[start, end]`, ascending by date.
    pub fn agent_adoption_between(&self, start: &str, end: &str) -> Result<Vec<AgentAdoptionRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, total_active_users, agent_users FROM agent_adoption
             WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                Ok(AgentAdoptionRow {
                    date: row.get(0)?,
                    total_active_users: row.get(1)?,
                    agent_users: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Row counts for status displays.
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .map_err(Error::from)
        };
        Ok(StoreCounts {
            details: count("usage_details")?,
            daily_usage: count("daily_usage")?,
            weekly_usage: count("weekly_usage")?,
            chat_mode_requests: count("chat_mode_requests")?,
            model_usage: count("model_usage")?,
            agent_adoption: count("agent_adoption")?,
        })
    }

    /// Delete everything: detail records, children, and all rollups.
    pub fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for table in [
            "usage_by_ide",
            "usage_by_feature",
            "usage_by_language_feature",
            "usage_by_language_model",
            "usage_by_model_feature",
            "usage_details",
            "daily_usage",
            "weekly_usage",
            "chat_mode_requests",
            "model_usage",
            "agent_adoption",
        ] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}
