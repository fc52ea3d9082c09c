//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: detail table, breakdown children, rollup tables
    r#"
    -- ============================================
    -- LAYER 1: Canonical detail records
    -- ============================================

    -- One row per (user, day); re-ingesting the same key updates in place
    CREATE TABLE IF NOT EXISTS usage_details (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        report_start_day  TEXT NOT NULL DEFAULT '',
        report_end_day    TEXT NOT NULL DEFAULT '',
        day               TEXT NOT NULL,
        enterprise_id     TEXT NOT NULL DEFAULT '',
        user_id           INTEGER NOT NULL,
        user_login        TEXT NOT NULL DEFAULT '',

        user_initiated_interaction_count INTEGER NOT NULL DEFAULT 0,
        code_generation_activity_count   INTEGER NOT NULL DEFAULT 0,
        code_acceptance_activity_count   INTEGER NOT NULL DEFAULT 0,
        used_agent        INTEGER NOT NULL DEFAULT 0,
        used_chat         INTEGER NOT NULL DEFAULT 0,

        loc_suggested_to_add_sum    INTEGER NOT NULL DEFAULT 0,
        loc_suggested_to_delete_sum INTEGER NOT NULL DEFAULT 0,
        loc_added_sum               INTEGER NOT NULL DEFAULT 0,
        loc_deleted_sum             INTEGER NOT NULL DEFAULT 0,

        primary_ide            TEXT,
        primary_ide_version    TEXT,
        primary_plugin_version TEXT,

        created_at        TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

        UNIQUE(user_id, day)
    );

    -- Breakdown children: owned by exactly one detail row, replaced
    -- wholesale on update, never partially patched
    CREATE TABLE IF NOT EXISTS usage_by_ide (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        usage_id         INTEGER NOT NULL REFERENCES usage_details(id) ON DELETE CASCADE,
        ide              TEXT NOT NULL,
        code_gen_count   INTEGER NOT NULL DEFAULT 0,
        acceptance_count INTEGER NOT NULL DEFAULT 0,
        loc_suggested    INTEGER NOT NULL DEFAULT 0,
        loc_added        INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage_by_feature (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        usage_id          INTEGER NOT NULL REFERENCES usage_details(id) ON DELETE CASCADE,
        feature           TEXT NOT NULL,
        interaction_count INTEGER NOT NULL DEFAULT 0,
        code_gen_count    INTEGER NOT NULL DEFAULT 0,
        acceptance_count  INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage_by_language_feature (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        usage_id         INTEGER NOT NULL REFERENCES usage_details(id) ON DELETE CASCADE,
        language         TEXT NOT NULL,
        feature          TEXT NOT NULL,
        count            INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage_by_language_model (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        usage_id         INTEGER NOT NULL REFERENCES usage_details(id) ON DELETE CASCADE,
        language         TEXT NOT NULL,
        model            TEXT NOT NULL,
        count            INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS usage_by_model_feature (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        usage_id          INTEGER NOT NULL REFERENCES usage_details(id) ON DELETE CASCADE,
        model             TEXT NOT NULL,
        feature           TEXT NOT NULL,
        count             INTEGER NOT NULL DEFAULT 0,
        interaction_count INTEGER NOT NULL DEFAULT 0
    );

    -- ============================================
    -- LAYER 2: Derived rollups (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS daily_usage (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        date                 TEXT NOT NULL UNIQUE,
        active_users         INTEGER NOT NULL DEFAULT 0,
        total_suggestions    INTEGER NOT NULL DEFAULT 0,
        accepted_suggestions INTEGER NOT NULL DEFAULT 0,
        chat_requests        INTEGER NOT NULL DEFAULT 0,
        agent_requests       INTEGER NOT NULL DEFAULT 0,
        created_at           TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS weekly_usage (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        week_start           TEXT NOT NULL UNIQUE,
        active_users         INTEGER NOT NULL DEFAULT 0,
        total_suggestions    INTEGER NOT NULL DEFAULT 0,
        accepted_suggestions INTEGER NOT NULL DEFAULT 0,
        chat_requests        INTEGER NOT NULL DEFAULT 0,
        agent_requests       INTEGER NOT NULL DEFAULT 0,
        created_at           TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS chat_mode_requests (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        date             TEXT NOT NULL,
        mode             TEXT NOT NULL CHECK(mode IN ('edit', 'ask', 'agent', 'custom', 'inline')),
        requests         INTEGER NOT NULL DEFAULT 0,
        source           TEXT NOT NULL DEFAULT 'measured' CHECK(source IN ('measured', 'synthetic')),
        created_at       TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(date, mode)
    );

    CREATE TABLE IF NOT EXISTS model_usage (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        date             TEXT NOT NULL,
        model_name       TEXT NOT NULL,
        requests         INTEGER NOT NULL DEFAULT 0,
        source           TEXT NOT NULL DEFAULT 'measured' CHECK(source IN ('measured', 'synthetic')),
        created_at       TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(date, model_name)
    );

    CREATE TABLE IF NOT EXISTS agent_adoption (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        date               TEXT NOT NULL UNIQUE,
        total_active_users INTEGER NOT NULL DEFAULT 0,
        agent_users        INTEGER NOT NULL DEFAULT 0,
        created_at         TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_usage_details_day ON usage_details(day);
    CREATE INDEX IF NOT EXISTS idx_usage_details_user ON usage_details(user_id);
    CREATE INDEX IF NOT EXISTS idx_usage_by_ide_usage ON usage_by_ide(usage_id);
    CREATE INDEX IF NOT EXISTS idx_usage_by_feature_usage ON usage_by_feature(usage_id);
    CREATE INDEX IF NOT EXISTS idx_usage_by_language_feature_usage ON usage_by_language_feature(usage_id);
    CREATE INDEX IF NOT EXISTS idx_usage_by_language_model_usage ON usage_by_language_model(usage_id);
    CREATE INDEX IF NOT EXISTS idx_usage_by_model_feature_usage ON usage_by_model_feature(usage_id);
    CREATE INDEX IF NOT EXISTS idx_daily_usage_date ON daily_usage(date);
    CREATE INDEX IF NOT EXISTS idx_weekly_usage_week_start ON weekly_usage(week_start);
    CREATE INDEX IF NOT EXISTS idx_chat_mode_requests_date ON chat_mode_requests(date);
    CREATE INDEX IF NOT EXISTS idx_model_usage_date ON model_usage(date);
    CREATE INDEX IF NOT EXISTS idx_agent_adoption_date ON agent_adoption(date);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "usage_details",
            "usage_by_ide",
            "usage_by_feature",
            "usage_by_language_feature",
            "usage_by_language_model",
            "usage_by_model_feature",
            "daily_usage",
            "weekly_usage",
            "chat_mode_requests",
            "model_usage",
            "agent_adoption",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_children_cascade_on_parent_delete() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO usage_details (day, user_id) VALUES ('2024-01-01', 1)",
            [],
        )
        .unwrap();
        let usage_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO usage_by_ide (usage_id, ide) VALUES (?1, 'vscode')",
            [usage_id],
        )
        .unwrap();

        conn.execute("DELETE FROM usage_details WHERE id = ?1", [usage_id])
            .unwrap();

        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM usage_by_ide", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_chat_mode_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO chat_mode_requests (date, mode, requests) VALUES ('2024-01-01', 'voice', 1)",
            [],
        );
        assert!(result.is_err());
    }
}
