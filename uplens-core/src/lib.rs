//! # uplens-core
//!
//! Core library for uplens - a developer-tool usage analytics engine.
//!
//! This library provides:
//! - Domain types for activity records, breakdowns, and rollups
//! - Idempotent NDJSON/JSON ingestion into SQLite
//! - Wholesale rollup rebuilds derived from the detail set
//! - A direct-scan fallback that serves the same shapes from raw files
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 0 (Raw):** Export files on disk (immutable)
//! - **Layer 1 (Canonical):** One detail row per (user, day) plus five breakdown child tables
//! - **Layer 2 (Derived):** Five rollup tables, rebuilt wholesale (regenerable)
//!
//! ## Example
//!
//! ```rust,no_run
//! use uplens_core::{Config, Database, IngestService, RollupBuilder};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! // Ingest exports, then rebuild rollups
//! let report = IngestService::new(&db)
//!     .ingest_dir(&config.raw_data_dir())
//!     .expect("ingest failed");
//! println!("accepted {} rejected {}", report.accepted, report.rejected);
//! RollupBuilder::new(&db).rebuild_all().expect("rebuild failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, StoreCounts, UpsertOutcome};
pub use error::{Error, Result};
pub use ingest::{IngestReport, IngestService};
pub use query::{DateRange, UsageQueries};
pub use rollup::{FallbackPolicy, RollupBuilder, RollupSummary};
pub use scan::DirectScanner;
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod rollup;
pub mod scan;
pub mod topk;
pub mod types;
