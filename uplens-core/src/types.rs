//! Core domain types for uplens
//!
//! These types form the record model (Layer 1) shared by ingestion,
//! the rollup builder, and the direct-scan aggregator.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Detail record** | One row of per-user-per-day activity, the unit of truth |
//! | **Breakdown** | A nested categorization attached to a detail record (by IDE, feature, ...) |
//! | **Rollup** | A precomputed aggregate derived from detail records, rebuilt wholesale |
//! | **Synthetic fallback** | Deterministic rows generated when a breakdown dimension has no data |
//!
//! A raw record is valid if it carries a user id and a day. Every other
//! field defaults when absent so heterogeneous exports can be accepted
//! without rejecting whole batches. Validation happens once, at this
//! boundary ([`UsageRecord::validate`]); downstream consumers never
//! re-check fields.

use serde::{Deserialize, Serialize};

// ============================================
// Raw activity record
// ============================================

/// One raw per-user-per-day activity record as it appears in exports.
///
/// `user_id` and `day` are required; everything else is defaulted so
/// partial exports still parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Start of the reporting window this record came from
    #[serde(default)]
    pub report_start_day: String,
    /// End of the reporting window
    #[serde(default)]
    pub report_end_day: String,
    /// Day of activity, ISO `YYYY-MM-DD`
    pub day: String,
    /// Org/tenant identifier
    #[serde(default)]
    pub enterprise_id: String,
    /// Stable numeric user id
    pub user_id: i64,
    /// Login name for display
    #[serde(default)]
    pub user_login: String,

    /// User-initiated interactions (chat turns, completions requested)
    #[serde(default)]
    pub user_initiated_interaction_count: i64,
    /// Code suggestions generated
    #[serde(default)]
    pub code_generation_activity_count: i64,
    /// Code suggestions accepted
    #[serde(default)]
    pub code_acceptance_activity_count: i64,
    /// Whether the user used agent mode this day
    #[serde(default)]
    pub used_agent: bool,
    /// Whether the user used chat this day
    #[serde(default)]
    pub used_chat: bool,

    /// Lines of code suggested for addition
    #[serde(default)]
    pub loc_suggested_to_add_sum: i64,
    /// Lines of code suggested for deletion
    #[serde(default)]
    pub loc_suggested_to_delete_sum: i64,
    /// Lines of code actually added
    #[serde(default)]
    pub loc_added_sum: i64,
    /// Lines of code actually deleted
    #[serde(default)]
    pub loc_deleted_sum: i64,

    /// Most-used IDE name, when the export reports one
    #[serde(default)]
    pub primary_ide: Option<String>,
    #[serde(default)]
    pub primary_ide_version: Option<String>,
    #[serde(default)]
    pub primary_plugin_version: Option<String>,

    /// Per-IDE breakdown
    #[serde(default)]
    pub totals_by_ide: Vec<IdeBreakdown>,
    /// Per-feature breakdown
    #[serde(default)]
    pub totals_by_feature: Vec<FeatureBreakdown>,
    /// Per-(language, feature) breakdown
    #[serde(default)]
    pub totals_by_language_feature: Vec<LanguageFeatureBreakdown>,
    /// Per-(language, model) breakdown
    #[serde(default)]
    pub totals_by_language_model: Vec<LanguageModelBreakdown>,
    /// Per-(model, feature) breakdown
    #[serde(default)]
    pub totals_by_model_feature: Vec<ModelFeatureBreakdown>,
}

impl UsageRecord {
    /// Structural validation beyond what serde enforces.
    ///
    /// Serde already rejects records missing `user_id` or `day`; this
    /// catches the present-but-useless cases.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.day.trim().is_empty() {
            return Err("record has empty day".to_string());
        }
        if self.user_id <= 0 {
            return Err(format!("record has invalid user_id: {}", self.user_id));
        }
        Ok(())
    }
}

// ============================================
// Breakdown children
// ============================================

/// Activity totals for one IDE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeBreakdown {
    pub ide: String,
    #[serde(default)]
    pub code_generation_activity_count: i64,
    #[serde(default)]
    pub code_acceptance_activity_count: i64,
    #[serde(default)]
    pub loc_suggested_to_add_sum: i64,
    #[serde(default)]
    pub loc_added_sum: i64,
}

/// Activity totals for one feature (e.g. `code_completion`, `chat`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBreakdown {
    pub feature: String,
    #[serde(default)]
    pub user_initiated_interaction_count: i64,
    #[serde(default)]
    pub code_generation_activity_count: i64,
    #[serde(default)]
    pub code_acceptance_activity_count: i64,
}

/// Counts per (language, feature) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageFeatureBreakdown {
    pub language: String,
    pub feature: String,
    #[serde(default)]
    pub count: i64,
}

/// Counts per (language, model) pair.
///
/// Real exports disagree on which field carries the value: some report
/// `count`, others `code_generation_activity_count`. Both are accepted
/// and [`Self::effective_count`] picks whichever is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelBreakdown {
    pub language: String,
    pub model: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub code_generation_activity_count: i64,
}

impl LanguageModelBreakdown {
    /// The usable count for this entry, preferring the code-generation
    /// counter when the plain `count` is absent or zero.
    pub fn effective_count(&self) -> i64 {
        if self.code_generation_activity_count > 0 {
            self.code_generation_activity_count
        } else {
            self.count
        }
    }
}

/// Counts per (model, feature) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFeatureBreakdown {
    pub model: String,
    pub feature: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub user_initiated_interaction_count: i64,
    #[serde(default)]
    pub code_generation_activity_count: i64,
}

impl ModelFeatureBreakdown {
    /// Weight used for chat-mode attribution: interaction count when
    /// reported, else code-gen count, else the raw count.
    pub fn interaction_weight(&self) -> i64 {
        if self.user_initiated_interaction_count > 0 {
            self.user_initiated_interaction_count
        } else if self.code_generation_activity_count > 0 {
            self.code_generation_activity_count
        } else {
            self.count
        }
    }
}

// ============================================
// Chat modes
// ============================================

/// The five canonical chat modes dashboards break requests down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Edit,
    Ask,
    Agent,
    Custom,
    Inline,
}

/// All modes, in the order stacked charts render them.
pub const ALL_CHAT_MODES: [ChatMode; 5] = [
    ChatMode::Edit,
    ChatMode::Ask,
    ChatMode::Agent,
    ChatMode::Custom,
    ChatMode::Inline,
];

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Edit => "edit",
            ChatMode::Ask => "ask",
            ChatMode::Agent => "agent",
            ChatMode::Custom => "custom",
            ChatMode::Inline => "inline",
        }
    }

    /// Map an export feature name onto a canonical mode.
    ///
    /// This is the single lookup table both query paths share; feature
    /// names not listed here count as custom.
    pub fn from_feature(feature: &str) -> ChatMode {
        match feature {
            "code_completion" | "chat_inline" => ChatMode::Inline,
            "chat" | "chat_panel_ask_mode" => ChatMode::Ask,
            "agent" | "chat_panel_agent_mode" => ChatMode::Agent,
            "edit" | "agent_edit" | "chat_panel_edit_mode" => ChatMode::Edit,
            _ => ChatMode::Custom,
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "edit" => Ok(ChatMode::Edit),
            "ask" => Ok(ChatMode::Ask),
            "agent" => Ok(ChatMode::Agent),
            "custom" => Ok(ChatMode::Custom),
            "inline" => Ok(ChatMode::Inline),
            _ => Err(format!("unknown chat mode: {}", s)),
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Rollup provenance
// ============================================

/// Whether a rollup row reflects real telemetry or a synthetic fallback
/// distribution generated because no granular breakdown was ingested.
///
/// Synthetic rows are a display convenience, not a measurement; the tag
/// keeps the two distinguishable downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupSource {
    Measured,
    Synthetic,
}

impl RollupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupSource::Measured => "measured",
            RollupSource::Synthetic => "synthetic",
        }
    }
}

impl std::str::FromStr for RollupSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "measured" => Ok(RollupSource::Measured),
            "synthetic" => Ok(RollupSource::Synthetic),
            _ => Err(format!("unknown rollup source: {}", s)),
        }
    }
}

// ============================================
// Rollup rows
// ============================================

/// One row of the daily usage rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsageRow {
    pub date: String,
    pub active_users: i64,
    pub total_suggestions: i64,
    pub accepted_suggestions: i64,
    pub chat_requests: i64,
    pub agent_requests: i64,
}

/// One row of the weekly usage rollup; `week_start` is Monday-aligned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyUsageRow {
    pub week_start: String,
    pub active_users: i64,
    pub total_suggestions: i64,
    pub accepted_suggestions: i64,
    pub chat_requests: i64,
    pub agent_requests: i64,
}

/// One row of the chat-mode rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModeRow {
    pub date: String,
    pub mode: ChatMode,
    pub requests: i64,
    pub source: RollupSource,
}

/// One row of the model usage rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsageRow {
    pub date: String,
    pub model_name: String,
    pub requests: i64,
    pub source: RollupSource,
}

/// One row of the agent adoption rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAdoptionRow {
    pub date: String,
    pub total_active_users: i64,
    pub agent_users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_record_parses_with_defaults() {
        let rec: UsageRecord =
            serde_json::from_str(r#"{"user_id": 42, "day": "2024-01-01"}"#).unwrap();
        assert_eq!(rec.user_id, 42);
        assert_eq!(rec.day, "2024-01-01");
        assert_eq!(rec.code_generation_activity_count, 0);
        assert!(!rec.used_agent);
        assert!(rec.totals_by_ide.is_empty());
        assert!(rec.primary_ide.is_none());
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn test_record_missing_required_fields_fails() {
        assert!(serde_json::from_str::<UsageRecord>(r#"{"day": "2024-01-01"}"#).is_err());
        assert!(serde_json::from_str::<UsageRecord>(r#"{"user_id": 42}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_day_and_bad_user() {
        let mut rec: UsageRecord =
            serde_json::from_str(r#"{"user_id": 42, "day": "2024-01-01"}"#).unwrap();
        rec.day = "  ".to_string();
        assert!(rec.validate().is_err());

        let rec: UsageRecord =
            serde_json::from_str(r#"{"user_id": 0, "day": "2024-01-01"}"#).unwrap();
        assert!(rec.validate().is_err());
    }

    #[test]
    fn test_feature_to_mode_mapping() {
        assert_eq!(ChatMode::from_feature("code_completion"), ChatMode::Inline);
        assert_eq!(ChatMode::from_feature("chat_inline"), ChatMode::Inline);
        assert_eq!(ChatMode::from_feature("chat"), ChatMode::Ask);
        assert_eq!(ChatMode::from_feature("chat_panel_ask_mode"), ChatMode::Ask);
        assert_eq!(ChatMode::from_feature("agent"), ChatMode::Agent);
        assert_eq!(
            ChatMode::from_feature("chat_panel_agent_mode"),
            ChatMode::Agent
        );
        assert_eq!(ChatMode::from_feature("edit"), ChatMode::Edit);
        assert_eq!(ChatMode::from_feature("agent_edit"), ChatMode::Edit);
        assert_eq!(
            ChatMode::from_feature("chat_panel_edit_mode"),
            ChatMode::Edit
        );
        assert_eq!(
            ChatMode::from_feature("chat_panel_unknown_mode"),
            ChatMode::Custom
        );
        assert_eq!(ChatMode::from_feature("something_new"), ChatMode::Custom);
    }

    #[test]
    fn test_language_model_effective_count() {
        let lm = LanguageModelBreakdown {
            language: "rust".into(),
            model: "gpt-4.1".into(),
            count: 0,
            code_generation_activity_count: 7,
        };
        assert_eq!(lm.effective_count(), 7);

        let lm = LanguageModelBreakdown {
            language: "rust".into(),
            model: "gpt-4.1".into(),
            count: 3,
            code_generation_activity_count: 0,
        };
        assert_eq!(lm.effective_count(), 3);
    }

    #[test]
    fn test_rollup_source_roundtrip() {
        assert_eq!(
            "measured".parse::<RollupSource>().unwrap(),
            RollupSource::Measured
        );
        assert_eq!(RollupSource::Synthetic.as_str(), "synthetic");
        assert!("made_up".parse::<RollupSource>().is_err());
    }
}
