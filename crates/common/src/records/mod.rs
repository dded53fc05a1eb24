//! Canonical entity records and lake key conventions
//!
//! Normalized shapes for the three synchronized entity types, the sync
//! checkpoint, and the derived metadata row. Records are unique by their
//! entity key and are superseded (never deleted) when `last_updated_at`
//! advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity vocabulary used by the provider
pub const SEVERITIES: &[&str] = &["high", "low", "normal", "urgent", "critical"];

/// The three synchronized entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Case,
    Health,
    Ta,
}

impl EntityKind {
    /// Prefix under which this entity type's objects live in the lake
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Case => "case",
            EntityKind::Health => "health",
            EntityKind::Ta => "ta",
        }
    }

    pub fn all() -> [EntityKind; 3] {
        [EntityKind::Case, EntityKind::Health, EntityKind::Ta]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A normalized support case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub account_id: String,
    pub case_id: String,
    pub created_at: DateTime<Utc>,
    pub severity: String,
    pub status: String,
    pub subject: String,
    pub category: String,
    pub service: String,
    pub last_updated_at: DateTime<Utc>,

    /// Natural-language summary sentence consumed by the semantic index
    #[serde(default)]
    pub search_context: String,
}

impl CaseRecord {
    pub fn lake_key(&self) -> String {
        lake_key(EntityKind::Case, &self.created_at, &self.account_id, &self.case_id)
    }

    /// Builds the index-facing context sentence for this case
    pub fn build_search_context(&self) -> String {
        format!(
            "This is a support case ID {} in account ID {}. The case was opened on {}; \
             it is a {} case related to the {} service with {} severity.",
            self.case_id,
            self.account_id,
            self.created_at.to_rfc3339(),
            self.status,
            self.service,
            self.severity,
        )
    }
}

/// A normalized health event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub account_id: String,
    pub event_id: String,
    pub service: String,
    pub event_type_code: String,
    pub status: String,
    pub region: String,
    pub start_time: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

impl HealthEvent {
    pub fn lake_key(&self) -> String {
        lake_key(EntityKind::Health, &self.start_time, &self.account_id, &self.event_id)
    }
}

/// A normalized advisory check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub account_id: String,
    pub check_id: String,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub category: String,
    pub status: String,
    #[serde(default)]
    pub flagged_resources: u64,
    pub last_updated_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn lake_key(&self) -> String {
        // Check results are keyed by (account, check, timestamp): the same check
        // observed at different times is a distinct version series.
        let id = format!("{}-{}", self.check_id, self.timestamp.timestamp());
        lake_key(EntityKind::Ta, &self.timestamp, &self.account_id, &id)
    }
}

/// Any normalized record, as produced by the collector pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Record {
    Case(CaseRecord),
    Health(HealthEvent),
    Ta(CheckResult),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Case(_) => EntityKind::Case,
            Record::Health(_) => EntityKind::Health,
            Record::Ta(_) => EntityKind::Ta,
        }
    }

    pub fn lake_key(&self) -> String {
        match self {
            Record::Case(c) => c.lake_key(),
            Record::Health(h) => h.lake_key(),
            Record::Ta(t) => t.lake_key(),
        }
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        match self {
            Record::Case(c) => c.last_updated_at,
            Record::Health(h) => h.last_updated_at,
            Record::Ta(t) => t.last_updated_at,
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            Record::Case(c) => &c.account_id,
            Record::Health(h) => &h.account_id,
            Record::Ta(t) => &t.account_id,
        }
    }

    /// Logical entity id within the account (the check id for advisory results)
    pub fn entity_id(&self) -> &str {
        match self {
            Record::Case(c) => &c.case_id,
            Record::Health(h) => &h.event_id,
            Record::Ta(t) => &t.check_id,
        }
    }
}

/// High-water mark bounding incremental sync windows.
///
/// One logical checkpoint per entity type; advanced monotonically and only
/// after the corresponding batch is durably written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub entity_type: EntityKind,
    pub last_synced_at: DateTime<Utc>,
    pub mode: String,
}

impl SyncCheckpoint {
    /// Lake key under which this entity type's checkpoint is stored
    pub fn key(kind: EntityKind) -> String {
        format!("checkpoints/{}.json", kind.prefix())
    }
}

/// Denormalized projection of a case used for analytic queries.
///
/// Derived, never hand-edited; keyed by the source object key so that
/// re-processing the same object upserts instead of appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMetadataRow {
    pub object_key: String,
    pub account_id: String,
    pub case_id: String,
    pub created_at: String,
    pub severity: String,
    pub status: String,
    pub subject: String,
    pub category: String,
    pub service: String,
}

/// Canonical lake object key:
/// `<entity-type>/<date-partition>/<account-id>-<entity-id>.json`
pub fn lake_key(
    kind: EntityKind,
    partition_time: &DateTime<Utc>,
    account_id: &str,
    entity_id: &str,
) -> String {
    format!(
        "{}/{}/{}-{}.json",
        kind.prefix(),
        date_partition(partition_time),
        account_id,
        entity_id,
    )
}

/// Date partition in `YYYY/MM` form
pub fn date_partition(ts: &DateTime<Utc>) -> String {
    ts.format("%Y/%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_case() -> CaseRecord {
        CaseRecord {
            account_id: "123456789012".into(),
            case_id: "case-9876".into(),
            created_at: Utc.with_ymd_and_hms(2024, 7, 23, 15, 49, 29).unwrap(),
            severity: "high".into(),
            status: "opened".into(),
            subject: "Instance unreachable".into(),
            category: "connectivity".into(),
            service: "compute".into(),
            last_updated_at: Utc.with_ymd_and_hms(2024, 7, 24, 9, 0, 0).unwrap(),
            search_context: String::new(),
        }
    }

    #[test]
    fn test_lake_key_convention() {
        let case = sample_case();
        assert_eq!(case.lake_key(), "case/2024/07/123456789012-case-9876.json");
    }

    #[test]
    fn test_date_partition() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(date_partition(&ts), "2025/01");
    }

    #[test]
    fn test_record_roundtrip_tagging() {
        let record = Record::Case(sample_case());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"entity_type\":\"case\""));
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), EntityKind::Case);
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_search_context_mentions_key_fields() {
        let case = sample_case();
        let ctx = case.build_search_context();
        assert!(ctx.contains("case-9876"));
        assert!(ctx.contains("123456789012"));
        assert!(ctx.contains("compute"));
        assert!(ctx.contains("high"));
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(SyncCheckpoint::key(EntityKind::Ta), "checkpoints/ta.json");
    }
}
