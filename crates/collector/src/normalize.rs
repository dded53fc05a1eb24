//! Record normalizer
//!
//! Converts raw provider payloads into the canonical record shapes. The
//! provider speaks camelCase with its own field names; a payload missing a
//! required field is a permanent per-entity failure, while optional fields
//! default to empty.

use caselake_common::records::{CaseRecord, CheckResult, EntityKind, HealthEvent, Record};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
#[error("Malformed {kind} payload: {message}")]
pub struct NormalizeError {
    pub kind: EntityKind,
    pub message: String,
}

pub fn normalize(kind: EntityKind, value: &Value) -> Result<Record, NormalizeError> {
    match kind {
        EntityKind::Case => normalize_case(value).map(Record::Case),
        EntityKind::Health => normalize_health(value).map(Record::Health),
        EntityKind::Ta => normalize_check(value).map(Record::Ta),
    }
}

fn normalize_case(value: &Value) -> Result<CaseRecord, NormalizeError> {
    let created_at = required_time(value, "timeCreated", EntityKind::Case)?;
    let mut case = CaseRecord {
        account_id: required_str(value, "accountId", EntityKind::Case)?,
        case_id: required_str(value, "displayId", EntityKind::Case)?,
        created_at,
        severity: optional_str(value, "severityCode"),
        status: optional_str(value, "status"),
        subject: optional_str(value, "subject"),
        category: optional_str(value, "categoryCode"),
        service: optional_str(value, "serviceCode"),
        // Providers that do not track update times get create-time versioning
        last_updated_at: optional_time(value, "lastUpdatedTime").unwrap_or(created_at),
        search_context: String::new(),
    };
    case.search_context = case.build_search_context();
    Ok(case)
}

fn normalize_health(value: &Value) -> Result<HealthEvent, NormalizeError> {
    let start_time = required_time(value, "startTime", EntityKind::Health)?;
    Ok(HealthEvent {
        account_id: required_str(value, "accountId", EntityKind::Health)?,
        event_id: required_str(value, "eventId", EntityKind::Health)?,
        service: optional_str(value, "service"),
        event_type_code: optional_str(value, "eventTypeCode"),
        status: optional_str(value, "statusCode"),
        region: optional_str(value, "region"),
        start_time,
        last_updated_at: optional_time(value, "lastUpdatedTime").unwrap_or(start_time),
        description: optional_str(value, "description"),
    })
}

fn normalize_check(value: &Value) -> Result<CheckResult, NormalizeError> {
    let timestamp = required_time(value, "timestamp", EntityKind::Ta)?;
    Ok(CheckResult {
        account_id: required_str(value, "accountId", EntityKind::Ta)?,
        check_id: required_str(value, "checkId", EntityKind::Ta)?,
        timestamp,
        name: optional_str(value, "name"),
        category: optional_str(value, "category"),
        status: optional_str(value, "status"),
        flagged_resources: value
            .get("resourcesFlagged")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        last_updated_at: optional_time(value, "lastUpdatedTime").unwrap_or(timestamp),
    })
}

fn required_str(value: &Value, field: &str, kind: EntityKind) -> Result<String, NormalizeError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NormalizeError {
            kind,
            message: format!("missing required field `{}`", field),
        })
}

fn optional_str(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn required_time(value: &Value, field: &str, kind: EntityKind) -> Result<DateTime<Utc>, NormalizeError> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError {
            kind,
            message: format!("missing required field `{}`", field),
        })?;
    parse_time(raw).ok_or_else(|| NormalizeError {
        kind,
        message: format!("unparseable timestamp in `{}`: {}", field, raw),
    })
}

fn optional_time(value: &Value, field: &str) -> Option<DateTime<Utc>> {
    value.get(field).and_then(Value::as_str).and_then(parse_time)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_case_full_payload() {
        let payload = json!({
            "accountId": "123456789012",
            "displayId": "case-42",
            "timeCreated": "2024-07-23T15:49:29Z",
            "lastUpdatedTime": "2024-07-24T08:00:00Z",
            "severityCode": "urgent",
            "status": "opened",
            "subject": "API throttling",
            "categoryCode": "limits",
            "serviceCode": "gateway"
        });

        let Record::Case(case) = normalize(EntityKind::Case, &payload).unwrap() else {
            panic!("expected case record");
        };
        assert_eq!(case.case_id, "case-42");
        assert_eq!(case.severity, "urgent");
        assert!(case.last_updated_at > case.created_at);
        assert!(case.search_context.contains("case-42"));
    }

    #[test]
    fn test_normalize_case_defaults_optional_fields() {
        let payload = json!({
            "accountId": "123456789012",
            "displayId": "case-43",
            "timeCreated": "2024-07-23T15:49:29Z"
        });

        let Record::Case(case) = normalize(EntityKind::Case, &payload).unwrap() else {
            panic!("expected case record");
        };
        assert_eq!(case.severity, "");
        assert_eq!(case.service, "");
        assert_eq!(case.last_updated_at, case.created_at);
    }

    #[test]
    fn test_normalize_case_rejects_missing_id() {
        let payload = json!({
            "accountId": "123456789012",
            "timeCreated": "2024-07-23T15:49:29Z"
        });

        let err = normalize(EntityKind::Case, &payload).unwrap_err();
        assert!(err.message.contains("displayId"));
    }

    #[test]
    fn test_normalize_rejects_bad_timestamp() {
        let payload = json!({
            "accountId": "123456789012",
            "displayId": "case-44",
            "timeCreated": "yesterday"
        });

        assert!(normalize(EntityKind::Case, &payload).is_err());
    }

    #[test]
    fn test_normalize_check_result() {
        let payload = json!({
            "accountId": "123456789012",
            "checkId": "svc-limit-1",
            "timestamp": "2025-02-01T00:00:00Z",
            "name": "Service limits",
            "category": "service_limits",
            "status": "warning",
            "resourcesFlagged": 3
        });

        let Record::Ta(check) = normalize(EntityKind::Ta, &payload).unwrap() else {
            panic!("expected check result");
        };
        assert_eq!(check.flagged_resources, 3);
        assert_eq!(check.category, "service_limits");
    }
}
