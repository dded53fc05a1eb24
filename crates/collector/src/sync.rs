//! Sync engine
//!
//! One state machine over three invocation regimes sharing the same
//! fetch → normalize → write pipeline:
//! - backfill: window fetch ignoring checkpoints, initializes them on success
//! - incremental: window bounded by the checkpoint minus an overlap margin
//! - realtime: one named entity, checkpoints bypassed
//!
//! Writes are idempotent keyed overwrites with stale-write rejection, so
//! concurrent runs for different triggers need no coordination.

use crate::errors::CollectorError;
use crate::normalize::normalize;
use crate::provider::{ProviderError, SupportProvider};
use caselake_common::lake::{advance_checkpoint, put_record_if_newer, ObjectWriter, WriteOutcome};
use caselake_common::lake::load_checkpoint;
use caselake_common::metrics::record_sync;
use caselake_common::queue::{EntityRef, ObjectWrittenEvent, Queue, SyncTriggerMessage};
use caselake_common::records::{EntityKind, Record};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Margin subtracted from the checkpoint when deriving an incremental window,
/// tolerating clock skew and late-arriving updates.
pub const INCREMENTAL_OVERLAP_HOURS: i64 = 1;

/// The three collector invocation regimes
#[derive(Debug, Clone)]
pub enum SyncMode {
    /// One-time historical load over a fixed window
    Backfill { days_back: i64 },
    /// Scheduled catch-up since the checkpoint
    Incremental { days_back: i64 },
    /// Per-event update of one named entity
    Realtime { entity: EntityRef },
}

impl SyncMode {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::Backfill { .. } => "backfill",
            SyncMode::Incremental { .. } => "incremental",
            SyncMode::Realtime { .. } => "realtime",
        }
    }
}

/// Which entity types a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub case: bool,
    pub health: bool,
    pub ta: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self { case: true, health: false, ta: false }
    }
}

impl Selection {
    pub fn for_kind(kind: EntityKind) -> Self {
        Self {
            case: kind == EntityKind::Case,
            health: kind == EntityKind::Health,
            ta: kind == EntityKind::Ta,
        }
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::all()
            .into_iter()
            .filter(|kind| match kind {
                EntityKind::Case => self.case,
                EntityKind::Health => self.health,
                EntityKind::Ta => self.ta,
            })
            .collect()
    }
}

/// Maps an inbound trigger payload to a collector invocation.
///
/// A trigger carrying an entity reference is a realtime per-entity update
/// scoped to exactly that entity type; anything else is an incremental run
/// over the flagged types. Backfill is not queue-driven: the lifecycle owner
/// invokes it once at cold start through the CLI.
pub fn route_trigger(msg: &SyncTriggerMessage) -> (SyncMode, Selection) {
    if let Some(entity) = &msg.entity {
        (
            SyncMode::Realtime { entity: entity.clone() },
            Selection::for_kind(entity.entity_type),
        )
    } else {
        (
            SyncMode::Incremental {
                days_back: msg.past_no_of_days.unwrap_or(1),
            },
            Selection {
                case: msg.case,
                health: msg.health,
                ta: msg.ta,
            },
        )
    }
}

/// Per-entity-type run counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KindCounts {
    pub fetched: u64,
    pub written: u64,
    pub skipped_stale: u64,
    pub failed: u64,
}

/// Outcome of one collector run
#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: BTreeMap<String, KindCounts>,
}

impl SyncReport {
    fn new(mode: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            mode: mode.to_string(),
            started_at,
            finished_at: started_at,
            counts: BTreeMap::new(),
        }
    }

    fn entry(&mut self, kind: EntityKind) -> &mut KindCounts {
        self.counts.entry(kind.prefix().to_string()).or_default()
    }

    pub fn fetched_total(&self) -> u64 {
        self.counts.values().map(|c| c.fetched).sum()
    }

    pub fn written_total(&self) -> u64 {
        self.counts.values().map(|c| c.written).sum()
    }

    pub fn skipped_stale_total(&self) -> u64 {
        self.counts.values().map(|c| c.skipped_stale).sum()
    }

    pub fn failed_total(&self) -> u64 {
        self.counts.values().map(|c| c.failed).sum()
    }
}

/// Trigger-driven collector over the shared fetch/normalize/write pipeline
pub struct Collector {
    provider: Arc<dyn SupportProvider>,
    lake: Arc<dyn ObjectWriter>,
    events: Option<Arc<Queue>>,
}

/// Request-level accounting for outage detection
#[derive(Default)]
struct RequestStats {
    attempted: usize,
    failed: usize,
}

impl Collector {
    pub fn new(
        provider: Arc<dyn SupportProvider>,
        lake: Arc<dyn ObjectWriter>,
        events: Option<Arc<Queue>>,
    ) -> Self {
        Self { provider, lake, events }
    }

    /// Run one sync invocation and report what happened.
    ///
    /// Individual entity failures are logged and counted, never abort the
    /// batch. The run hard-fails only when every provider request failed.
    #[instrument(skip(self), fields(mode = mode.name()))]
    pub async fn run(
        &self,
        mode: SyncMode,
        selection: Selection,
    ) -> Result<SyncReport, CollectorError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut report = SyncReport::new(mode.name(), started_at);
        let mut stats = RequestStats::default();

        match &mode {
            SyncMode::Realtime { entity } => {
                self.sync_single(entity, &mut report, &mut stats).await;
                self.escalate_outage(&stats)?;
            }
            SyncMode::Backfill { days_back } => {
                let window_start = started_at - Duration::days(*days_back);
                let clean = self
                    .sync_kinds(&selection, window_start, None, &mut report, &mut stats)
                    .await;
                self.escalate_outage(&stats)?;
                self.advance_clean_checkpoints(&clean, started_at, mode.name()).await?;
            }
            SyncMode::Incremental { days_back } => {
                let clean = self
                    .sync_kinds(&selection, started_at, Some(*days_back), &mut report, &mut stats)
                    .await;
                self.escalate_outage(&stats)?;
                self.advance_clean_checkpoints(&clean, started_at, mode.name()).await?;
            }
        }

        report.finished_at = Utc::now();
        record_sync(
            start.elapsed().as_secs_f64(),
            &report.mode,
            report.written_total(),
            report.failed_total(),
            report.skipped_stale_total(),
        );
        info!(
            mode = %report.mode,
            fetched = report.fetched_total(),
            written = report.written_total(),
            stale = report.skipped_stale_total(),
            failed = report.failed_total(),
            "Sync run complete"
        );

        Ok(report)
    }

    /// Sync every selected entity type; returns the kinds whose pagination
    /// completed without request failures (only those may advance their
    /// checkpoint).
    async fn sync_kinds(
        &self,
        selection: &Selection,
        now_or_window_start: DateTime<Utc>,
        incremental_days_back: Option<i64>,
        report: &mut SyncReport,
        stats: &mut RequestStats,
    ) -> Vec<EntityKind> {
        let mut clean = Vec::new();
        for kind in selection.kinds() {
            let window_start = match incremental_days_back {
                Some(days_back) => {
                    match self
                        .incremental_window_start(kind, now_or_window_start, days_back)
                        .await
                    {
                        Ok(start) => start,
                        Err(e) => {
                            error!(kind = %kind, error = %e, "Failed to derive sync window");
                            continue;
                        }
                    }
                }
                None => now_or_window_start,
            };

            if self.sync_window(kind, window_start, report, stats).await {
                clean.push(kind);
            }
        }
        clean
    }

    /// Window start for an incremental run: the checkpoint minus the overlap
    /// margin, but never before `now - days_back`.
    async fn incremental_window_start(
        &self,
        kind: EntityKind,
        now: DateTime<Utc>,
        days_back: i64,
    ) -> Result<DateTime<Utc>, CollectorError> {
        let floor = now - Duration::days(days_back);
        match load_checkpoint(self.lake.as_ref(), kind).await? {
            Some(cp) => {
                let overlapped = cp.last_synced_at - Duration::hours(INCREMENTAL_OVERLAP_HOURS);
                Ok(overlapped.max(floor))
            }
            None => Ok(floor),
        }
    }

    /// Paginate one entity type's window to exhaustion. Returns true when
    /// every page request succeeded.
    async fn sync_window(
        &self,
        kind: EntityKind,
        updated_after: DateTime<Utc>,
        report: &mut SyncReport,
        stats: &mut RequestStats,
    ) -> bool {
        let mut page_token: Option<String> = None;

        loop {
            stats.attempted += 1;
            let page = match self
                .provider
                .fetch_page(kind, updated_after, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    stats.failed += 1;
                    error!(kind = %kind, error = %e, "Page fetch failed, abandoning window");
                    return false;
                }
            };

            for item in &page.items {
                report.entry(kind).fetched += 1;
                self.ingest_item(kind, item, report).await;
            }

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => return true,
            }
        }
    }

    /// Normalize and write one raw payload; failures are counted, not raised
    async fn ingest_item(&self, kind: EntityKind, item: &serde_json::Value, report: &mut SyncReport) {
        let record = match normalize(kind, item) {
            Ok(record) => record,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Skipping malformed entity");
                report.entry(kind).failed += 1;
                return;
            }
        };

        match put_record_if_newer(self.lake.as_ref(), &record).await {
            Ok(WriteOutcome::Written) => {
                report.entry(kind).written += 1;
                self.emit_written_event(&record).await;
            }
            Ok(WriteOutcome::SkippedStale) => {
                report.entry(kind).skipped_stale += 1;
            }
            Err(e) => {
                error!(kind = %kind, key = %record.lake_key(), error = %e, "Lake write failed");
                report.entry(kind).failed += 1;
            }
        }
    }

    /// Realtime path: fetch and ingest exactly the named entity
    async fn sync_single(
        &self,
        entity: &EntityRef,
        report: &mut SyncReport,
        stats: &mut RequestStats,
    ) {
        stats.attempted += 1;
        match self.provider.fetch_one(entity).await {
            Ok(Some(item)) => {
                report.entry(entity.entity_type).fetched += 1;
                self.ingest_item(entity.entity_type, &item, report).await;
            }
            Ok(None) => {
                warn!(
                    kind = %entity.entity_type,
                    entity_id = %entity.entity_id,
                    "Entity not found at provider"
                );
                report.entry(entity.entity_type).failed += 1;
            }
            Err(e) => {
                stats.failed += 1;
                error!(
                    kind = %entity.entity_type,
                    entity_id = %entity.entity_id,
                    error = %e,
                    "Realtime fetch failed"
                );
                report.entry(entity.entity_type).failed += 1;
            }
        }
    }

    async fn emit_written_event(&self, record: &Record) {
        let Some(queue) = &self.events else { return };
        let event = ObjectWrittenEvent {
            object_key: record.lake_key(),
            entity_type: record.kind(),
            account_id: record.account_id().to_string(),
            entity_id: record.entity_id().to_string(),
            written_at: Utc::now(),
        };
        if let Err(e) = queue.send(&event).await {
            error!(key = %event.object_key, error = %e, "Failed to emit object-written event");
        }
    }

    fn escalate_outage(&self, stats: &RequestStats) -> Result<(), CollectorError> {
        if stats.attempted > 0 && stats.failed == stats.attempted {
            return Err(CollectorError::ProviderOutage { attempted: stats.attempted });
        }
        Ok(())
    }

    async fn advance_clean_checkpoints(
        &self,
        kinds: &[EntityKind],
        run_started_at: DateTime<Utc>,
        mode: &str,
    ) -> Result<(), CollectorError> {
        for &kind in kinds {
            let cp = advance_checkpoint(self.lake.as_ref(), kind, run_started_at, mode).await?;
            info!(kind = %kind, last_synced_at = %cp.last_synced_at, "Checkpoint advanced");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Page;
    use async_trait::async_trait;
    use caselake_common::lake::{load_checkpoint, MemoryObjectStore, ObjectReader};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider fake fed with a script of per-kind page results
    #[derive(Default)]
    struct ScriptedProvider {
        pages: Mutex<HashMap<EntityKind, VecDeque<Result<Page, ProviderError>>>>,
        singles: Mutex<HashMap<String, Value>>,
    }

    impl ScriptedProvider {
        fn with_pages(kind: EntityKind, pages: Vec<Result<Page, ProviderError>>) -> Self {
            let provider = Self::default();
            provider.pages.lock().unwrap().insert(kind, pages.into());
            provider
        }

        fn add_pages(&self, kind: EntityKind, pages: Vec<Result<Page, ProviderError>>) {
            self.pages.lock().unwrap().insert(kind, pages.into());
        }

        fn add_single(&self, entity_id: &str, item: Value) {
            self.singles.lock().unwrap().insert(entity_id.to_string(), item);
        }
    }

    #[async_trait]
    impl SupportProvider for ScriptedProvider {
        async fn fetch_page(
            &self,
            kind: EntityKind,
            _updated_after: DateTime<Utc>,
            _page_token: Option<&str>,
        ) -> Result<Page, ProviderError> {
            self.pages
                .lock()
                .unwrap()
                .get_mut(&kind)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(Page { items: vec![], next_token: None }))
        }

        async fn fetch_one(&self, entity: &EntityRef) -> Result<Option<Value>, ProviderError> {
            Ok(self.singles.lock().unwrap().get(&entity.entity_id).cloned())
        }
    }

    fn case_item(id: &str, updated: &str) -> Value {
        json!({
            "accountId": "123456789012",
            "displayId": id,
            "timeCreated": "2025-01-10T12:00:00Z",
            "lastUpdatedTime": updated,
            "severityCode": "high",
            "status": "opened",
            "subject": "Latency spike",
            "categoryCode": "performance",
            "serviceCode": "compute"
        })
    }

    fn one_page(items: Vec<Value>) -> Vec<Result<Page, ProviderError>> {
        vec![Ok(Page { items, next_token: None })]
    }

    fn collector(provider: ScriptedProvider, lake: Arc<MemoryObjectStore>) -> Collector {
        Collector::new(Arc::new(provider), lake, None)
    }

    #[tokio::test]
    async fn test_backfill_case_only_writes_only_case_prefix() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::with_pages(
            EntityKind::Case,
            one_page(vec![case_item("c-1", "2025-01-11T00:00:00Z")]),
        );
        let collector = collector(provider, lake.clone());

        let report = collector
            .run(SyncMode::Backfill { days_back: 180 }, Selection::default())
            .await
            .unwrap();

        assert_eq!(report.written_total(), 1);
        assert_eq!(lake.list("case/").await.unwrap().len(), 1);
        assert!(lake.list("health/").await.unwrap().is_empty());
        assert!(lake.list("ta/").await.unwrap().is_empty());

        // Backfill initializes the checkpoint for the selected type only
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().is_some());
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Health).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingesting_same_batch_twice_is_idempotent() {
        let lake = Arc::new(MemoryObjectStore::new());
        let items = vec![
            case_item("c-1", "2025-01-11T00:00:00Z"),
            case_item("c-2", "2025-01-11T00:00:00Z"),
        ];

        let provider = ScriptedProvider::with_pages(EntityKind::Case, one_page(items.clone()));
        let collector1 = collector(provider, lake.clone());
        let first = collector1
            .run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap();
        assert_eq!(first.written_total(), 2);
        assert_eq!(lake.len().await, 3); // 2 objects + 1 checkpoint

        let provider = ScriptedProvider::with_pages(EntityKind::Case, one_page(items));
        let collector2 = collector(provider, lake.clone());
        let second = collector2
            .run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap();

        assert_eq!(second.written_total(), 0);
        assert_eq!(second.skipped_stale_total(), 2);
        assert_eq!(lake.len().await, 3);
    }

    #[tokio::test]
    async fn test_pagination_accumulates_all_pages() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::with_pages(
            EntityKind::Case,
            vec![
                Ok(Page {
                    items: vec![case_item("c-1", "2025-01-11T00:00:00Z")],
                    next_token: Some("p2".into()),
                }),
                Ok(Page {
                    items: vec![case_item("c-2", "2025-01-11T00:00:00Z")],
                    next_token: None,
                }),
            ],
        );
        let collector = collector(provider, lake.clone());

        let report = collector
            .run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap();

        assert_eq!(report.fetched_total(), 2);
        assert_eq!(report.written_total(), 2);
    }

    #[tokio::test]
    async fn test_malformed_entity_is_skipped_not_fatal() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::with_pages(
            EntityKind::Case,
            one_page(vec![
                case_item("c-1", "2025-01-11T00:00:00Z"),
                json!({"accountId": "123456789012"}), // no displayId
            ]),
        );
        let collector = collector(provider, lake.clone());

        let report = collector
            .run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap();

        assert_eq!(report.written_total(), 1);
        assert_eq!(report.failed_total(), 1);
    }

    #[tokio::test]
    async fn test_full_outage_escalates() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::with_pages(
            EntityKind::Case,
            vec![Err(ProviderError::Transient("connection refused".into()))],
        );
        let collector = collector(provider, lake.clone());

        let err = collector
            .run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CollectorError::ProviderOutage { attempted: 1 }));
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_not_advanced_for_abandoned_window() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::default();
        provider.add_pages(
            EntityKind::Case,
            one_page(vec![case_item("c-1", "2025-01-11T00:00:00Z")]),
        );
        provider.add_pages(
            EntityKind::Health,
            vec![Err(ProviderError::Transient("503".into()))],
        );
        let collector = collector(provider, lake.clone());

        let selection = Selection { case: true, health: true, ta: false };
        let report = collector
            .run(SyncMode::Incremental { days_back: 1 }, selection)
            .await
            .unwrap(); // one of two requests succeeded, not an outage

        assert_eq!(report.written_total(), 1);
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().is_some());
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Health).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_monotonic_across_incremental_runs() {
        let lake = Arc::new(MemoryObjectStore::new());

        let provider = ScriptedProvider::with_pages(EntityKind::Case, one_page(vec![]));
        let c1 = collector(provider, lake.clone());
        c1.run(SyncMode::Incremental { days_back: 1 }, Selection::default())
            .await
            .unwrap();
        let cp1 = load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().unwrap();

        let provider = ScriptedProvider::with_pages(EntityKind::Case, one_page(vec![]));
        let c2 = collector(provider, lake.clone());
        c2.run(SyncMode::Incremental { days_back: 1 }, Selection::default())
            .await
            .unwrap();
        let cp2 = load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().unwrap();

        assert!(cp2.last_synced_at >= cp1.last_synced_at);
    }

    #[tokio::test]
    async fn test_realtime_syncs_only_named_entity_and_skips_checkpoints() {
        let lake = Arc::new(MemoryObjectStore::new());
        let provider = ScriptedProvider::default();
        provider.add_single("c-9", case_item("c-9", "2025-01-12T00:00:00Z"));
        let collector = collector(provider, lake.clone());

        let entity = EntityRef {
            entity_type: EntityKind::Case,
            account_id: "123456789012".into(),
            entity_id: "c-9".into(),
        };
        let report = collector
            .run(
                SyncMode::Realtime { entity: entity.clone() },
                Selection::for_kind(entity.entity_type),
            )
            .await
            .unwrap();

        assert_eq!(report.written_total(), 1);
        assert_eq!(lake.list("case/").await.unwrap().len(), 1);
        assert!(load_checkpoint(lake.as_ref(), EntityKind::Case).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_realtime_update_loses_to_newer_version() {
        let lake = Arc::new(MemoryObjectStore::new());

        let provider = ScriptedProvider::with_pages(
            EntityKind::Case,
            one_page(vec![case_item("c-1", "2025-01-12T00:00:00Z")]),
        );
        let c1 = collector(provider, lake.clone());
        c1.run(SyncMode::Backfill { days_back: 30 }, Selection::default())
            .await
            .unwrap();

        // A realtime delivery carrying an older version must be rejected
        let provider = ScriptedProvider::default();
        provider.add_single("c-1", case_item("c-1", "2025-01-11T00:00:00Z"));
        let c2 = collector(provider, lake.clone());
        let entity = EntityRef {
            entity_type: EntityKind::Case,
            account_id: "123456789012".into(),
            entity_id: "c-1".into(),
        };
        let report = c2
            .run(SyncMode::Realtime { entity }, Selection::for_kind(EntityKind::Case))
            .await
            .unwrap();

        assert_eq!(report.skipped_stale_total(), 1);
        let key = "case/2025/01/123456789012-c-1.json";
        let stored: Record =
            serde_json::from_slice(&lake.get(key).await.unwrap().unwrap()).unwrap();
        assert_eq!(
            stored.last_updated_at().to_rfc3339(),
            "2025-01-12T00:00:00+00:00"
        );
    }

    #[test]
    fn test_route_trigger_defaults_to_incremental_case_only() {
        let msg: SyncTriggerMessage = serde_json::from_str(r#"{}"#).unwrap();
        let (mode, selection) = route_trigger(&msg);
        assert!(matches!(mode, SyncMode::Incremental { days_back: 1 }));
        assert_eq!(selection.kinds(), vec![EntityKind::Case]);
    }

    #[test]
    fn test_route_trigger_realtime_scopes_to_event_entity() {
        let msg: SyncTriggerMessage = serde_json::from_str(
            r#"{"entity": {"entity_type": "ta", "account_id": "a", "entity_id": "chk-1"}}"#,
        )
        .unwrap();
        let (mode, selection) = route_trigger(&msg);
        assert!(matches!(mode, SyncMode::Realtime { .. }));
        assert_eq!(selection.kinds(), vec![EntityKind::Ta]);
    }

    #[test]
    fn test_route_trigger_honors_flags() {
        let msg: SyncTriggerMessage =
            serde_json::from_str(r#"{"past_no_of_days": 3, "case": false, "ta": true}"#).unwrap();
        let (mode, selection) = route_trigger(&msg);
        assert!(matches!(mode, SyncMode::Incremental { days_back: 3 }));
        assert_eq!(selection.kinds(), vec![EntityKind::Ta]);
    }
}
