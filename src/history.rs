//! Local record of finished preload sessions

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::SystemTime;
use uuid::Uuid;

use crate::preload::{PreloadSummary, SessionPhase};

/// Default number of sessions kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// One finished session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub scene_id: String,
    /// Terminal phase: completed, cancelled or failed
    pub phase: SessionPhase,
    /// Absent when enumeration failed before any counts existed
    pub summary: Option<PreloadSummary>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

/// Bounded ring of [`SessionRecord`]s, oldest dropped first
#[derive(Debug)]
pub struct WorkHistoryLedger {
    records: RwLock<VecDeque<SessionRecord>>,
    capacity: usize,
}

impl Default for WorkHistoryLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl WorkHistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger keeping at most `capacity` records (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a record, dropping the oldest when full
    pub fn record(&self, record: SessionRecord) {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records oldest first
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// Records for one scene, oldest first
    pub fn for_scene(&self, scene_id: &str) -> Vec<SessionRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.scene_id == scene_id)
            .cloned()
            .collect()
    }

    /// Most recently recorded session
    pub fn latest(&self) -> Option<SessionRecord> {
        self.records.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scene_id: &str) -> SessionRecord {
        let now = SystemTime::now();
        SessionRecord {
            session_id: Uuid::new_v4(),
            scene_id: scene_id.to_string(),
            phase: SessionPhase::Completed,
            summary: None,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_ring_drops_oldest() {
        let ledger = WorkHistoryLedger::with_capacity(2);
        ledger.record(record("a"));
        ledger.record(record("b"));
        ledger.record(record("c"));
        let scenes: Vec<_> = ledger.records().into_iter().map(|r| r.scene_id).collect();
        assert_eq!(scenes, vec!["b", "c"]);
        assert_eq!(ledger.latest().unwrap().scene_id, "c");
    }

    #[test]
    fn test_for_scene_filters() {
        let ledger = WorkHistoryLedger::new();
        ledger.record(record("a"));
        ledger.record(record("b"));
        ledger.record(record("a"));
        assert_eq!(ledger.for_scene("a").len(), 2);
        ledger.clear();
        assert!(ledger.is_empty());
    }
}
