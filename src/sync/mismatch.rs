//! Collection of books the resolver could not confidently map.

use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

/// Snapshot of an unresolved or ambiguous book, kept for end-of-run
/// reporting and manual follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct MismatchRecord {
    pub item_id: String,
    pub title: String,
    pub author: String,
    pub asin: Option<String>,
    pub isbn: Option<String>,
    /// Best-known partial match, when a book was found but an edition wasn't.
    pub book_id: Option<i64>,
    pub edition_id: Option<i64>,
    pub reason: String,
}

/// Shared sink of mismatches for one run. Cleared at the start of each full
/// run so the list never grows across runs.
#[derive(Default)]
pub struct MismatchCollector {
    inner: Mutex<Vec<MismatchRecord>>,
}

impl MismatchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("mismatch mutex poisoned").clear();
    }

    pub fn record(&self, record: MismatchRecord) {
        tracing::debug!(
            item = %record.item_id,
            title = %record.title,
            reason = %record.reason,
            "Recording mismatch"
        );
        self.inner
            .lock()
            .expect("mismatch mutex poisoned")
            .push(record);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("mismatch mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone out the collected records for reporting.
    pub fn export(&self) -> Vec<MismatchRecord> {
        self.inner.lock().expect("mismatch mutex poisoned").clone()
    }

    /// Write the collected records to a JSON file.
    pub fn export_to_file(&self, path: &Path) -> std::io::Result<()> {
        let records = self.export();
        let payload = serde_json::to_vec_pretty(&records)?;
        std::fs::write(path, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(item: &str, reason: &str) -> MismatchRecord {
        MismatchRecord {
            item_id: item.to_string(),
            title: "Some Book".to_string(),
            author: "Some Author".to_string(),
            asin: None,
            isbn: None,
            book_id: None,
            edition_id: None,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_record_and_export() {
        let collector = MismatchCollector::new();
        assert!(collector.is_empty());
        collector.record(sample("li_1", "no match"));
        collector.record(sample("li_2", "no audiobook edition"));
        let records = collector.export();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item_id, "li_1");
    }

    #[test]
    fn test_clear_resets_between_runs() {
        let collector = MismatchCollector::new();
        collector.record(sample("li_1", "no match"));
        collector.clear();
        assert!(collector.is_empty());
    }

    #[test]
    fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mismatches.json");
        let collector = MismatchCollector::new();
        collector.record(sample("li_1", "no match"));
        collector.export_to_file(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["item_id"], "li_1");
    }
}
