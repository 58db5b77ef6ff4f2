//! Per-request structured records.
//!
//! Every served HTTP request produces one record: method, path, status,
//! source address, headers, body, timestamp, and the matched rule id when
//! there is one. Records land in a bounded in-memory buffer and fan out over
//! a broadcast channel so collaborators (a log viewer, an exporter) can tail
//! the stream without the engine knowing about them.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Source address of the connection, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// Matched rule, absent for fall-throughs and not-founds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl RequestRecord {
    pub fn new(
        method: &str,
        path: &str,
        status: u16,
        source: Option<String>,
        headers: HashMap<String, String>,
        body: String,
        rule_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            source,
            headers,
            body,
            rule_id,
        }
    }
}

/// Bounded in-memory record buffer with broadcast fan-out.
pub struct RecordStream {
    records: RwLock<VecDeque<Arc<RequestRecord>>>,
    capacity: usize,
    tx: broadcast::Sender<Arc<RequestRecord>>,
}

impl RecordStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    /// Append a record, evicting the oldest past capacity.
    pub fn append(&self, record: RequestRecord) {
        info!(
            method = %record.method,
            path = %record.path,
            status = record.status,
            rule = record.rule_id.as_deref().unwrap_or("-"),
            "request served"
        );

        let record = Arc::new(record);
        {
            let mut records = self.records.write();
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(Arc::clone(&record));
        }
        // Nobody listening is fine.
        let _ = self.tx.send(record);
    }

    /// Snapshot of the buffered records, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<RequestRecord>> {
        self.records.read().iter().cloned().collect()
    }

    /// Live subscription; each subscriber sees records appended after the
    /// call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RequestRecord>> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, status: u16) -> RequestRecord {
        RequestRecord::new("GET", path, status, None, HashMap::new(), String::new(), None)
    }

    #[test]
    fn append_and_snapshot() {
        let stream = RecordStream::new(10);
        stream.append(record("/a", 200));
        stream.append(record("/b", 404));

        let snapshot = stream.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, "/a");
        assert_eq!(snapshot[1].path, "/b");
        assert_eq!(snapshot[1].status, 404);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let stream = RecordStream::new(2);
        stream.append(record("/1", 200));
        stream.append(record("/2", 200));
        stream.append(record("/3", 200));

        let snapshot = stream.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, "/2");
        assert_eq!(snapshot[1].path, "/3");
    }

    #[tokio::test]
    async fn subscribers_see_new_records() {
        let stream = RecordStream::new(8);
        let mut rx = stream.subscribe();
        stream.append(record("/live", 201));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.path, "/live");
        assert_eq!(received.status, 201);
    }

    #[test]
    fn records_serialize_camel_case() {
        let json = serde_json::to_string(&record("/x", 200)).unwrap();
        assert!(json.contains("\"timestamp\""));
        assert!(!json.contains("rule_id"));
    }
}
