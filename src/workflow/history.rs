use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Entry type in the conversation log. `ErrorContext` entries are the sole
/// carrier of error state across retries; `Interrupted` marks partial
/// writes from cancelled queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    System,
    Agent,
    ErrorContext,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub content: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, content: impl Into<String>, metadata: Value) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// Pluggable persistence substrate for per-thread conversation history.
/// Distinct thread ids are fully independent.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, thread_id: &str, entry: HistoryEntry);
    async fn entries(&self, thread_id: &str) -> Vec<HistoryEntry>;
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    threads: RwLock<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, thread_id: &str, entry: HistoryEntry) {
        let mut threads = self.threads.write().await;
        threads.entry(thread_id.to_string()).or_default().push(entry);
    }

    async fn entries(&self, thread_id: &str) -> Vec<HistoryEntry> {
        let threads = self.threads.read().await;
        threads.get(thread_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn threads_are_independent() {
        let store = InMemoryHistoryStore::new();
        store
            .append(
                "t1",
                HistoryEntry::new(HistoryKind::Agent, "first", json!({"sql": "SELECT 1"})),
            )
            .await;
        store
            .append("t2", HistoryEntry::new(HistoryKind::System, "other", json!({})))
            .await;

        assert_eq!(store.entries("t1").await.len(), 1);
        assert_eq!(store.entries("t2").await.len(), 1);
        assert!(store.entries("t3").await.is_empty());
    }

    #[tokio::test]
    async fn entries_preserve_append_order() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            store
                .append(
                    "t",
                    HistoryEntry::new(HistoryKind::System, format!("entry {i}"), json!({})),
                )
                .await;
        }

        let entries = store.entries("t").await;
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["entry 0", "entry 1", "entry 2", "entry 3", "entry 4"]);
    }
}
