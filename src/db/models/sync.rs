use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Auto,
    Manual,
    Startup,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Auto => "auto",
            SyncType::Manual => "manual",
            SyncType::Startup => "startup",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => SyncType::Manual,
            "startup" => SyncType::Startup,
            _ => SyncType::Auto,
        }
    }
}

/// One ingestion pass as recorded in `sync_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub sync_type: SyncType,
    pub runs_added: i64,
    pub characters_processed: i64,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}
