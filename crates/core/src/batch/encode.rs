//! Wire encoding for flushed batches.
//!
//! Entries are serialized as a JSON array, compressed with zstd, base64-encoded
//! and cut into fixed-size text chunks:
//!
//! ```text
//! [{"path":"/src/a.js","timestamp":1700000000000,"type":"MODIFY","directory":false}, ...]
//!   -> zstd -> base64 (standard alphabet) -> chunk_1 .. chunk_n
//! ```

use crate::error::{FilewatchError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use filewatchd_api::{ChangedFileEntry, EventType};
use serde::{Deserialize, Serialize};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub path: String,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub directory: bool,
}

impl From<&ChangedFileEntry> for WireEntry {
    fn from(entry: &ChangedFileEntry) -> Self {
        Self {
            path: entry.relative_path.clone(),
            timestamp: entry.observed_at_millis,
            event_type: entry.event_type,
            directory: entry.is_directory,
        }
    }
}

/// One flushed unit ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub project_id: String,
    pub latest_timestamp: u64,
    pub chunks: Vec<String>,
    pub entry_count: usize,
}

/// Sorts by observation time and collapses consecutive duplicates, keeping the latest.
pub fn prepare_entries(mut entries: Vec<ChangedFileEntry>) -> Vec<ChangedFileEntry> {
    entries.sort_by_key(|e| e.observed_at_millis);

    let mut out: Vec<ChangedFileEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match out.last_mut() {
            Some(last)
                if last.relative_path == entry.relative_path
                    && last.event_type == entry.event_type
                    && last.is_directory == entry.is_directory =>
            {
                *last = entry;
            }
            _ => out.push(entry),
        }
    }
    out
}

pub fn encode_entries(entries: &[ChangedFileEntry], chunk_size: usize) -> Result<Vec<String>> {
    let wire: Vec<WireEntry> = entries.iter().map(WireEntry::from).collect();
    let json = serde_json::to_vec(&wire)?;
    let compressed = zstd::encode_all(&json[..], ZSTD_LEVEL)?;
    let encoded = STANDARD.encode(compressed);

    encoded
        .as_bytes()
        .chunks(chunk_size.max(1))
        .map(|chunk| {
            std::str::from_utf8(chunk)
                .map(str::to_owned)
                .map_err(|e| FilewatchError::Encoding(e.to_string()))
        })
        .collect()
}

/// Inverse of [`encode_entries`], for diagnostics and receivers.
pub fn decode_chunks(chunks: &[String]) -> Result<Vec<WireEntry>> {
    let joined = chunks.concat();
    let compressed = STANDARD
        .decode(joined.as_bytes())
        .map_err(|e| FilewatchError::Encoding(e.to_string()))?;
    let json = zstd::decode_all(&compressed[..])?;
    Ok(serde_json::from_slice(&json)?)
}

/// Builds a batch from raw pending entries; `None` when nothing remains.
pub fn build_batch(
    project_id: &str,
    entries: Vec<ChangedFileEntry>,
    chunk_size: usize,
) -> Result<Option<ChangeBatch>> {
    let entries = prepare_entries(entries);
    let Some(latest) = entries.last().map(|e| e.observed_at_millis) else {
        return Ok(None);
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        let count = |t: EventType| entries.iter().filter(|e| e.event_type == t).count();
        tracing::debug!(
            "Batch for {}: {} entries (create={}, modify={}, delete={}), latest={}",
            project_id,
            entries.len(),
            count(EventType::Create),
            count(EventType::Modify),
            count(EventType::Delete),
            latest
        );
    }

    let chunks = encode_entries(&entries, chunk_size)?;
    Ok(Some(ChangeBatch {
        project_id: project_id.to_string(),
        latest_timestamp: latest,
        chunks,
        entry_count: entries.len(),
    }))
}
