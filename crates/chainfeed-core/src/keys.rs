//! Storage key naming, shared by every backend and by downstream readers.

/// Key of the record holding the `cursor` field for `chain_id`.
pub fn cursor_key(chain_id: &str) -> String {
    format!("{chain_id}:block-cursor")
}

/// Key of the append-only block log for `chain_id`.
pub fn stream_key(chain_id: &str) -> String {
    format!("{chain_id}:block-stream")
}

/// Field name of the cursor inside the cursor record.
pub const CURSOR_FIELD: &str = "cursor";

/// Field name of the payload inside each log entry.
pub const DATA_FIELD: &str = "data";
