use nts_shared::{EntryId, EntryStatus, EntryType, Stack};

/// A journal entry as stored, deserialized back into the §3 data-model shape.
#[derive(Debug, Clone)]
pub struct JournalEntryRow {
    pub id: EntryId,
    pub stack: Stack,
    pub entry_type: EntryType,
    pub position: i64,
    pub created_at: String,
    pub description: String,
    pub status: EntryStatus,
    pub instruction: Option<String>,
    pub affected_path: Option<String>,
    pub previous_crc: Option<u32>,
    pub current_crc: Option<u32>,
    pub checkpoint_name: Option<String>,
}

/// Fields needed to append a new entry; `id` and `position` are assigned by the store.
pub struct NewJournalEntry {
    pub stack: Stack,
    pub entry_type: EntryType,
    pub description: String,
    pub status: EntryStatus,
    pub instruction: Option<String>,
    pub affected_path: Option<String>,
    pub previous_crc: Option<u32>,
    pub current_crc: Option<u32>,
    pub checkpoint_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileSnapshotRow {
    pub entry_id: EntryId,
    pub file_path: String,
    /// `None` encodes "the file did not exist" at snapshot time; undo deletes it instead of
    /// writing back content.
    pub content: Option<Vec<u8>>,
    pub file_size: u64,
    pub crc32c: u32,
}

#[derive(Debug, Clone)]
pub struct DiffStat {
    pub entry_id: EntryId,
    pub file_path: String,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub affected_blocks: u64,
    pub unified_diff: String,
}

#[derive(Debug, Clone)]
pub struct TaskCounterRow {
    pub name: String,
    pub value: i64,
}

pub fn stack_to_sql(stack: Stack) -> &'static str {
    stack.as_str()
}

pub fn stack_from_sql(value: &str) -> Option<Stack> {
    match value {
        "undo" => Some(Stack::Undo),
        "redo" => Some(Stack::Redo),
        _ => None,
    }
}

pub fn entry_type_to_sql(entry_type: EntryType) -> &'static str {
    entry_type.as_str()
}

pub fn entry_type_from_sql(value: &str) -> Option<EntryType> {
    match value {
        "transaction" => Some(EntryType::Transaction),
        "checkpoint" => Some(EntryType::Checkpoint),
        "external_change" => Some(EntryType::ExternalChange),
        _ => None,
    }
}

pub fn entry_status_to_sql(status: EntryStatus) -> &'static str {
    status.as_str()
}

pub fn entry_status_from_sql(value: &str) -> Option<EntryStatus> {
    match value {
        "committed" => Some(EntryStatus::Committed),
        "rolled_back" => Some(EntryStatus::RolledBack),
        _ => None,
    }
}
