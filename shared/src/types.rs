use std::fmt;

/// Identifier of a Task. `"default"` denotes the ephemeral, in-memory task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

pub const DEFAULT_TASK_ID: &str = "default";

impl TaskId {
    pub fn new(id: impl Into<String>) -> TaskId {
        TaskId(id.into())
    }

    pub fn default_task() -> TaskId {
        TaskId(DEFAULT_TASK_ID.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_TASK_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        TaskId::new(value)
    }
}

/// Monotonic journal entry id, unique within a task, never reused.
pub type EntryId = u64;

/// A content-identity assigned by the lineage tracker. Not persisted across restarts.
pub type FileIdentity = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Undo,
    Redo,
}

impl Stack {
    pub fn opposite(self) -> Stack {
        match self {
            Stack::Undo => Stack::Redo,
            Stack::Redo => Stack::Undo,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stack::Undo => "undo",
            Stack::Redo => "redo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Transaction,
    Checkpoint,
    ExternalChange,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Transaction => "transaction",
            EntryType::Checkpoint => "checkpoint",
            EntryType::ExternalChange => "external_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Committed,
    RolledBack,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Committed => "committed",
            EntryStatus::RolledBack => "rolled_back",
        }
    }
}
