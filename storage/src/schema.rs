/// Schema version written to `task_metadata['schema_version']` on first init and checked on
/// every open. Bump this and add a migration branch in `Store::open` when the DDL changes.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

pub const CREATE_TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS task_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS journal_entries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    stack           TEXT NOT NULL,
    entry_type      TEXT NOT NULL,
    position        INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    description     TEXT NOT NULL,
    status          TEXT NOT NULL,
    instruction     TEXT,
    affected_path   TEXT,
    previous_crc    INTEGER,
    current_crc     INTEGER,
    checkpoint_name TEXT,
    UNIQUE(stack, position)
);

CREATE INDEX IF NOT EXISTS idx_journal_entries_stack_position ON journal_entries(stack, position);
CREATE INDEX IF NOT EXISTS idx_journal_entries_entry_type ON journal_entries(entry_type);
CREATE INDEX IF NOT EXISTS idx_journal_entries_created_at ON journal_entries(created_at);

CREATE TABLE IF NOT EXISTS file_snapshots (
    entry_id  INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    file_path TEXT NOT NULL,
    content   BLOB,
    file_size INTEGER NOT NULL,
    crc32c    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_snapshots_entry_id ON file_snapshots(entry_id);
CREATE INDEX IF NOT EXISTS idx_file_snapshots_file_path ON file_snapshots(file_path);

CREATE TABLE IF NOT EXISTS diff_stats (
    entry_id        INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    file_path       TEXT NOT NULL,
    lines_added     INTEGER NOT NULL,
    lines_deleted   INTEGER NOT NULL,
    affected_blocks INTEGER NOT NULL,
    unified_diff    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_diff_stats_entry_id ON diff_stats(entry_id);

CREATE TABLE IF NOT EXISTS task_counters (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL DEFAULT 0
);
";
