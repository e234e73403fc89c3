use crate::model::{
    entry_status_from_sql, entry_status_to_sql, entry_type_from_sql, entry_type_to_sql, stack_from_sql,
    stack_to_sql, DiffStat, FileSnapshotRow, JournalEntryRow, NewJournalEntry, TaskCounterRow,
};
use crate::schema::{CREATE_TABLES_SQL, SCHEMA_VERSION, SCHEMA_VERSION_KEY};
use nts_shared::{EntryId, EntryStatus, NtsError, Stack};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Embedded, schema-versioned journal store: one `rusqlite::Connection` per task, either
/// file-backed (persistent tasks) or `:memory:` (the ephemeral `default` task, and tests).
/// Every public method borrows the connection for a single statement, or a single explicit
/// SQLite transaction when more than one statement must commit atomically — no connection
/// outlives a tool call.
pub struct JournalStore {
    conn: Connection,
}

impl JournalStore {
    pub fn open_in_memory() -> Result<JournalStore, NtsError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    /// Opens (creating if absent) the task's `journal.sqlite3` file. Parent directories must
    /// already exist; the Task Context Registry creates the task directory before calling this.
    pub fn open_at(path: &Path) -> Result<JournalStore, NtsError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<JournalStore, NtsError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(store_err)?;
        conn.execute_batch(CREATE_TABLES_SQL).map_err(store_err)?;

        let store = JournalStore { conn };
        match store.get_metadata(SCHEMA_VERSION_KEY)? {
            None => store.set_metadata(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())?,
            Some(found) => {
                let found_version: i64 = found.parse().map_err(|_| NtsError::SchemaUnknownVersion(-1))?;
                if found_version != SCHEMA_VERSION {
                    log::error!("journal schema mismatch: found {}, expected {}", found_version, SCHEMA_VERSION);
                    return Err(NtsError::SchemaIncompatible { found: found_version, expected: SCHEMA_VERSION });
                }
            }
        }
        Ok(store)
    }

    pub fn append_entry(&self, entry: NewJournalEntry) -> Result<EntryId, NtsError> {
        let position = self.next_position(entry.stack)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO journal_entries
                 (stack, entry_type, position, created_at, description, status, instruction,
                  affected_path, previous_crc, current_crc, checkpoint_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    stack_to_sql(entry.stack),
                    entry_type_to_sql(entry.entry_type),
                    position,
                    created_at,
                    entry.description,
                    entry_status_to_sql(entry.status),
                    entry.instruction,
                    entry.affected_path,
                    entry.previous_crc,
                    entry.current_crc,
                    entry.checkpoint_name,
                ],
            )
            .map_err(store_err)?;

        Ok(self.conn.last_insert_rowid() as EntryId)
    }

    pub fn mark_status(&self, entry_id: EntryId, status: EntryStatus) -> Result<(), NtsError> {
        self.conn
            .execute(
                "UPDATE journal_entries SET status = ?1 WHERE id = ?2",
                params![entry_status_to_sql(status), entry_id as i64],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn peek_top(&self, stack: Stack) -> Result<Option<JournalEntryRow>, NtsError> {
        self.top_of(stack)
    }

    /// Returns the current top of `stack` without mutating it. The caller completes the
    /// logical pop by calling [`JournalStore::push_to_opposite_stack`] (the entry transitions)
    /// — there is no separate destructive removal; entries are only ever destroyed by
    /// [`JournalStore::truncate_redo`] or an explicit task reset.
    pub fn pop_top(&self, stack: Stack) -> Result<Option<JournalEntryRow>, NtsError> {
        self.top_of(stack)
    }

    fn top_of(&self, stack: Stack) -> Result<Option<JournalEntryRow>, NtsError> {
        self.conn
            .query_row(
                "SELECT id, stack, entry_type, position, created_at, description, status,
                        instruction, affected_path, previous_crc, current_crc, checkpoint_name
                 FROM journal_entries WHERE stack = ?1 ORDER BY position DESC LIMIT 1",
                params![stack_to_sql(stack)],
                Self::row_to_entry,
            )
            .optional()
            .map_err(store_err)
    }

    /// Moves `entry_id` to the opposite stack, assigning it the next dense position there.
    /// Its `file_snapshots`/`diff_stats` children keep pointing at the same `entry_id`, so no
    /// data migration is needed.
    pub fn push_to_opposite_stack(&self, entry_id: EntryId) -> Result<(), NtsError> {
        let current_stack = self
            .conn
            .query_row(
                "SELECT stack FROM journal_entries WHERE id = ?1",
                params![entry_id as i64],
                |row| row.get::<_, String>(0),
            )
            .map_err(store_err)?;
        let current_stack = stack_from_sql(&current_stack).ok_or_else(|| NtsError::Store("corrupt stack column".into()))?;
        let target = current_stack.opposite();
        let position = self.next_position(target)?;

        self.conn
            .execute(
                "UPDATE journal_entries SET stack = ?1, position = ?2 WHERE id = ?3",
                params![stack_to_sql(target), position, entry_id as i64],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Destroys every entry (and cascading snapshots/diffs) currently on the redo stack.
    /// Called when a new transaction starts, per the commit/rollback lifecycle.
    pub fn truncate_redo(&self) -> Result<(), NtsError> {
        let removed = self
            .conn
            .execute("DELETE FROM journal_entries WHERE stack = ?1", params![stack_to_sql(Stack::Redo)])
            .map_err(store_err)?;
        if removed > 0 {
            log::debug!("truncated {} redo entries", removed);
        }
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, NtsError> {
        self.conn
            .query_row("SELECT value FROM task_metadata WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(store_err)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), NtsError> {
        self.conn
            .execute(
                "INSERT INTO task_metadata (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Adds `delta` to counter `name` (creating it at `delta` if absent) and returns the new value.
    pub fn bump_counter(&self, name: &str, delta: i64) -> Result<i64, NtsError> {
        self.conn
            .query_row(
                "INSERT INTO task_counters (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = value + excluded.value
                 RETURNING value",
                params![name, delta],
                |row| row.get(0),
            )
            .map_err(store_err)
    }

    pub fn get_counter(&self, name: &str) -> Result<TaskCounterRow, NtsError> {
        let value = self
            .conn
            .query_row("SELECT value FROM task_counters WHERE name = ?1", params![name], |row| row.get(0))
            .optional()
            .map_err(store_err)?
            .unwrap_or(0);
        Ok(TaskCounterRow { name: name.to_string(), value })
    }

    pub fn attach_snapshot(
        &self,
        entry_id: EntryId,
        file_path: &str,
        content: Option<&[u8]>,
        file_size: u64,
        crc32c: u32,
    ) -> Result<(), NtsError> {
        self.conn
            .execute(
                "INSERT INTO file_snapshots (entry_id, file_path, content, file_size, crc32c)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry_id as i64, file_path, content, file_size as i64, crc32c],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn attach_diff(&self, diff: &DiffStat) -> Result<(), NtsError> {
        self.conn
            .execute(
                "INSERT INTO diff_stats (entry_id, file_path, lines_added, lines_deleted, affected_blocks, unified_diff)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    diff.entry_id as i64,
                    diff.file_path,
                    diff.lines_added as i64,
                    diff.lines_deleted as i64,
                    diff.affected_blocks as i64,
                    diff.unified_diff,
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    pub fn snapshots_for_entry(&self, entry_id: EntryId) -> Result<Vec<FileSnapshotRow>, NtsError> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry_id, file_path, content, file_size, crc32c FROM file_snapshots WHERE entry_id = ?1")
            .map_err(store_err)?;

        let rows = stmt
            .query_map(params![entry_id as i64], |row| {
                Ok(FileSnapshotRow {
                    entry_id: row.get::<_, i64>(0)? as EntryId,
                    file_path: row.get(1)?,
                    content: row.get(2)?,
                    file_size: row.get::<_, i64>(3)? as u64,
                    crc32c: row.get(4)?,
                })
            })
            .map_err(store_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn next_position(&self, stack: Stack) -> Result<i64, NtsError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM journal_entries WHERE stack = ?1",
                params![stack_to_sql(stack)],
                |row| row.get(0),
            )
            .map_err(store_err)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<JournalEntryRow> {
        let stack_raw: String = row.get(1)?;
        let entry_type_raw: String = row.get(2)?;
        let status_raw: String = row.get(6)?;

        Ok(JournalEntryRow {
            id: row.get::<_, i64>(0)? as EntryId,
            stack: stack_from_sql(&stack_raw).unwrap_or(Stack::Undo),
            entry_type: entry_type_from_sql(&entry_type_raw).unwrap_or(nts_shared::EntryType::Transaction),
            position: row.get(3)?,
            created_at: row.get(4)?,
            description: row.get(5)?,
            status: entry_status_from_sql(&status_raw).unwrap_or(EntryStatus::Committed),
            instruction: row.get(7)?,
            affected_path: row.get(8)?,
            previous_crc: row.get(9)?,
            current_crc: row.get(10)?,
            checkpoint_name: row.get(11)?,
        })
    }
}

fn store_err(e: rusqlite::Error) -> NtsError {
    NtsError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nts_shared::{EntryStatus, EntryType};

    fn new_entry(stack: Stack, description: &str) -> NewJournalEntry {
        NewJournalEntry {
            stack,
            entry_type: EntryType::Transaction,
            description: description.to_string(),
            status: EntryStatus::Committed,
            instruction: None,
            affected_path: Some("/work/a.txt".to_string()),
            previous_crc: Some(1),
            current_crc: Some(2),
            checkpoint_name: None,
        }
    }

    #[test]
    fn append_then_peek_returns_same_entry() {
        let store = JournalStore::open_in_memory().unwrap();
        let id = store.append_entry(new_entry(Stack::Undo, "edit a.txt")).unwrap();

        let top = store.peek_top(Stack::Undo).unwrap().unwrap();
        assert_eq!(top.id, id);
        assert_eq!(top.description, "edit a.txt");
        assert_eq!(top.status, EntryStatus::Committed);
    }

    #[test]
    fn push_to_opposite_stack_moves_entry_and_keeps_snapshots() {
        let store = JournalStore::open_in_memory().unwrap();
        let id = store.append_entry(new_entry(Stack::Undo, "edit a.txt")).unwrap();
        store.attach_snapshot(id, "/work/a.txt", Some(b"old"), 3, 7).unwrap();

        store.mark_status(id, EntryStatus::RolledBack).unwrap();
        store.push_to_opposite_stack(id).unwrap();

        assert!(store.peek_top(Stack::Undo).unwrap().is_none());
        let top = store.peek_top(Stack::Redo).unwrap().unwrap();
        assert_eq!(top.id, id);
        assert_eq!(top.status, EntryStatus::RolledBack);

        let snapshots = store.snapshots_for_entry(id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].content.as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn truncate_redo_removes_entries_and_cascades_snapshots() {
        let store = JournalStore::open_in_memory().unwrap();
        let id = store.append_entry(new_entry(Stack::Redo, "undone edit")).unwrap();
        store.attach_snapshot(id, "/work/a.txt", Some(b"x"), 1, 1).unwrap();

        store.truncate_redo().unwrap();

        assert!(store.peek_top(Stack::Redo).unwrap().is_none());
        assert!(store.snapshots_for_entry(id).unwrap().is_empty());
    }

    #[test]
    fn bump_counter_accumulates() {
        let store = JournalStore::open_in_memory().unwrap();
        assert_eq!(store.bump_counter("totalEdits", 1).unwrap(), 1);
        assert_eq!(store.bump_counter("totalEdits", 1).unwrap(), 2);
        assert_eq!(store.get_counter("totalEdits").unwrap().value, 2);
    }

    #[test]
    fn metadata_roundtrips_and_upserts() {
        let store = JournalStore::open_in_memory().unwrap();
        assert_eq!(store.get_metadata("custom").unwrap(), None);
        store.set_metadata("custom", "v1").unwrap();
        store.set_metadata("custom", "v2").unwrap();
        assert_eq!(store.get_metadata("custom").unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn reopening_in_memory_store_has_schema_version_set() {
        let store = JournalStore::open_in_memory().unwrap();
        assert_eq!(store.get_metadata(crate::schema::SCHEMA_VERSION_KEY).unwrap(), Some("1".to_string()));
    }
}
