use crate::lineage::FileLineageTracker;
use nts_shared::{EntryId, EntryStatus, EntryType, NtsError, SafeFileIo, Stack};
use nts_storage::{compute_diff_stat, FileSnapshotRow, JournalStore, NewJournalEntry};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A mutation captured before it happens, per `backup(path)`. `content = None` encodes "the
/// file did not exist"; undo then deletes rather than writes back.
#[derive(Debug, Clone)]
pub struct BufferedSnapshot {
    pub path: String,
    pub content: Option<Vec<u8>>,
    pub crc32c: u32,
    pub file_size: u64,
}

struct TransactionFrame {
    description: String,
    instruction: Option<String>,
    created_files: HashSet<String>,
    accessed_files: HashSet<String>,
    snapshots: Vec<BufferedSnapshot>,
}

impl TransactionFrame {
    fn new(description: impl Into<String>, instruction: Option<String>) -> TransactionFrame {
        TransactionFrame {
            description: description.into(),
            instruction,
            created_files: HashSet::new(),
            accessed_files: HashSet::new(),
            snapshots: Vec::new(),
        }
    }
}

/// Outcome of resolving a snapshot's restore target across a possible rename, per the
/// "smart undo" rule of §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoResult {
    pub original_path: String,
    pub resolved_path: String,
    pub followed_rename: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    Applied(UndoResult),
    NothingToUndo,
}

/// Owns the undo/redo stacks (backed by the Journal Store) plus the nested-transaction frame
/// stack. One instance per task, guarded by a single mutex acquired once per tool call — inner
/// components must not re-enter it (Design Note §9).
pub struct TransactionManager {
    store: Arc<JournalStore>,
    safe_io: Arc<SafeFileIo>,
    frames: Mutex<Vec<TransactionFrame>>,
}

impl TransactionManager {
    pub fn new(store: Arc<JournalStore>, safe_io: Arc<SafeFileIo>) -> TransactionManager {
        TransactionManager { store, safe_io, frames: Mutex::new(Vec::new()) }
    }

    pub fn is_transaction_open(&self) -> bool {
        !self.frames.lock().unwrap().is_empty()
    }

    /// Opens a logical transaction. If one is already open, the new one nests: its snapshots
    /// merge into the outer frame on commit, and a nested rollback unwinds only this layer.
    /// Starting an outermost transaction truncates the redo stack.
    pub fn start_transaction(&self, description: impl Into<String>, instruction: Option<String>) -> Result<(), NtsError> {
        let mut frames = self.frames.lock().unwrap();
        if frames.is_empty() {
            self.store.truncate_redo()?;
        }
        frames.push(TransactionFrame::new(description, instruction));
        Ok(())
    }

    /// Captures `path`'s current bytes into the innermost open frame's buffer. Must be called
    /// before the mutating tool performs its Safe I/O write.
    pub fn backup(&self, path: &str, content: Option<Vec<u8>>, crc32c: u32, file_size: u64) -> Result<(), NtsError> {
        let mut frames = self.frames.lock().unwrap();
        let frame = frames.last_mut().ok_or(NtsError::NoActiveTransaction)?;
        frame.accessed_files.insert(path.to_string());
        frame.snapshots.push(BufferedSnapshot { path: path.to_string(), content, crc32c, file_size });
        Ok(())
    }

    pub fn mark_created(&self, path: &str) -> Result<(), NtsError> {
        let mut frames = self.frames.lock().unwrap();
        let frame = frames.last_mut().ok_or(NtsError::NoActiveTransaction)?;
        frame.created_files.insert(path.to_string());
        Ok(())
    }

    pub fn is_accessed_in_transaction(&self, path: &str) -> bool {
        self.frames.lock().unwrap().iter().any(|frame| frame.accessed_files.contains(path))
    }

    /// Marks `path` as accessed in the innermost open transaction, without buffering a
    /// snapshot. Used by the façade's `read` tool so a mid-transaction re-read can bypass a
    /// stale path-hash check (Open Question resolution, §9).
    pub fn mark_accessed(&self, path: &str) {
        if let Some(frame) = self.frames.lock().unwrap().last_mut() {
            frame.accessed_files.insert(path.to_string());
        }
    }

    /// Commits the innermost frame. A nested commit merges its buffer into the parent frame and
    /// persists nothing. An outermost commit writes one `TRANSACTION` entry plus its snapshots
    /// and diffs, truncates the redo stack, and bumps `totalEdits`.
    pub fn commit(&self) -> Result<Option<EntryId>, NtsError> {
        let mut frames = self.frames.lock().unwrap();
        let frame = frames.pop().ok_or(NtsError::NoActiveTransaction)?;

        if let Some(parent) = frames.last_mut() {
            parent.snapshots.extend(frame.snapshots);
            parent.created_files.extend(frame.created_files);
            parent.accessed_files.extend(frame.accessed_files);
            return Ok(None);
        }
        drop(frames);

        if frame.snapshots.is_empty() {
            return Ok(None);
        }

        let affected_path = if frame.snapshots.len() == 1 { Some(frame.snapshots[0].path.clone()) } else { None };
        let entry_id = self.store.append_entry(NewJournalEntry {
            stack: Stack::Undo,
            entry_type: EntryType::Transaction,
            description: frame.description,
            status: EntryStatus::Committed,
            instruction: frame.instruction,
            affected_path,
            previous_crc: None,
            current_crc: None,
            checkpoint_name: None,
        })?;

        for snapshot in &frame.snapshots {
            self.store.attach_snapshot(
                entry_id,
                &snapshot.path,
                snapshot.content.as_deref(),
                snapshot.file_size,
                snapshot.crc32c,
            )?;

            if let Some(before) = snapshot.content.as_deref().and_then(|bytes| std::str::from_utf8(bytes).ok()) {
                if let Ok(after_bytes) = self.safe_io.read_all(Path::new(&snapshot.path)) {
                    if let Ok(after) = std::str::from_utf8(&after_bytes) {
                        let diff = compute_diff_stat(entry_id, &snapshot.path, before, after);
                        self.store.attach_diff(&diff)?;
                    }
                }
            }
        }

        self.store.truncate_redo()?;
        self.store.bump_counter("totalEdits", 1)?;
        log::debug!("committed entry {} with {} snapshot(s)", entry_id, frame.snapshots.len());
        Ok(Some(entry_id))
    }

    /// Aborts the innermost frame: restores every buffered snapshot (deleting files that did
    /// not exist before) and discards the frame. Never touches the journal.
    pub fn rollback(&self) -> Result<(), NtsError> {
        let frame = {
            let mut frames = self.frames.lock().unwrap();
            frames.pop().ok_or(NtsError::NoActiveTransaction)?
        };

        for snapshot in frame.snapshots.iter().rev() {
            self.restore_snapshot_bytes(&snapshot.path, snapshot.content.as_deref())?;
        }
        Ok(())
    }

    pub fn create_checkpoint(&self, name: &str) -> Result<EntryId, NtsError> {
        self.store.append_entry(NewJournalEntry {
            stack: Stack::Undo,
            entry_type: EntryType::Checkpoint,
            description: format!("checkpoint {}", name),
            status: EntryStatus::Committed,
            instruction: None,
            affected_path: None,
            previous_crc: None,
            current_crc: None,
            checkpoint_name: Some(name.to_string()),
        })
    }

    /// Undoes, oldest-first, every `TRANSACTION`/`EXTERNAL_CHANGE` entry strictly above the
    /// named checkpoint; the checkpoint entry itself remains at the top of the undo stack.
    pub fn rollback_to_checkpoint(&self, name: &str, lineage: &FileLineageTracker) -> Result<Vec<UndoResult>, NtsError> {
        let mut undone = Vec::new();
        loop {
            let Some(top) = self.store.peek_top(Stack::Undo)? else {
                return Err(NtsError::CheckpointNotFound(name.to_string()));
            };
            if top.entry_type == EntryType::Checkpoint {
                if top.checkpoint_name.as_deref() == Some(name) {
                    return Ok(undone);
                }
                return Err(NtsError::CheckpointNotFound(name.to_string()));
            }

            match self.undo(lineage)? {
                UndoOutcome::Applied(result) => undone.push(result),
                UndoOutcome::NothingToUndo => return Err(NtsError::CheckpointNotFound(name.to_string())),
            }
        }
    }

    /// Pops the undo stack. `CHECKPOINT` markers are discarded (moved to redo, processing
    /// continues); `TRANSACTION`/`EXTERNAL_CHANGE` entries restore their snapshots, following a
    /// rename via the lineage tracker if the file has since moved ("smart undo").
    pub fn undo(&self, lineage: &FileLineageTracker) -> Result<UndoOutcome, NtsError> {
        loop {
            let Some(top) = self.store.pop_top(Stack::Undo)? else {
                return Ok(UndoOutcome::NothingToUndo);
            };

            if top.entry_type == EntryType::Checkpoint {
                self.store.push_to_opposite_stack(top.id)?;
                continue;
            }

            let snapshots = self.store.snapshots_for_entry(top.id)?;
            let sibling_paths: HashSet<String> = snapshots.iter().map(|s| s.file_path.clone()).collect();
            let mut last_result = None;
            for snapshot in &snapshots {
                last_result = Some(self.restore_with_lineage(snapshot, lineage, &sibling_paths)?);
            }
            if let Some((src, dst)) = detect_move(&snapshots) {
                lineage.record_move(&dst, &src);
            }

            self.store.mark_status(top.id, EntryStatus::RolledBack)?;
            self.store.push_to_opposite_stack(top.id)?;
            self.store.bump_counter("totalUndos", 1)?;
            log::info!("undid entry {} ({})", top.id, top.description);

            return Ok(match last_result {
                Some(result) => UndoOutcome::Applied(result),
                None => UndoOutcome::Applied(UndoResult {
                    original_path: top.affected_path.clone().unwrap_or_default(),
                    resolved_path: top.affected_path.unwrap_or_default(),
                    followed_rename: false,
                }),
            });
        }
    }

    /// Mirrors `undo` against the redo stack: restores the post-edit content and flips the
    /// entry back to `COMMITTED`.
    pub fn redo(&self, lineage: &FileLineageTracker) -> Result<UndoOutcome, NtsError> {
        loop {
            let Some(top) = self.store.pop_top(Stack::Redo)? else {
                return Ok(UndoOutcome::NothingToUndo);
            };

            if top.entry_type == EntryType::Checkpoint {
                self.store.push_to_opposite_stack(top.id)?;
                continue;
            }

            let snapshots = self.store.snapshots_for_entry(top.id)?;
            let sibling_paths: HashSet<String> = snapshots.iter().map(|s| s.file_path.clone()).collect();
            let mut last_result = None;
            for snapshot in &snapshots {
                last_result = Some(self.restore_with_lineage(snapshot, lineage, &sibling_paths)?);
            }
            if let Some((src, dst)) = detect_move(&snapshots) {
                lineage.record_move(&src, &dst);
            }

            self.store.mark_status(top.id, EntryStatus::Committed)?;
            self.store.push_to_opposite_stack(top.id)?;
            log::info!("redid entry {} ({})", top.id, top.description);

            return Ok(match last_result {
                Some(result) => UndoOutcome::Applied(result),
                None => UndoOutcome::Applied(UndoResult {
                    original_path: top.affected_path.clone().unwrap_or_default(),
                    resolved_path: top.affected_path.unwrap_or_default(),
                    followed_rename: false,
                }),
            });
        }
    }

    /// Persists an `EXTERNAL_CHANGE` entry outside any open transaction, making an outside edit
    /// reversible through `undo`.
    pub fn record_external_change(
        &self,
        path: &str,
        previous_content: &[u8],
        previous_crc: u32,
        current_crc: u32,
        description: &str,
    ) -> Result<EntryId, NtsError> {
        let entry_id = self.store.append_entry(NewJournalEntry {
            stack: Stack::Undo,
            entry_type: EntryType::ExternalChange,
            description: description.to_string(),
            status: EntryStatus::Committed,
            instruction: None,
            affected_path: Some(path.to_string()),
            previous_crc: Some(previous_crc),
            current_crc: Some(current_crc),
            checkpoint_name: None,
        })?;

        self.store.attach_snapshot(entry_id, path, Some(previous_content), previous_content.len() as u64, previous_crc)?;
        Ok(entry_id)
    }

    /// Resolves where a snapshot's content should land: normally its own recorded path, but
    /// redirected to wherever the lineage tracker says that identity lives now if a *different*,
    /// not-yet-undone transaction renamed it since. `sibling_paths` holds every path touched by
    /// this same entry (e.g. a move's source and destination); a lineage match that lands on one
    /// of those is this entry's own rename being reversed, not a foreign one, so it's ignored and
    /// the snapshot restores to its own literal path instead.
    fn restore_with_lineage(
        &self,
        snapshot: &FileSnapshotRow,
        lineage: &FileLineageTracker,
        sibling_paths: &HashSet<String>,
    ) -> Result<UndoResult, NtsError> {
        let original_path = snapshot.file_path.clone();
        let resolved_path = lineage
            .find_by_crc(snapshot.crc32c)
            .map(|record| record.current_path)
            .filter(|path| path != &original_path && !sibling_paths.contains(path))
            .or_else(|| {
                let previous = lineage.get_previous_paths(&original_path);
                previous
                    .last()
                    .filter(|path| *path != &original_path && !sibling_paths.contains(*path))
                    .cloned()
            })
            .unwrap_or_else(|| original_path.clone());

        self.restore_snapshot_bytes(&resolved_path, snapshot.content.as_deref())?;

        Ok(UndoResult {
            followed_rename: resolved_path != original_path,
            original_path,
            resolved_path,
        })
    }

    fn restore_snapshot_bytes(&self, path: &str, content: Option<&[u8]>) -> Result<(), NtsError> {
        match content {
            Some(bytes) => self.safe_io.write(Path::new(path), bytes),
            None => self.safe_io.delete(Path::new(path)),
        }
    }
}

/// Recognizes a move's distinctive snapshot pair (the source's prior content alongside the
/// destination's "didn't exist" sentinel, at two different paths) so `undo`/`redo` can keep the
/// lineage tracker's identity mapping in step with the rename they just reversed or replayed.
fn detect_move(snapshots: &[FileSnapshotRow]) -> Option<(String, String)> {
    let [a, b] = snapshots else { return None };
    match (&a.content, &b.content) {
        (Some(_), None) if a.file_path != b.file_path => Some((a.file_path.clone(), b.file_path.clone())),
        (None, Some(_)) if a.file_path != b.file_path => Some((b.file_path.clone(), a.file_path.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nts_shared::{crc32c_of_bytes, Options};
    use tempfile::tempdir;

    fn manager() -> (TransactionManager, Arc<SafeFileIo>) {
        let store = Arc::new(JournalStore::open_in_memory().unwrap());
        let safe_io = Arc::new(SafeFileIo::new(Arc::new(Options::default())));
        (TransactionManager::new(store, safe_io.clone()), safe_io)
    }

    #[test]
    fn commit_with_no_snapshots_persists_nothing() {
        let (manager, _) = manager();
        manager.start_transaction("noop", None).unwrap();
        assert_eq!(manager.commit().unwrap(), None);
    }

    #[test]
    fn nested_commit_merges_into_parent_and_only_outer_persists() {
        let (manager, safe_io) = manager();
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        safe_io.write(&path, b"before").unwrap();

        manager.start_transaction("outer", None).unwrap();
        manager.backup(path.to_str().unwrap(), Some(b"before".to_vec()), crc32c_of_bytes(b"before"), 6).unwrap();

        manager.start_transaction("inner", None).unwrap();
        assert_eq!(manager.commit().unwrap(), None);

        safe_io.write(&path, b"after!").unwrap();
        let entry_id = manager.commit().unwrap();
        assert!(entry_id.is_some());
    }

    #[test]
    fn rollback_restores_buffered_snapshot() {
        let (manager, safe_io) = manager();
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        safe_io.write(&path, b"before").unwrap();

        manager.start_transaction("edit", None).unwrap();
        manager.backup(path.to_str().unwrap(), Some(b"before".to_vec()), crc32c_of_bytes(b"before"), 6).unwrap();
        safe_io.write(&path, b"mutated").unwrap();

        manager.rollback().unwrap();
        assert_eq!(safe_io.read_all(&path).unwrap(), b"before");
    }

    #[test]
    fn undo_then_redo_restores_each_side() {
        let (manager, safe_io) = manager();
        let lineage = FileLineageTracker::new();
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        safe_io.write(&path, b"v1").unwrap();

        manager.start_transaction("edit", None).unwrap();
        manager.backup(path.to_str().unwrap(), Some(b"v1".to_vec()), crc32c_of_bytes(b"v1"), 2).unwrap();
        safe_io.write(&path, b"v2").unwrap();
        manager.commit().unwrap();

        let undo_outcome = manager.undo(&lineage).unwrap();
        assert!(matches!(undo_outcome, UndoOutcome::Applied(_)));
        assert_eq!(safe_io.read_all(&path).unwrap(), b"v1");

        let redo_outcome = manager.redo(&lineage).unwrap();
        assert!(matches!(redo_outcome, UndoOutcome::Applied(_)));
        assert_eq!(safe_io.read_all(&path).unwrap(), b"v2");
    }

    #[test]
    fn checkpoint_rollback_undoes_entries_above_it_and_keeps_checkpoint() {
        let (manager, safe_io) = manager();
        let lineage = FileLineageTracker::new();
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        safe_io.write(&path, b"base").unwrap();

        manager.create_checkpoint("CP").unwrap();

        for (before, after) in [(&b"base"[..], &b"v1"[..]), (&b"v1"[..], &b"v2"[..]), (&b"v2"[..], &b"v3"[..])] {
            manager.start_transaction("edit", None).unwrap();
            manager.backup(path.to_str().unwrap(), Some(before.to_vec()), crc32c_of_bytes(before), before.len() as u64).unwrap();
            safe_io.write(&path, after).unwrap();
            manager.commit().unwrap();
        }

        manager.rollback_to_checkpoint("CP", &lineage).unwrap();
        assert_eq!(safe_io.read_all(&path).unwrap(), b"base");
    }

    #[test]
    fn undoing_a_move_recreates_the_source_and_removes_the_destination() {
        let (manager, safe_io) = manager();
        let lineage = FileLineageTracker::new();
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        safe_io.write(&src, b"hello").unwrap();

        manager.start_transaction(format!("move {} -> {}", src.display(), dst.display()), None).unwrap();
        manager.backup(src.to_str().unwrap(), Some(b"hello".to_vec()), crc32c_of_bytes(b"hello"), 5).unwrap();
        manager.backup(dst.to_str().unwrap(), None, 0, 0).unwrap();
        safe_io.move_file(&src, &dst).unwrap();
        manager.commit().unwrap();
        lineage.record_move(src.to_str().unwrap(), dst.to_str().unwrap());

        manager.undo(&lineage).unwrap();

        assert_eq!(safe_io.read_all(&src).unwrap(), b"hello");
        assert!(!dst.exists());
    }

    #[test]
    fn undoing_an_edit_then_a_move_unwinds_both_in_order() {
        let (manager, safe_io) = manager();
        let lineage = FileLineageTracker::new();
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        safe_io.write(&src, b"v1").unwrap();

        manager.start_transaction("edit a.txt", None).unwrap();
        manager.backup(src.to_str().unwrap(), Some(b"v1".to_vec()), crc32c_of_bytes(b"v1"), 2).unwrap();
        safe_io.write(&src, b"v2").unwrap();
        manager.commit().unwrap();

        manager.start_transaction(format!("move {} -> {}", src.display(), dst.display()), None).unwrap();
        manager.backup(src.to_str().unwrap(), Some(b"v2".to_vec()), crc32c_of_bytes(b"v2"), 2).unwrap();
        manager.backup(dst.to_str().unwrap(), None, 0, 0).unwrap();
        safe_io.move_file(&src, &dst).unwrap();
        manager.commit().unwrap();
        lineage.record_move(src.to_str().unwrap(), dst.to_str().unwrap());

        manager.undo(&lineage).unwrap();
        assert_eq!(safe_io.read_all(&src).unwrap(), b"v2");
        assert!(!dst.exists());

        manager.undo(&lineage).unwrap();
        assert_eq!(safe_io.read_all(&src).unwrap(), b"v1");
    }
}
