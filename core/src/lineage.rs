use crossbeam_skiplist::SkipMap;
use nts_shared::FileIdentity;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::RwLock;

/// A file's identity record: its current path, the chain of paths it has inhabited, and the
/// CRCs it has held. Lives only in memory, per task — lineage is a per-process convenience
/// layer, reset when a task is reactivated from disk.
#[derive(Debug, Clone)]
pub struct LineageRecord {
    pub file_identity: FileIdentity,
    pub current_path: String,
    pub rename_chain: Vec<String>,
    pub crc_history: Vec<u32>,
}

/// Tracks file identity across move/rename chains for one task. `registerFile`, `recordMove`,
/// `updateCrc`, `getPreviousPaths`, `findByCrc` exactly as specified in the lineage component.
pub struct FileLineageTracker {
    by_path: SkipMap<String, FileIdentity>,
    records: RwLock<std::collections::HashMap<FileIdentity, LineageRecord>>,
    next_identity: AtomicU64,
}

impl FileLineageTracker {
    pub fn new() -> FileLineageTracker {
        FileLineageTracker {
            by_path: SkipMap::new(),
            records: RwLock::new(std::collections::HashMap::new()),
            next_identity: AtomicU64::new(1),
        }
    }

    /// Returns the identity for `path`, minting a fresh one on first sight.
    pub fn register_file(&self, path: &str) -> FileIdentity {
        if let Some(entry) = self.by_path.get(path) {
            return *entry.value();
        }

        let identity = self.next_identity.fetch_add(1, Relaxed);
        self.by_path.insert(path.to_string(), identity);
        self.records.write().unwrap().insert(
            identity,
            LineageRecord {
                file_identity: identity,
                current_path: path.to_string(),
                rename_chain: vec![path.to_string()],
                crc_history: Vec::new(),
            },
        );
        identity
    }

    /// Transfers identity from `old_path` to `new_path`, appending to the rename chain.
    /// If `old_path` was never registered, `new_path` is registered fresh. `old_path` stays
    /// mapped to the identity in `by_path` so lookups by any historical path keep resolving
    /// after the file has moved on.
    pub fn record_move(&self, old_path: &str, new_path: &str) -> FileIdentity {
        let identity = self.register_file(old_path);
        self.by_path.insert(new_path.to_string(), identity);

        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(&identity) {
            record.current_path = new_path.to_string();
            record.rename_chain.push(new_path.to_string());
        }
        identity
    }

    /// Appends `crc` to the CRC history of the file currently at `path`.
    pub fn update_crc(&self, path: &str, crc: u32) {
        let identity = self.register_file(path);
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(&identity) {
            record.crc_history.push(crc);
        }
    }

    /// All prior paths of the same identity as `path` (including `path` itself), used by the
    /// token decoder to recognize a path-hash that predates a rename.
    pub fn get_previous_paths(&self, path: &str) -> Vec<String> {
        let Some(entry) = self.by_path.get(path) else {
            return Vec::new();
        };
        let identity = *entry.value();
        self.records
            .read()
            .unwrap()
            .get(&identity)
            .map(|record| record.rename_chain.clone())
            .unwrap_or_default()
    }

    /// Locates the identity (and current path) of a file that has ever held `crc`, used by
    /// smart-undo to find a file that was renamed mid-transaction: the snapshot being restored
    /// carries the content's CRC from before the mutation being undone, which may predate
    /// later writes to the same identity.
    pub fn find_by_crc(&self, crc: u32) -> Option<LineageRecord> {
        self.records
            .read()
            .unwrap()
            .values()
            .filter(|record| record.crc_history.contains(&crc))
            .cloned()
            .next()
    }

    pub fn current_path_of(&self, identity: FileIdentity) -> Option<String> {
        self.records.read().unwrap().get(&identity).map(|record| record.current_path.clone())
    }
}

impl Default for FileLineageTracker {
    fn default() -> Self {
        FileLineageTracker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_file_is_stable_across_repeated_calls() {
        let tracker = FileLineageTracker::new();
        let a = tracker.register_file("/work/a.txt");
        let b = tracker.register_file("/work/a.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn record_move_preserves_identity_and_extends_chain() {
        let tracker = FileLineageTracker::new();
        let identity = tracker.register_file("/work/a.txt");
        let moved = tracker.record_move("/work/a.txt", "/work/b.txt");
        assert_eq!(identity, moved);

        let previous = tracker.get_previous_paths("/work/b.txt");
        assert_eq!(previous, vec!["/work/a.txt".to_string(), "/work/b.txt".to_string()]);
    }

    #[test]
    fn get_previous_paths_still_resolves_via_the_pre_rename_path() {
        let tracker = FileLineageTracker::new();
        tracker.register_file("/work/a.txt");
        tracker.record_move("/work/a.txt", "/work/b.txt");

        let previous = tracker.get_previous_paths("/work/a.txt");
        assert_eq!(previous, vec!["/work/a.txt".to_string(), "/work/b.txt".to_string()]);
    }

    #[test]
    fn find_by_crc_locates_renamed_file() {
        let tracker = FileLineageTracker::new();
        tracker.register_file("/work/a.txt");
        tracker.update_crc("/work/a.txt", 0xDEAD_BEEF);
        tracker.record_move("/work/a.txt", "/work/b.txt");

        let found = tracker.find_by_crc(0xDEAD_BEEF).unwrap();
        assert_eq!(found.current_path, "/work/b.txt");
    }

    #[test]
    fn find_by_crc_matches_a_crc_earlier_than_the_latest() {
        let tracker = FileLineageTracker::new();
        tracker.register_file("/work/a.txt");
        tracker.update_crc("/work/a.txt", 0x1111_1111);
        tracker.update_crc("/work/a.txt", 0x2222_2222);
        tracker.record_move("/work/a.txt", "/work/b.txt");

        let found = tracker.find_by_crc(0x1111_1111).unwrap();
        assert_eq!(found.current_path, "/work/b.txt");
    }
}
