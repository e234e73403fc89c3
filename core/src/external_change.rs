use crossbeam_skiplist::SkipMap;
use nts_shared::Charset;

/// In-memory snapshot of the last-known state of a tracked path; never persisted, per spec.md's
/// "in-memory" qualifier. One per path per task.
#[derive(Debug, Clone)]
pub struct InMemorySnapshot {
    pub absolute_path: String,
    pub content: String,
    pub crc32c: u32,
    pub charset: Charset,
    pub line_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub enum ExternalChangeOutcome {
    NoChange,
    Detected { previous: InMemorySnapshot, description: String },
}

/// Per-task map of last-known file snapshots; computes divergence on read. Registering a
/// snapshot after every successful read is the caller's responsibility (the façade layer).
pub struct ExternalChangeTracker {
    snapshots: SkipMap<String, InMemorySnapshot>,
}

impl ExternalChangeTracker {
    pub fn new() -> ExternalChangeTracker {
        ExternalChangeTracker { snapshots: SkipMap::new() }
    }

    pub fn register_snapshot(&self, snapshot: InMemorySnapshot) {
        self.snapshots.insert(snapshot.absolute_path.clone(), snapshot);
    }

    /// Compares the stored snapshot for `path` to the caller's freshly observed state.
    pub fn check_for_external_change(
        &self,
        path: &str,
        current_crc: u32,
        current_content: &str,
        charset: Charset,
        line_count: usize,
        timestamp: &str,
    ) -> ExternalChangeOutcome {
        let Some(entry) = self.snapshots.get(path) else {
            return ExternalChangeOutcome::NoChange;
        };
        let previous = entry.value().clone();

        if previous.crc32c == current_crc {
            return ExternalChangeOutcome::NoChange;
        }

        let description = format!(
            "{} changed outside the system: crc {:08x} -> {:08x}, {} -> {} lines",
            path, previous.crc32c, current_crc, previous.line_count, line_count
        );

        self.register_snapshot(InMemorySnapshot {
            absolute_path: path.to_string(),
            content: current_content.to_string(),
            crc32c: current_crc,
            charset,
            line_count,
            timestamp: timestamp.to_string(),
        });

        ExternalChangeOutcome::Detected { previous, description }
    }
}

impl Default for ExternalChangeTracker {
    fn default() -> Self {
        ExternalChangeTracker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(path: &str, crc: u32, lines: usize) -> InMemorySnapshot {
        InMemorySnapshot {
            absolute_path: path.to_string(),
            content: "x".repeat(lines),
            crc32c: crc,
            charset: Charset::Utf8,
            line_count: lines,
            timestamp: "t0".to_string(),
        }
    }

    #[test]
    fn absent_snapshot_is_no_change() {
        let tracker = ExternalChangeTracker::new();
        let outcome = tracker.check_for_external_change("/work/c.txt", 1, "x", Charset::Utf8, 1, "t1");
        assert!(matches!(outcome, ExternalChangeOutcome::NoChange));
    }

    #[test]
    fn matching_crc_is_no_change() {
        let tracker = ExternalChangeTracker::new();
        tracker.register_snapshot(snapshot("/work/c.txt", 0x1111_1111, 3));
        let outcome = tracker.check_for_external_change("/work/c.txt", 0x1111_1111, "xxx", Charset::Utf8, 3, "t1");
        assert!(matches!(outcome, ExternalChangeOutcome::NoChange));
    }

    #[test]
    fn differing_crc_is_detected_and_updates_stored_snapshot() {
        let tracker = ExternalChangeTracker::new();
        tracker.register_snapshot(snapshot("/work/c.txt", 0xAAAA_AAAA, 2));

        let outcome = tracker.check_for_external_change("/work/c.txt", 0xBBBB_BBBB, "yy", Charset::Utf8, 2, "t1");
        match outcome {
            ExternalChangeOutcome::Detected { previous, description } => {
                assert_eq!(previous.crc32c, 0xAAAA_AAAA);
                assert!(description.contains("aaaaaaaa"));
                assert!(description.contains("bbbbbbbb"));
            }
            ExternalChangeOutcome::NoChange => panic!("expected detection"),
        }

        let second = tracker.check_for_external_change("/work/c.txt", 0xBBBB_BBBB, "yy", Charset::Utf8, 2, "t2");
        assert!(matches!(second, ExternalChangeOutcome::NoChange));
    }
}
