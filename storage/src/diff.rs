use crate::model::DiffStat;
use diffy::{create_patch, Patch};
use nts_shared::EntryId;

/// Computes a unified diff and summary line counts between a file's pre- and post-mutation
/// content. Generalizes the teacher's longest-common-prefix byte comparison (`Key::prefix_difference`)
/// from bytes to lines via `diffy`'s Myers-algorithm line diff.
pub fn compute_diff_stat(entry_id: EntryId, file_path: &str, before: &str, after: &str) -> DiffStat {
    let patch = create_patch(before, after);
    let (lines_added, lines_deleted) = count_changed_lines(&patch);

    DiffStat {
        entry_id,
        file_path: file_path.to_string(),
        lines_added,
        lines_deleted,
        affected_blocks: patch.hunks().len() as u64,
        unified_diff: patch.to_string(),
    }
}

fn count_changed_lines(patch: &Patch<str>) -> (u64, u64) {
    let mut added = 0u64;
    let mut deleted = 0u64;

    for hunk in patch.hunks() {
        for line in hunk.lines() {
            match line {
                diffy::Line::Insert(_) => added += 1,
                diffy::Line::Delete(_) => deleted += 1,
                diffy::Line::Context(_) => {}
            }
        }
    }

    (added, deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_stat_counts_added_and_deleted_lines() {
        let before = "one\ntwo\nthree\n";
        let after = "one\ntwo-changed\nthree\nfour\n";

        let stat = compute_diff_stat(1, "a.txt", before, after);
        assert_eq!(stat.lines_added, 2);
        assert_eq!(stat.lines_deleted, 1);
        assert!(stat.affected_blocks >= 1);
        assert!(stat.unified_diff.contains("two-changed"));
    }

    #[test]
    fn identical_content_has_no_changes() {
        let content = "same\ncontent\n";
        let stat = compute_diff_stat(1, "a.txt", content, content);
        assert_eq!(stat.lines_added, 0);
        assert_eq!(stat.lines_deleted, 0);
        assert_eq!(stat.affected_blocks, 0);
    }
}
