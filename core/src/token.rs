use crossbeam_skiplist::SkipMap;
use nts_shared::path_hash8;
use std::path::Path;
use std::sync::Mutex;

const TOKEN_PREFIX: &str = "LAT";

/// Immutable per-range capability. Mutations (`shift`, `expand`, `with_line_count`,
/// `with_range_crc`, `merge`) yield new values rather than mutating in place, per Design Note §9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineAccessToken {
    pub absolute_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub range_crc32c: u32,
    pub line_count: usize,
}

impl LineAccessToken {
    pub fn new(absolute_path: impl Into<String>, start_line: usize, end_line: usize, range_crc32c: u32, line_count: usize) -> LineAccessToken {
        assert!(start_line >= 1, "start_line must be >= 1");
        assert!(end_line >= start_line, "end_line must be >= start_line");
        LineAccessToken { absolute_path: absolute_path.into(), start_line, end_line, range_crc32c, line_count }
    }

    pub fn serialize(&self) -> String {
        format!(
            "{}:{}:{}:{}:{:08X}:{}",
            TOKEN_PREFIX,
            path_hash8(Path::new(&self.absolute_path)),
            self.start_line,
            self.end_line,
            self.range_crc32c,
            self.line_count
        )
    }

    pub fn overlaps(&self, other: &LineAccessToken) -> bool {
        self.absolute_path == other.absolute_path && self.start_line <= other.end_line && other.start_line <= self.end_line
    }

    pub fn is_adjacent_to(&self, other: &LineAccessToken) -> bool {
        self.absolute_path == other.absolute_path
            && (self.end_line + 1 == other.start_line || other.end_line + 1 == self.start_line)
    }

    /// Union of two overlapping or adjacent tokens; `merged_range_crc` must be recomputed by the
    /// caller over the union's lines (the tracker cannot read file content itself).
    pub fn merge(&self, other: &LineAccessToken, merged_range_crc: u32) -> LineAccessToken {
        LineAccessToken::new(
            self.absolute_path.clone(),
            self.start_line.min(other.start_line),
            self.end_line.max(other.end_line),
            merged_range_crc,
            self.line_count.max(other.line_count),
        )
    }

    pub fn shift(&self, delta: i64, new_range_crc: u32, new_line_count: usize) -> LineAccessToken {
        let apply = |line: usize| -> usize { (line as i64 + delta).max(1) as usize };
        LineAccessToken::new(self.absolute_path.clone(), apply(self.start_line), apply(self.end_line), new_range_crc, new_line_count)
    }

    pub fn expand(&self, line_delta: i64, new_range_crc: u32, new_line_count: usize) -> LineAccessToken {
        let new_end = (self.end_line as i64 + line_delta).max(self.start_line as i64) as usize;
        LineAccessToken::new(self.absolute_path.clone(), self.start_line, new_end, new_range_crc, new_line_count)
    }

    pub fn with_range_crc(&self, new_range_crc: u32) -> LineAccessToken {
        LineAccessToken { range_crc32c: new_range_crc, ..self.clone() }
    }

    pub fn with_line_count(&self, new_line_count: usize) -> LineAccessToken {
        LineAccessToken { line_count: new_line_count, ..self.clone() }
    }

    pub fn with_path(&self, new_path: impl Into<String>) -> LineAccessToken {
        LineAccessToken { absolute_path: new_path.into(), ..self.clone() }
    }
}

pub struct DecodedToken {
    pub path_hash8: String,
    pub start_line: usize,
    pub end_line: usize,
    pub range_crc32c: u32,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidation {
    Valid,
    CrcMismatch { suggestion: String },
    LineCountMismatch { suggestion: String },
    NotFound { reason: String },
}

/// Parses `LAT:{pathHash8}:{startLine}:{endLine}:{rangeCrc32cHex}:{lineCount}`. Does not perform
/// path-hash or CRC validation — that's `validate_decoded`'s job, since it needs the caller's
/// expected path and current file state.
pub fn decode_token(token: &str) -> Result<DecodedToken, TokenValidation> {
    let not_found = |reason: &str| TokenValidation::NotFound { reason: reason.to_string() };

    let fields: Vec<&str> = token.split(':').collect();
    if fields.len() != 6 {
        return Err(not_found("token must have exactly six colon-separated fields"));
    }
    if fields[0] != TOKEN_PREFIX {
        return Err(not_found("token prefix is not LAT"));
    }

    let start_line: usize = fields[2].parse().map_err(|_| not_found("startLine is not a valid integer"))?;
    let end_line: usize = fields[3].parse().map_err(|_| not_found("endLine is not a valid integer"))?;
    let range_crc32c = u32::from_str_radix(fields[4], 16).map_err(|_| not_found("rangeCrc32c is not valid hex"))?;
    let line_count: usize = fields[5].parse().map_err(|_| not_found("lineCount is not a valid integer"))?;

    Ok(DecodedToken { path_hash8: fields[1].to_string(), start_line, end_line, range_crc32c, line_count })
}

/// Applies the §4.6 validation rules given the token's decoded fields and the caller-observed
/// current state of the file.
pub fn validate_decoded(
    decoded: &DecodedToken,
    expected_path: &Path,
    previous_path_hashes: &[String],
    accessed_in_transaction: bool,
    current_range_crc: u32,
    current_line_count: usize,
) -> TokenValidation {
    let expected_hash = path_hash8(expected_path);
    let path_hash_ok = decoded.path_hash8 == expected_hash
        || previous_path_hashes.iter().any(|hash| hash == &decoded.path_hash8)
        || accessed_in_transaction;

    if !path_hash_ok {
        return TokenValidation::NotFound { reason: "token path hash does not match expected path".to_string() };
    }

    if decoded.range_crc32c != current_range_crc {
        return TokenValidation::CrcMismatch { suggestion: "Re-read the range with nts_file_read".to_string() };
    }

    if decoded.line_count != current_line_count {
        return TokenValidation::LineCountMismatch { suggestion: "Re-read the file with nts_file_read".to_string() };
    }

    TokenValidation::Valid
}

/// Per-task registry of currently issued, in-memory tokens, keyed by absolute path. Handles
/// eager merge on issuance and the four mutation rules applied after a successful write.
pub struct LineAccessTokenTracker {
    by_path: SkipMap<String, Mutex<Vec<LineAccessToken>>>,
}

impl LineAccessTokenTracker {
    pub fn new() -> LineAccessTokenTracker {
        LineAccessTokenTracker { by_path: SkipMap::new() }
    }

    /// Issues a token for `[start_line..end_line]`, merging eagerly with any existing token for
    /// the same path that overlaps or is adjacent.
    pub fn issue(&self, absolute_path: &str, start_line: usize, end_line: usize, range_crc32c: u32, line_count: usize) -> LineAccessToken {
        let issued = LineAccessToken::new(absolute_path, start_line, end_line, range_crc32c, line_count);
        let entry = self.by_path.get_or_insert_with(absolute_path.to_string(), || Mutex::new(Vec::new()));
        let mut tokens = entry.value().lock().unwrap();

        if let Some(index) = tokens.iter().position(|existing| existing.overlaps(&issued) || existing.is_adjacent_to(&issued)) {
            let merged = tokens[index].merge(&issued, range_crc32c);
            tokens[index] = merged.clone();
            return merged;
        }

        tokens.push(issued.clone());
        issued
    }

    pub fn tokens_for(&self, absolute_path: &str) -> Vec<LineAccessToken> {
        self.by_path.get(absolute_path).map(|entry| entry.value().lock().unwrap().clone()).unwrap_or_default()
    }

    /// Applies an edit that inserted (positive) or removed (negative) `line_delta` lines
    /// starting at `edit_start_line`, recomputing each surviving token's CRC via `recompute_crc`.
    pub fn apply_edit(
        &self,
        absolute_path: &str,
        edit_start_line: usize,
        line_delta: i64,
        new_line_count: usize,
        mut recompute_crc: impl FnMut(&LineAccessToken) -> u32,
    ) {
        let Some(entry) = self.by_path.get(absolute_path) else { return };
        let mut tokens = entry.value().lock().unwrap();

        for token in tokens.iter_mut() {
            let contains_edit = token.start_line <= edit_start_line && edit_start_line <= token.end_line;
            let strictly_after = token.start_line > edit_start_line && token.end_line > edit_start_line && !contains_edit;
            let overlaps_edit = !contains_edit && !strictly_after && edit_start_line <= token.end_line;

            *token = if strictly_after {
                let crc = recompute_crc(token);
                token.shift(line_delta, crc, new_line_count)
            } else if contains_edit {
                let crc = recompute_crc(token);
                token.expand(line_delta, crc, new_line_count)
            } else if overlaps_edit {
                let crc = recompute_crc(token);
                token.with_range_crc(crc)
            } else {
                token.with_line_count(new_line_count)
            };
        }
    }

    /// Moves every token for `old_path` to `new_path`, following rename/move per §4.6.
    pub fn rename_path(&self, old_path: &str, new_path: &str) {
        if let Some(entry) = self.by_path.remove(old_path) {
            let tokens = entry.value().lock().unwrap();
            let moved: Vec<LineAccessToken> = tokens.iter().map(|token| token.with_path(new_path)).collect();
            drop(tokens);
            self.by_path.insert(new_path.to_string(), Mutex::new(moved));
        }
    }
}

impl Default for LineAccessTokenTracker {
    fn default() -> Self {
        LineAccessTokenTracker::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_then_decode_round_trips_fields() {
        let token = LineAccessToken::new("/work/a.txt", 1, 3, 0xABCD_1234, 10);
        let serialized = token.serialize();
        let decoded = decode_token(&serialized).unwrap();

        assert_eq!(decoded.path_hash8, path_hash8(Path::new("/work/a.txt")));
        assert_eq!(decoded.start_line, 1);
        assert_eq!(decoded.end_line, 3);
        assert_eq!(decoded.range_crc32c, 0xABCD_1234);
        assert_eq!(decoded.line_count, 10);
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let result = decode_token("LAT:aaaa1111:1:3");
        assert!(matches!(result, Err(TokenValidation::NotFound { .. })));
    }

    #[test]
    fn validate_detects_crc_mismatch() {
        let token = LineAccessToken::new("/work/a.txt", 1, 3, 111, 10);
        let decoded = decode_token(&token.serialize()).unwrap();
        let result = validate_decoded(&decoded, Path::new("/work/a.txt"), &[], false, 222, 10);
        assert!(matches!(result, TokenValidation::CrcMismatch { .. }));
    }

    #[test]
    fn validate_detects_line_count_mismatch() {
        let token = LineAccessToken::new("/work/a.txt", 1, 3, 111, 10);
        let decoded = decode_token(&token.serialize()).unwrap();
        let result = validate_decoded(&decoded, Path::new("/work/a.txt"), &[], false, 111, 11);
        assert!(matches!(result, TokenValidation::LineCountMismatch { .. }));
    }

    #[test]
    fn validate_accepts_previous_path_hash_bypass() {
        let token = LineAccessToken::new("/work/a.txt", 1, 3, 111, 10);
        let decoded = decode_token(&token.serialize()).unwrap();
        let previous_hashes = vec![path_hash8(Path::new("/work/a.txt"))];
        let result = validate_decoded(&decoded, Path::new("/work/b.txt"), &previous_hashes, false, 111, 10);
        assert_eq!(result, TokenValidation::Valid);
    }

    #[test]
    fn issuing_adjacent_tokens_merges_them() {
        let tracker = LineAccessTokenTracker::new();
        tracker.issue("/work/a.txt", 1, 3, 111, 20);
        let merged = tracker.issue("/work/a.txt", 4, 6, 222, 20);

        assert_eq!(merged.start_line, 1);
        assert_eq!(merged.end_line, 6);
        assert_eq!(tracker.tokens_for("/work/a.txt").len(), 1);
    }

    #[test]
    fn apply_edit_shifts_tokens_strictly_after_insert() {
        let tracker = LineAccessTokenTracker::new();
        tracker.issue("/work/d.txt", 10, 15, 111, 20);

        tracker.apply_edit("/work/d.txt", 3, 5, 25, |_| 999);

        let tokens = tracker.tokens_for("/work/d.txt");
        assert_eq!(tokens[0].start_line, 15);
        assert_eq!(tokens[0].end_line, 20);
        assert_eq!(tokens[0].line_count, 25);
    }
}
