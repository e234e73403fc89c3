use crc32c::crc32c as crc32c_checksum;

/// Charset detected (or assumed) for a file's bytes, in the order the precedence can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Windows1251,
    Latin1,
}

impl Charset {
    pub fn is_utf(self) -> bool {
        matches!(
            self,
            Charset::Utf8 | Charset::Utf16Le | Charset::Utf16Be | Charset::Utf32Le | Charset::Utf32Be
        )
    }

    fn is_utf16_or_32(self) -> bool {
        matches!(self, Charset::Utf16Le | Charset::Utf16Be | Charset::Utf32Le | Charset::Utf32Be)
    }
}

/// A guess produced by a statistical charset detector: a charset and a confidence percentage.
/// `nts-shared` does not implement the statistical model itself (out of scope, see Non-goals);
/// callers that have one plug it in here. Absence of a guess is represented as `None`.
pub struct DetectorGuess {
    pub charset: Charset,
    pub confidence_percent: u8,
}

const UTF32_LE_BOM: [u8; 4] = [0xFF, 0xFE, 0x00, 0x00];
const UTF32_BE_BOM: [u8; 4] = [0x00, 0x00, 0xFE, 0xFF];
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

fn detect_bom(bytes: &[u8]) -> Option<Charset> {
    // UTF-32LE's BOM is a prefix of UTF-16LE's, so UTF-32 must be checked first.
    if bytes.starts_with(&UTF32_LE_BOM) {
        return Some(Charset::Utf32Le);
    }
    if bytes.starts_with(&UTF32_BE_BOM) {
        return Some(Charset::Utf32Be);
    }
    if bytes.starts_with(&UTF16_LE_BOM) {
        return Some(Charset::Utf16Le);
    }
    if bytes.starts_with(&UTF16_BE_BOM) {
        return Some(Charset::Utf16Be);
    }
    if bytes.starts_with(&UTF8_BOM) {
        return Some(Charset::Utf8);
    }
    None
}

/// Five-step precedence: BOM, then a high-confidence detector guess, then strict UTF-8
/// validation, then a low-confidence detector guess, finally the configured fallback.
/// `detector` is optional: pass `None` to skip straight from BOM to UTF-8 validation to fallback.
pub fn detect_encoding(
    bytes: &[u8],
    detector: Option<&DetectorGuess>,
    high_confidence_percent: u8,
    low_confidence_percent: u8,
    fallback: Charset,
) -> Charset {
    if let Some(charset) = detect_bom(bytes) {
        return charset;
    }

    if let Some(guess) = detector {
        if guess.confidence_percent >= high_confidence_percent {
            return guess.charset;
        }
    }

    if is_valid_utf8(bytes) {
        return Charset::Utf8;
    }

    if let Some(guess) = detector {
        if guess.confidence_percent >= low_confidence_percent {
            return guess.charset;
        }
    }

    fallback
}

/// Strips the byte-order mark from the front of `bytes` when `charset` is a UTF-* variant.
/// Non-UTF charsets have no BOM convention and are returned unchanged.
pub fn strip_bom<'a>(bytes: &'a [u8], charset: Charset) -> &'a [u8] {
    if !charset.is_utf() {
        return bytes;
    }

    let bom: &[u8] = match charset {
        Charset::Utf32Le => &UTF32_LE_BOM,
        Charset::Utf32Be => &UTF32_BE_BOM,
        Charset::Utf16Le => &UTF16_LE_BOM,
        Charset::Utf16Be => &UTF16_BE_BOM,
        Charset::Utf8 => &UTF8_BOM,
        _ => &[],
    };

    bytes.strip_prefix(bom).unwrap_or(bytes)
}

/// Canonical UTF-8 byte-range validation (RFC 3629), independent of `std::str::from_utf8` so
/// behavior here cannot silently drift with the standard library's own validator.
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        let remaining = bytes.len() - i;

        if b0 < 0x80 {
            i += 1;
        } else if (0xC2..=0xDF).contains(&b0) {
            if remaining < 2 || !is_continuation(bytes[i + 1]) {
                return false;
            }
            i += 2;
        } else if b0 == 0xE0 {
            if remaining < 3 || !(0xA0..=0xBF).contains(&bytes[i + 1]) || !is_continuation(bytes[i + 2]) {
                return false;
            }
            i += 3;
        } else if (0xE1..=0xEC).contains(&b0) || (0xEE..=0xEF).contains(&b0) {
            if remaining < 3 || !is_continuation(bytes[i + 1]) || !is_continuation(bytes[i + 2]) {
                return false;
            }
            i += 3;
        } else if b0 == 0xED {
            if remaining < 3 || !(0x80..=0x9F).contains(&bytes[i + 1]) || !is_continuation(bytes[i + 2]) {
                return false;
            }
            i += 3;
        } else if b0 == 0xF0 {
            if remaining < 4
                || !(0x90..=0xBF).contains(&bytes[i + 1])
                || !is_continuation(bytes[i + 2])
                || !is_continuation(bytes[i + 3])
            {
                return false;
            }
            i += 4;
        } else if (0xF1..=0xF3).contains(&b0) {
            if remaining < 4
                || !is_continuation(bytes[i + 1])
                || !is_continuation(bytes[i + 2])
                || !is_continuation(bytes[i + 3])
            {
                return false;
            }
            i += 4;
        } else if b0 == 0xF4 {
            if remaining < 4
                || !(0x80..=0x8F).contains(&bytes[i + 1])
                || !is_continuation(bytes[i + 2])
                || !is_continuation(bytes[i + 3])
            {
                return false;
            }
            i += 4;
        } else {
            return false;
        }
    }
    true
}

fn is_continuation(byte: u8) -> bool {
    (0x80..=0xBF).contains(&byte)
}

/// NUL-byte heuristic over the first `window_bytes` of `content`: a file is treated as binary,
/// and reads are refused, if a NUL appears and the detected charset is not UTF-16/32 (which
/// legitimately contain NUL bytes for every ASCII code point).
pub fn looks_binary(content: &[u8], charset: Charset, window_bytes: usize) -> bool {
    if charset.is_utf16_or_32() {
        return false;
    }
    let window = &content[..content.len().min(window_bytes)];
    window.contains(&0u8)
}

/// CRC32C (Castagnoli) over the UTF-8 encoding of the concatenated lines, including interior
/// line separators but not a trailing one — the anchor value line access tokens validate against.
pub fn crc32c_of_range(lines: &[&str], line_separator: &str) -> u32 {
    let joined = lines.join(line_separator);
    crc32c_checksum(joined.as_bytes())
}

pub fn crc32c_of_bytes(bytes: &[u8]) -> u32 {
    crc32c_checksum(bytes)
}

/// Byte-offset table for a decoded file, built once per read so line-range slicing and CRC
/// recomputation on a mutation don't repeatedly rescan the whole content.
pub struct LineIndex {
    line_starts: Vec<usize>,
    total_len: usize,
}

impl LineIndex {
    pub fn build(content: &str) -> LineIndex {
        let mut line_starts = vec![0];
        for (offset, byte) in content.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        LineIndex { line_starts, total_len: content.len() }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte range `[start, end)` covering 1-indexed lines `start_line..=end_line`, exclusive of
    /// the trailing line separator of `end_line`.
    pub fn byte_range(&self, content: &str, start_line: usize, end_line: usize) -> Option<(usize, usize)> {
        if start_line == 0 || start_line > end_line || end_line > self.line_count() {
            return None;
        }
        let start = self.line_starts[start_line - 1];
        let end = if end_line < self.line_count() {
            self.line_starts[end_line] - 1
        } else {
            self.total_len
        };
        let end = end.min(content.len());
        Some((start, end.max(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf32_bom_wins_over_utf16_alias() {
        let bytes = [0xFF, 0xFE, 0x00, 0x00, b'h', b'i'];
        assert_eq!(detect_bom(&bytes), Some(Charset::Utf32Le));
    }

    #[test]
    fn valid_utf8_passes() {
        assert!(is_valid_utf8("héllo wörld 日本語".as_bytes()));
    }

    #[test]
    fn truncated_multibyte_sequence_is_invalid() {
        assert!(!is_valid_utf8(&[0xE2, 0x82]));
    }

    #[test]
    fn precedence_falls_back_when_nothing_else_matches() {
        let bytes = [0xFF, 0xFE, 0xFD];
        let charset = detect_encoding(&bytes, None, 50, 10, Charset::Windows1251);
        assert_eq!(charset, Charset::Windows1251);
    }

    #[test]
    fn high_confidence_guess_short_circuits_utf8_validation() {
        let bytes = b"plain ascii";
        let guess = DetectorGuess { charset: Charset::Windows1251, confidence_percent: 80 };
        let charset = detect_encoding(bytes, Some(&guess), 50, 10, Charset::Windows1251);
        assert_eq!(charset, Charset::Windows1251);
    }

    #[test]
    fn nul_byte_flags_non_utf16_content_as_binary() {
        let content = [b'a', b'b', 0x00, b'c'];
        assert!(looks_binary(&content, Charset::Utf8, 8192));
        assert!(!looks_binary(&content, Charset::Utf16Le, 8192));
    }

    #[test]
    fn line_index_byte_range_excludes_trailing_separator() {
        let content = "one\ntwo\nthree";
        let index = LineIndex::build(content);
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.byte_range(content, 1, 1), Some((0, 3)));
        assert_eq!(index.byte_range(content, 2, 3), Some((4, 13)));
    }

    #[test]
    fn crc32c_matches_reference_vector() {
        assert_eq!(crc32c_of_bytes(b"123456789"), 0xE3069283);
    }
}
