use crate::report::ToolResponse;
use nts_core::{decode_token, validate_decoded, ExternalChangeOutcome, InMemorySnapshot, TaskContextRegistry, TokenValidation, UndoOutcome};
use nts_shared::{
    crc32c_of_bytes, crc32c_of_range, detect_encoding, looks_binary, path_hash8, sanitize_within, strip_bom, Charset, LineIndex,
    NtsError,
};
use std::path::Path;

const HIGH_CONFIDENCE_PERCENT: u8 = 50;
const LOW_CONFIDENCE_PERCENT: u8 = 10;
const BINARY_SNIFF_WINDOW: usize = 8192;

fn decode_text(bytes: &[u8]) -> Result<(String, Charset), ToolResponse> {
    let charset = detect_encoding(bytes, None, HIGH_CONFIDENCE_PERCENT, LOW_CONFIDENCE_PERCENT, Charset::Windows1251);
    if looks_binary(bytes, charset, BINARY_SNIFF_WINDOW) {
        return Err(ToolResponse::error("BINARY_FILE: refusing to read, NUL byte detected in heuristic window"));
    }
    let stripped = strip_bom(bytes, charset);
    Ok((String::from_utf8_lossy(stripped).into_owned(), charset))
}

fn error_response(e: NtsError) -> ToolResponse {
    ToolResponse::error(format!("{:?}", e))
}

/// `read(path, startLine?, endLine?)` — reads a range (default: whole file), registers an
/// external-change snapshot, and issues a Line Access Token for the range.
pub fn read(registry: &TaskContextRegistry, path: &Path, start_line: Option<usize>, end_line: Option<usize>) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    let resolved_path = match sanitize_within(&task.working_directory, path) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    let bytes = match task.safe_io.read_all(&resolved_path) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };
    let (content, charset) = match decode_text(&bytes) {
        Ok(decoded) => decoded,
        Err(response) => return response,
    };

    let index = LineIndex::build(&content);
    let total_lines = index.line_count().max(1);
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total_lines).min(total_lines);

    if start > total_lines {
        return error_response(NtsError::LineExceedsFile(start, total_lines));
    }

    let lines: Vec<&str> = content.lines().collect();
    let requested: Vec<&str> = lines.get(start - 1..end).unwrap_or(&[]).to_vec();
    let range_crc = crc32c_of_range(&requested, "\n");
    let path_str = resolved_path.to_string_lossy().to_string();

    task.lineage.register_file(&path_str);

    let whole_crc = crc32c_of_bytes(content.as_bytes());
    let timestamp = chrono::Utc::now().to_rfc3339();
    let mut external_change_note = String::new();

    if let ExternalChangeOutcome::Detected { previous, description } = task.external_changes.check_for_external_change(
        &path_str,
        whole_crc,
        &content,
        charset,
        total_lines,
        &timestamp,
    ) {
        if let Err(e) = task.transactions.record_external_change(
            &path_str,
            previous.content.as_bytes(),
            previous.crc32c,
            whole_crc,
            &description,
        ) {
            log::warn!("failed to record external change for {}: {:?}", path_str, e);
        }
        external_change_note = format!("\n[external change detected] {}", description);
    } else {
        task.external_changes.register_snapshot(InMemorySnapshot {
            absolute_path: path_str.clone(),
            content: content.clone(),
            crc32c: whole_crc,
            charset,
            line_count: total_lines,
            timestamp,
        });
    }

    if task.transactions.is_transaction_open() {
        task.transactions.mark_accessed(&path_str);
    }

    let token = task.tokens.issue(&path_str, start, end, range_crc, total_lines);
    task.touch_activity();

    ToolResponse::ok(format!(
        "{}\n---\ntoken: {}{}",
        requested.join("\n"),
        token.serialize(),
        external_change_note
    ))
}

/// `edit(path, token, startLine, endLine, newText)` — validates the token against the current
/// range, then replaces `[startLine..endLine]` with `newText` inside one transaction.
pub fn edit(registry: &TaskContextRegistry, path: &Path, token_str: &str, start_line: usize, end_line: usize, new_text: &str) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    let resolved_path = match sanitize_within(&task.working_directory, path) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let path_str = resolved_path.to_string_lossy().to_string();

    let decoded = match decode_token(token_str) {
        Ok(decoded) => decoded,
        Err(validation) => return validation_response(validation),
    };

    let bytes = match task.safe_io.read_all(&resolved_path) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };
    let (content, _charset) = match decode_text(&bytes) {
        Ok(decoded) => decoded,
        Err(response) => return response,
    };

    let index = LineIndex::build(&content);
    let total_lines = index.line_count().max(1);
    let lines: Vec<&str> = content.lines().collect();
    let requested: Vec<&str> = lines.get(start_line.saturating_sub(1)..end_line).unwrap_or(&[]).to_vec();
    let current_range_crc = crc32c_of_range(&requested, "\n");

    let previous_path_hashes: Vec<String> = task.lineage.get_previous_paths(&path_str).iter().map(|p| path_hash8(Path::new(p))).collect();
    let accessed_in_transaction = task.transactions.is_accessed_in_transaction(&path_str);

    let validation = validate_decoded(&decoded, &resolved_path, &previous_path_hashes, accessed_in_transaction, current_range_crc, total_lines);
    if validation != TokenValidation::Valid {
        return validation_response(validation);
    }

    let mut new_lines: Vec<&str> = lines[..start_line - 1].to_vec();
    let replacement: Vec<&str> = new_text.lines().collect();
    new_lines.extend(replacement.iter().copied());
    new_lines.extend(lines[end_line..].iter().copied());
    let new_content = new_lines.join("\n");
    let new_total_lines = new_lines.len();
    let line_delta = new_total_lines as i64 - total_lines as i64;

    if let Err(e) = task.transactions.start_transaction(format!("edit {}", path_str), None) {
        return error_response(e);
    }
    let before_crc = crc32c_of_bytes(content.as_bytes());
    let before_size = bytes.len() as u64;
    if let Err(e) = task.transactions.backup(&path_str, Some(bytes), before_crc, before_size) {
        return error_response(e);
    }

    if let Err(e) = task.safe_io.write(&resolved_path, new_content.as_bytes()) {
        return error_response(e);
    }

    // Record the pre-edit CRC too: smart undo locates a renamed file by the CRC buffered in
    // its backup snapshot, which predates whatever write happens here.
    task.lineage.update_crc(&path_str, before_crc);
    task.lineage.update_crc(&path_str, crc32c_of_bytes(new_content.as_bytes()));
    task.tokens.apply_edit(&path_str, start_line, line_delta, new_total_lines, |existing| {
        let slice = new_lines.get(existing.start_line.saturating_sub(1)..existing.end_line.min(new_lines.len())).unwrap_or(&[]);
        crc32c_of_range(slice, "\n")
    });

    match task.transactions.commit() {
        Ok(_) => {
            task.touch_activity();
            ToolResponse::ok(format!("edited {} ({}..{} -> {} lines)", path_str, start_line, end_line, replacement.len()))
        }
        Err(e) => error_response(e),
    }
}

/// `create(path, content)` — writes a brand-new file inside one transaction; the backed-up
/// "previous" state is `None`, so rollback/undo deletes it.
pub fn create(registry: &TaskContextRegistry, path: &Path, content: &[u8]) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    let resolved_path = match sanitize_within(&task.working_directory, path) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let path_str = resolved_path.to_string_lossy().to_string();

    if let Err(e) = task.transactions.start_transaction(format!("create {}", path_str), None) {
        return error_response(e);
    }
    if let Err(e) = task.transactions.backup(&path_str, None, 0, 0) {
        return error_response(e);
    }
    if let Err(e) = task.transactions.mark_created(&path_str) {
        return error_response(e);
    }
    if let Err(e) = task.safe_io.write(&resolved_path, content) {
        return error_response(e);
    }

    task.lineage.register_file(&path_str);
    task.lineage.update_crc(&path_str, crc32c_of_bytes(content));

    match task.transactions.commit() {
        Ok(_) => {
            task.touch_activity();
            ToolResponse::ok(format!("created {} ({} bytes)", path_str, content.len()))
        }
        Err(e) => error_response(e),
    }
}

/// `move(src, dst)` — renames a file, transferring its lineage and tokens to the new path.
pub fn move_file(registry: &TaskContextRegistry, src: &Path, dst: &Path) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    let resolved_src = match sanitize_within(&task.working_directory, src) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let resolved_dst = match sanitize_within(&task.working_directory, dst) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let src_str = resolved_src.to_string_lossy().to_string();
    let dst_str = resolved_dst.to_string_lossy().to_string();

    let bytes = match task.safe_io.read_all(&resolved_src) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };

    if let Err(e) = task.transactions.start_transaction(format!("move {} -> {}", src_str, dst_str), None) {
        return error_response(e);
    }
    let crc = crc32c_of_bytes(&bytes);
    if let Err(e) = task.transactions.backup(&src_str, Some(bytes), crc, 0) {
        return error_response(e);
    }
    // The destination didn't exist before the move; back it up as absent so undo removes
    // whatever now sits there instead of leaving a duplicate behind.
    if let Err(e) = task.transactions.backup(&dst_str, None, 0, 0) {
        return error_response(e);
    }
    if let Err(e) = task.safe_io.move_file(&resolved_src, &resolved_dst) {
        return error_response(e);
    }

    task.lineage.record_move(&src_str, &dst_str);
    task.tokens.rename_path(&src_str, &dst_str);

    match task.transactions.commit() {
        Ok(_) => {
            task.touch_activity();
            ToolResponse::ok(format!("moved {} -> {}", src_str, dst_str))
        }
        Err(e) => error_response(e),
    }
}

/// `delete(path)` — removes a file inside one transaction, backing up its content first.
pub fn delete(registry: &TaskContextRegistry, path: &Path) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    let resolved_path = match sanitize_within(&task.working_directory, path) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    let path_str = resolved_path.to_string_lossy().to_string();

    let bytes = match task.safe_io.read_all(&resolved_path) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(e),
    };

    if let Err(e) = task.transactions.start_transaction(format!("delete {}", path_str), None) {
        return error_response(e);
    }
    let crc = crc32c_of_bytes(&bytes);
    let size = bytes.len() as u64;
    if let Err(e) = task.transactions.backup(&path_str, Some(bytes), crc, size) {
        return error_response(e);
    }
    if let Err(e) = task.safe_io.delete(&resolved_path) {
        return error_response(e);
    }

    match task.transactions.commit() {
        Ok(_) => {
            task.touch_activity();
            ToolResponse::ok(format!("deleted {}", path_str))
        }
        Err(e) => error_response(e),
    }
}

pub fn undo(registry: &TaskContextRegistry) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    match task.transactions.undo(&task.lineage) {
        Ok(UndoOutcome::Applied(result)) => {
            task.touch_activity();
            ToolResponse::ok(format!(
                "undone: {} -> {}{}",
                result.original_path,
                result.resolved_path,
                if result.followed_rename { " (followed rename)" } else { "" }
            ))
        }
        Ok(UndoOutcome::NothingToUndo) => ToolResponse::ok("nothing to undo"),
        Err(e) => error_response(e),
    }
}

pub fn redo(registry: &TaskContextRegistry) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };
    match task.transactions.redo(&task.lineage) {
        Ok(UndoOutcome::Applied(result)) => {
            task.touch_activity();
            ToolResponse::ok(format!("redone: {}", result.resolved_path))
        }
        Ok(UndoOutcome::NothingToUndo) => ToolResponse::ok("nothing to redo"),
        Err(e) => error_response(e),
    }
}

/// `checkpoint(name, rollback?)` — creates a named checkpoint, or if `rollback` is set, unwinds
/// to a previously created one.
pub fn checkpoint(registry: &TaskContextRegistry, name: &str, rollback: bool) -> ToolResponse {
    let task = match registry.current() {
        Ok(task) => task,
        Err(e) => return error_response(e),
    };

    if rollback {
        return match task.transactions.rollback_to_checkpoint(name, &task.lineage) {
            Ok(undone) => {
                task.touch_activity();
                ToolResponse::ok(format!("rolled back to checkpoint {} ({} entries undone)", name, undone.len()))
            }
            Err(e) => error_response(e),
        };
    }

    match task.transactions.create_checkpoint(name) {
        Ok(_) => {
            task.touch_activity();
            ToolResponse::ok(format!("checkpoint created: {}", name))
        }
        Err(e) => error_response(e),
    }
}

/// `task(taskId)` — switches the calling thread's current task, reactivating it if persistent.
pub fn task(registry: &TaskContextRegistry, task_id: &str) -> ToolResponse {
    registry.set_current(nts_shared::TaskId::new(task_id));
    match registry.current() {
        Ok(task) => ToolResponse::ok(format!("current task: {}", task.id)),
        Err(e) => error_response(e),
    }
}

/// Out of scope: would dispatch to the subprocess-driven verification collaborator.
pub fn verify(_path: &Path, _command: &str) -> ToolResponse {
    ToolResponse::ok("verify is not implemented by the transactional core; route to the subprocess runner collaborator")
}

/// Out of scope: would dispatch to the tree-sitter-aware symbol/pattern matcher.
pub fn search(_query: &str) -> ToolResponse {
    ToolResponse::ok("search is not implemented by the transactional core; route to the syntax-aware matcher collaborator")
}

fn validation_response(validation: TokenValidation) -> ToolResponse {
    match validation {
        TokenValidation::Valid => ToolResponse::ok("valid"),
        TokenValidation::CrcMismatch { suggestion } => ToolResponse::error(format!("CRC_MISMATCH: {}", suggestion)),
        TokenValidation::LineCountMismatch { suggestion } => ToolResponse::error(format!("LINE_COUNT_MISMATCH: {}", suggestion)),
        TokenValidation::NotFound { reason } => ToolResponse::error(format!("TOKEN_NOT_FOUND: {}", reason)),
    }
}
