/// The façade's response shape: a textual report plus an error flag, matching the `{ content,
/// isError }` surface spec.md §6 describes as vendor-defined by the host protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub content: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(content: impl Into<String>) -> ToolResponse {
        ToolResponse { content: content.into(), is_error: false }
    }

    pub fn error(content: impl Into<String>) -> ToolResponse {
        ToolResponse { content: content.into(), is_error: true }
    }
}
