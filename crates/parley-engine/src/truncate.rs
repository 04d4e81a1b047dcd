/// Limit for step inputs and tool outputs.
pub const DETAIL_LIMIT: usize = 500;
/// Limit for final and post-processed responses.
pub const RESPONSE_LIMIT: usize = 200;

const ELLIPSIS: &str = "...";

/// Keep at most `max_chars` characters of `text`, appending `...` when
/// anything was cut. Counts chars, so multi-byte text is never split.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_owned(),
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
    }
}
