//! Overlapping-window text chunker.
//!
//! Splits extracted document text into fixed-size character windows with a
//! configurable overlap, so context spanning a window boundary appears in
//! both neighbors. Each window is whitespace-normalized before storage;
//! windows that normalize to nothing are dropped, and indices are assigned
//! by the caller over the surviving chunks.

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// `overlap` characters are shared between consecutive windows and must be
/// smaller than `chunk_size` (validated at config load; guarded here too so
/// the loop always advances).
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let window: String = chars[start..end].iter().collect();

        let cleaned = normalize_whitespace(&window);
        if !cleaned.is_empty() {
            chunks.push(cleaned);
        }

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Trim each line, drop blank lines, join with single spaces.
fn normalize_whitespace(window: &str) -> String {
    window
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
