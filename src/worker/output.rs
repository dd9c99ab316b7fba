/// Keep at most `max_bytes` of `text`, appending a visible marker when cut.
///
/// The cut lands on the nearest character boundary at or below `max_bytes`, so
/// the kept prefix is always valid UTF-8 and the marker stays readable.
pub fn truncate_output(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }

    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut kept = text;
    kept.truncate(cut);
    kept.push_str(&truncation_marker(max_bytes));
    kept
}

pub fn truncation_marker(max_bytes: usize) -> String {
    format!("\n... [output truncated: exceeded {} byte limit]", max_bytes)
}
