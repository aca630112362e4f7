/// Byte offset of the earliest stop sequence in `text`, if any.
///
/// Empty stop strings are ignored so they can't end generation immediately.
pub fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Cuts `text` right before the earliest stop sequence. Returns whether a cut
/// happened.
pub fn truncate_at_stop(text: &mut String, stop: &[String]) -> bool {
    match find_stop(text, stop) {
        Some(idx) => {
            text.truncate(idx);
            true
        }
        None => false,
    }
}
