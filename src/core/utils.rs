use std::path::{Component, Path};

/// Normalize a caller-supplied project path for consistent comparison
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Check if a relative project path is safe (no traversal, no absolute paths)
pub fn is_safe_path(path: &str) -> bool {
    let normalized = normalize_path(path);
    if normalized.is_empty() || normalized.starts_with('/') {
        return false;
    }
    Path::new(&normalized)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Characters in a string, the unit source limits are expressed in
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Keep at most `max_chars` characters, appending `suffix` when cut
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], suffix),
        None => text.to_string(),
    }
}
