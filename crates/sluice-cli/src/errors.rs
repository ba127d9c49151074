//! Error messages with actionable suggestions.

use rhi_sluice_core::levenshtein;
use std::path::Path;

/// Build an error message for file read errors.
pub fn file_read_error(path: &Path, err: &std::io::Error) -> String {
    use std::io::ErrorKind;

    let mut msg = format!("Failed to read '{}'", path.display());

    match err.kind() {
        ErrorKind::NotFound => {
            msg.push_str(": file not found");

            let suggestions = find_similar_files(path).unwrap_or_default();
            if !suggestions.is_empty() {
                msg.push_str(&format!(".\n\nDid you mean: {}?", suggestions.join(", ")));
            }
        }
        ErrorKind::PermissionDenied => {
            msg.push_str(": permission denied. Check file permissions.");
        }
        _ => {
            msg.push_str(&format!(": {}", err));
        }
    }

    msg
}

/// Find similar files in the same directory (for "did you mean" suggestions).
fn find_similar_files(path: &Path) -> Option<Vec<String>> {
    let filename = path.file_name()?.to_str()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut suggestions: Vec<String> = std::fs::read_dir(parent)
        .ok()?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .filter(|name| name != filename && levenshtein(filename, name) <= 2)
        .collect();

    suggestions.sort();
    suggestions.truncate(3);
    Some(suggestions)
}
