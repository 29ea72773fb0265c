/// Input filtering for host captures.
///
/// Capture directories tend to collect more than exports: archives the
/// exports came in, screenshots, converted office documents. These helpers
/// decide which files are handed to the classifier.
use glob::Pattern;
use std::path::Path;

/// Extensions that are never plain-text captures
const NON_TEXT_EXTENSIONS: &[&str] = &[
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "png", "jpg", "jpeg", "gif", "bmp",
    "pdf", "doc", "docx", "xls", "xlsx", "rtf", "exe", "dll", "so", "bin",
];

/// Checks if a file has one of the allowed extensions (`None` allows all)
pub fn has_valid_extension(path: &Path, extensions: &Option<Vec<String>>) -> bool {
    match extensions {
        None => true,
        Some(exts) => path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| exts.iter().any(|e| e.eq_ignore_ascii_case(ext))),
    }
}

/// Checks if a file matches any of the glob ignore patterns
pub fn should_ignore(path: &Path, ignore_patterns: &[String]) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    ignore_patterns.iter().any(|pattern| match Pattern::new(pattern) {
        Ok(p) => p.matches(&normalized),
        Err(_) => false,
    })
}

/// Checks if a file is an archive, image or other non-text artifact
pub fn is_non_text(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            NON_TEXT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Determines if a file should be read as a host capture
pub fn should_include_file(
    path: &Path,
    extensions: &Option<Vec<String>>,
    ignore_patterns: &[String],
) -> bool {
    !is_non_text(path)
        && has_valid_extension(path, extensions)
        && !should_ignore(path, ignore_patterns)
}
