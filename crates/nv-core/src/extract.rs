//! File selection and text extraction
//!
//! Decides which files take part in indexing and which chunking policy
//! applies to each of them.

use std::path::Path;

use crate::Config;

/// Extensions chunked on function/class/assignment boundaries
const CODE_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "jsx", "tsx", "py", "java", "cpp", "cc", "c", "h", "hpp", "cs",
    "go", "rs", "rb", "php", "swift", "kt", "scala",
];

/// Extensions chunked on headings or paragraphs
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx", "txt", "rst", "org"];

/// Other text formats indexed with fixed windows
const OTHER_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "xml", "html", "htm", "css", "scss", "csv", "sql", "sh",
    "bash", "ini", "cfg", "conf", "tex",
];

/// Chunking policy for a file, chosen from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Code,
    Markdown,
    Other,
}

impl FileCategory {
    /// Classify a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = extension_of(path);
        if CODE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Code
        } else if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
            Self::Markdown
        } else {
            Self::Other
        }
    }
}

/// Lowercased extension without the dot, empty when absent.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Check if an extension is in the built-in allowlist.
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    CODE_EXTENSIONS.contains(&ext.as_str())
        || MARKDOWN_EXTENSIONS.contains(&ext.as_str())
        || OTHER_EXTENSIONS.contains(&ext.as_str())
}

/// Check if a file should be indexed based on config and extension.
pub fn should_index(path: &Path, config: &Config) -> bool {
    let ext = extension_of(path);

    // Check exclude list first
    if config
        .exclude_extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    {
        return false;
    }

    // If include list is specified, only include those
    if !config.include_extensions.is_empty() {
        return config
            .include_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext));
    }

    is_supported_extension(&ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_extension() {
        assert!(is_supported_extension("md"));
        assert!(is_supported_extension("MD"));
        assert!(is_supported_extension("py"));
        assert!(is_supported_extension("json"));
        assert!(!is_supported_extension("png"));
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(FileCategory::from_path(Path::new("a/b.tsx")), FileCategory::Code);
        assert_eq!(FileCategory::from_path(Path::new("notes.MD")), FileCategory::Markdown);
        assert_eq!(FileCategory::from_path(Path::new("todo.txt")), FileCategory::Markdown);
        assert_eq!(FileCategory::from_path(Path::new("data.csv")), FileCategory::Other);
        assert_eq!(FileCategory::from_path(Path::new("Makefile")), FileCategory::Other);
    }

    #[test]
    fn test_should_index_respects_lists() {
        let mut config = Config::default();
        assert!(should_index(Path::new("a.md"), &config));

        config.exclude_extensions = vec!["md".into()];
        assert!(!should_index(Path::new("a.md"), &config));

        config.exclude_extensions.clear();
        config.include_extensions = vec![".rs".into()];
        assert!(should_index(Path::new("main.rs"), &config));
        assert!(!should_index(Path::new("a.md"), &config));
    }
}
